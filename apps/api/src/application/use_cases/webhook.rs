use std::sync::Arc;

use getpaid_stripe_types::{Event, is_valid_event_id};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;

use super::reconciliation::{Reconciled, ReconciliationEngine};
use crate::{
    app_error::{AppError, AppResult},
    application::{
        ports::hooks::BillingHooks,
        resources::{RemoteResource, StripeContext, event::EventResource},
    },
    domain::entities::stripe_event::StripeEventKind,
};

// ============================================================================
// Constants
// ============================================================================

/// Id Stripe uses for the dashboard's "send test webhook" button.
pub const TEST_EVENT_ID: &str = "evt_00000000000000";
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Only the id of a delivered payload is trusted.
#[derive(Debug, Deserialize)]
struct DeliveredEvent {
    id: String,
}

/// Result of a manual replay, shown to the admin.
#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    pub event_id: String,
    pub event_type: String,
    pub handled: bool,
    pub outcome: String,
    pub payload: Value,
}

// ============================================================================
// Signature verification
// ============================================================================

/// Checks a `Stripe-Signature` header (`t=...,v1=...`) against the raw body.
pub fn verify_signature(payload: &str, header: &str, secret: &str, now: i64) -> AppResult<()> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = Some(value),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp
        .ok_or_else(|| AppError::InvalidInput("Missing timestamp in signature".into()))?;
    if signatures.is_empty() {
        return Err(AppError::InvalidInput("Missing signature".into()));
    }

    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|_| AppError::Internal("HMAC error".into()))?;
    mac.update(format!("{timestamp}.{payload}").as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());

    if !signatures
        .iter()
        .any(|sig| constant_time_eq(sig.as_bytes(), expected.as_bytes()))
    {
        return Err(AppError::InvalidInput("Signature mismatch".into()));
    }

    let signed_at: i64 = timestamp
        .parse()
        .map_err(|_| AppError::InvalidInput("Invalid timestamp".into()))?;
    if (now - signed_at).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(AppError::InvalidInput("Timestamp outside tolerance".into()));
    }
    Ok(())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

// ============================================================================
// Dispatcher
// ============================================================================

pub struct WebhookDispatcher {
    ctx: StripeContext,
    engine: Arc<ReconciliationEngine>,
    hooks: Arc<dyn BillingHooks>,
    signing_secret: Option<SecretString>,
}

impl WebhookDispatcher {
    pub fn new(
        ctx: StripeContext,
        engine: Arc<ReconciliationEngine>,
        hooks: Arc<dyn BillingHooks>,
        signing_secret: Option<SecretString>,
    ) -> Self {
        Self {
            ctx,
            engine,
            hooks,
            signing_secret,
        }
    }

    /// Handles a delivery and returns the plaintext acknowledgement.
    ///
    /// Stripe disables an endpoint that keeps answering with errors, so every
    /// outcome is acknowledged and failures are only logged.
    pub async fn handle(&self, raw_body: &str, signature: Option<&str>) -> &'static str {
        if raw_body.trim().is_empty() {
            return "Empty payload";
        }

        if let Some(secret) = &self.signing_secret {
            let verified = signature
                .ok_or_else(|| AppError::InvalidInput("Missing Stripe signature".into()))
                .and_then(|header| {
                    verify_signature(
                        raw_body,
                        header,
                        secret.expose_secret(),
                        chrono::Utc::now().timestamp(),
                    )
                });
            if let Err(e) = verified {
                tracing::warn!(error = %e, "Rejected webhook with invalid signature");
                return "Invalid signature";
            }
        }

        let delivered: DeliveredEvent = match serde_json::from_str(raw_body) {
            Ok(delivered) => delivered,
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring unparsable webhook payload");
                return "Invalid payload";
            }
        };

        if delivered.id == TEST_EVENT_ID {
            tracing::info!("Test webhook received");
            return "Test webhook received";
        }

        let event = match self.fetch(&delivered.id).await {
            Ok(event) => event,
            Err(e) => {
                tracing::error!(
                    event_id = %delivered.id,
                    error = %e,
                    retryable = e.is_retryable(),
                    "Failed to fetch webhook event"
                );
                return "Event could not be retrieved";
            }
        };

        match self.dispatch(&event).await {
            Ok(_) => "OK",
            Err(e) => {
                tracing::error!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    error = %e,
                    retryable = e.is_retryable(),
                    "Webhook handler failed"
                );
                "Handler failed"
            }
        }
    }

    /// Fetches and dispatches an event on an admin's request.
    pub async fn process_manually(&self, event_id: &str) -> AppResult<ReplayReport> {
        let event_id = event_id.trim();
        if !is_valid_event_id(event_id) {
            return Err(AppError::InvalidInput(format!("Invalid event id: {event_id}")));
        }

        let event = self.fetch(event_id).await?;
        let (handled, outcome) = match self.dispatch(&event).await {
            Ok(Some(reconciled)) => (true, reconciled.to_string()),
            Ok(None) => (false, "no handler".to_string()),
            Err(e) => {
                tracing::error!(
                    event_id,
                    event_type = %event.event_type,
                    error = %e,
                    "Replayed event handler failed"
                );
                (true, format!("failed: {e}"))
            }
        };
        tracing::info!(event_id, event_type = %event.event_type, "Replayed webhook event");

        Ok(ReplayReport {
            event_id: event.id.clone(),
            event_type: event.event_type.clone(),
            handled,
            outcome,
            payload: serde_json::to_value(&event).unwrap_or(Value::Null),
        })
    }

    async fn fetch(&self, event_id: &str) -> AppResult<Event> {
        EventResource::new(&self.ctx, self.ctx.settings.default_mode, event_id)
            .get()
            .await
    }

    /// Runs the handler for the event's type, then the generic event hook.
    async fn dispatch(&self, event: &Event) -> AppResult<Option<Reconciled>> {
        let event_type = event.normalized_type();
        let outcome = match StripeEventKind::from_normalized(&event_type) {
            Some(kind) => Some(self.engine.handle(kind, event).await),
            None => {
                tracing::debug!(event_id = %event.id, event_type, "No handler for event");
                None
            }
        };

        self.hooks.stripe_event(&event_type, event).await;

        match outcome {
            Some(Ok(reconciled)) => {
                tracing::info!(
                    event_id = %event.id,
                    event_type,
                    outcome = %reconciled,
                    "Webhook event processed"
                );
                Ok(Some(reconciled))
            }
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }
}
