//! Reconciliation engine.
//!
//! Maps the state of remote payment objects onto local invoices and
//! subscriptions. Redirect returns, webhook deliveries and admin replays all
//! end up here, so every transition is guarded by a durable marker and applies
//! at most once however often or in whatever order it is triggered.

use std::sync::Arc;

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use getpaid_stripe_types::{
    Charge, CheckoutMode, CheckoutSession, Event, Intent, PaymentIntent, PaymentIntentStatus,
    SetupIntent, SetupIntentStatus, StripeInvoice, Subscription as RemoteSubscription,
    SubscriptionStatus as RemoteStatus, from_minor_units, timestamp, to_minor_units,
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use super::subscription_sync::SubscriptionSync;
use crate::{
    app_error::{AppError, AppResult},
    application::{
        ports::{
            hooks::BillingHooks,
            store::{
                InvoiceRepo, MetaScope, RenewalPayment, SubscriptionRepo, meta_keys, restore_meta,
            },
        },
        resources::{
            RemoteResource, StripeContext, intent::IntentResource,
            setup_intent::set_default_payment_method,
        },
    },
    domain::entities::{
        invoice::{Invoice, InvoiceStatus},
        stripe_event::StripeEventKind,
        subscription::Subscription,
    },
};

/// Result of reconciling one remote object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    Applied,
    Skipped(&'static str),
}

impl std::fmt::Display for Reconciled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reconciled::Applied => write!(f, "applied"),
            Reconciled::Skipped(reason) => write!(f, "skipped: {reason}"),
        }
    }
}

/// Charge and intent behind a renewal, recorded before the renewal invoice event arrives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct RenewalCorrelation {
    charge: String,
    intent: String,
}

fn renewal_ref_key(reference: &str) -> String {
    format!("stripe_renewal_ref_{reference}")
}

fn event_object<T: DeserializeOwned>(event: &Event) -> AppResult<T> {
    event.object().map_err(|e| AppError::GenericApiError {
        code: "invalid_event".into(),
        message: format!("Event {} carries an unexpected object: {e}", event.id),
    })
}

pub struct ReconciliationEngine {
    ctx: StripeContext,
    invoices: Arc<dyn InvoiceRepo>,
    subscriptions: Arc<dyn SubscriptionRepo>,
    sync: Arc<SubscriptionSync>,
    hooks: Arc<dyn BillingHooks>,
}

impl ReconciliationEngine {
    pub fn new(
        ctx: StripeContext,
        invoices: Arc<dyn InvoiceRepo>,
        subscriptions: Arc<dyn SubscriptionRepo>,
        sync: Arc<SubscriptionSync>,
        hooks: Arc<dyn BillingHooks>,
    ) -> Self {
        Self {
            ctx,
            invoices,
            subscriptions,
            sync,
            hooks,
        }
    }

    /// Routes an event to its handler.
    pub async fn handle(&self, kind: StripeEventKind, event: &Event) -> AppResult<Reconciled> {
        match kind {
            StripeEventKind::ChargeRefunded => self.charge_refunded(event).await,
            StripeEventKind::CheckoutSessionCompleted => self.checkout_session_completed(event).await,
            StripeEventKind::CustomerSubscriptionDeleted => {
                self.customer_subscription_deleted(event).await
            }
            StripeEventKind::CustomerSubscriptionUpdated => {
                self.customer_subscription_updated(event).await
            }
            StripeEventKind::InvoicePaymentFailed => self.invoice_payment_failed(event).await,
            StripeEventKind::InvoicePaymentSucceeded => self.invoice_payment_succeeded(event).await,
            StripeEventKind::PaymentIntentSucceeded => self.payment_intent_succeeded(event).await,
            StripeEventKind::SetupIntentSucceeded => self.setup_intent_succeeded(event).await,
        }
    }

    // ========================================================================
    // Payment & setup intents
    // ========================================================================

    async fn invoice_from_metadata(
        &self,
        metadata: &getpaid_stripe_types::Metadata,
    ) -> AppResult<Option<Invoice>> {
        if let Some(id) = metadata.get("invoice_id").and_then(|id| id.parse::<i64>().ok())
            && let Some(invoice) = self.invoices.get_by_id(id).await?
        {
            return Ok(Some(invoice));
        }
        match metadata.get("invoice_key").filter(|key| !key.is_empty()) {
            Some(key) => self.invoices.get_by_key(key).await,
            None => Ok(None),
        }
    }

    /// Invoice an intent id was recorded on, by transaction id or stored intent id.
    async fn invoice_by_intent(&self, intent_id: &str) -> AppResult<Option<Invoice>> {
        if let Some(invoice) = self.invoices.get_by_transaction_id(intent_id).await? {
            return Ok(Some(invoice));
        }
        match self
            .ctx
            .meta
            .find_invoice_id(meta_keys::INTENT_ID, intent_id)
            .await?
        {
            Some(id) => self.invoices.get_by_id(id).await,
            None => Ok(None),
        }
    }

    /// Applies a payment intent's status to its invoice.
    ///
    /// `invoice` is passed when the caller already knows it, e.g. from a
    /// checkout session; otherwise it is resolved from the intent metadata.
    pub async fn process_payment_intent(
        &self,
        intent: &PaymentIntent,
        invoice: Option<&Invoice>,
    ) -> AppResult<Reconciled> {
        let invoice = match invoice {
            Some(invoice) => invoice.clone(),
            None => match self.invoice_from_metadata(&intent.metadata).await? {
                Some(invoice) => invoice,
                None => return Ok(Reconciled::Skipped("no matching invoice")),
            },
        };
        if invoice.is_paid() {
            return Ok(Reconciled::Skipped("invoice already paid"));
        }

        let scope = MetaScope::Invoice(invoice.id);
        let marker = format!("{}|{}", intent.id, intent.status);
        let previous = self
            .ctx
            .meta
            .swap_meta(scope, meta_keys::INTENT_STATE, &marker)
            .await?;
        if previous.as_deref() == Some(marker.as_str()) {
            tracing::debug!(
                invoice_id = invoice.id,
                intent_id = %intent.id,
                status = %intent.status,
                "Payment intent status already processed"
            );
            return Ok(Reconciled::Skipped("intent status already processed"));
        }

        let previous_intent = self
            .ctx
            .meta
            .swap_meta(scope, meta_keys::INTENT_ID, &intent.id)
            .await?;

        match self.apply_payment_intent(&invoice, intent).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                let meta = self.ctx.meta.as_ref();
                restore_meta(meta, scope, meta_keys::INTENT_ID, previous_intent.as_deref()).await?;
                restore_meta(meta, scope, meta_keys::INTENT_STATE, previous.as_deref()).await?;
                Err(e)
            }
        }
    }

    async fn apply_payment_intent(
        &self,
        invoice: &Invoice,
        intent: &PaymentIntent,
    ) -> AppResult<Reconciled> {
        match intent.status {
            PaymentIntentStatus::RequiresAction => {
                self.invoices
                    .set_status(invoice.id, InvoiceStatus::OnHold)
                    .await?;
            }
            PaymentIntentStatus::Processing => {
                self.invoices
                    .set_status(invoice.id, InvoiceStatus::Processing)
                    .await?;
            }
            PaymentIntentStatus::Succeeded => {
                let note = match intent.latest_charge_id() {
                    Some(charge) => format!("Stripe Charge ID: {charge}"),
                    None => format!("Stripe Payment Intent ID: {}", intent.id),
                };
                let transaction_id = intent.latest_charge_id().unwrap_or(&intent.id);
                self.invoices
                    .record_payment(invoice.id, transaction_id, &note)
                    .await?;
                tracing::info!(
                    invoice_id = invoice.id,
                    intent_id = %intent.id,
                    transaction_id,
                    "Invoice paid"
                );

                if invoice.is_recurring
                    && let Some(payment_method) = effective_payment_method(intent)
                {
                    self.start_subscriptions(invoice, &payment_method, true)
                        .await?;
                }
            }
            _ => return Ok(Reconciled::Skipped("intent status needs no action")),
        }

        Ok(Reconciled::Applied)
    }

    /// Records `payment_method` as the invoice's payment profile and starts its
    /// subscriptions, once per payment method.
    async fn start_subscriptions(
        &self,
        invoice: &Invoice,
        payment_method: &str,
        initial_payment_taken: bool,
    ) -> AppResult<Reconciled> {
        let scope = MetaScope::Invoice(invoice.id);
        let previous = self
            .ctx
            .meta
            .swap_meta(scope, meta_keys::PAYMENT_PROFILE_ID, payment_method)
            .await?;
        if previous.as_deref() == Some(payment_method) {
            return Ok(Reconciled::Skipped("payment profile already processed"));
        }

        match self
            .sync
            .process_invoice_subscriptions(invoice, initial_payment_taken)
            .await
        {
            Ok(_) => Ok(Reconciled::Applied),
            // The charge went through; a failed start is for the admin to retry.
            Err(e) if initial_payment_taken => {
                tracing::error!(
                    invoice_id = invoice.id,
                    error = %e,
                    "Failed to start subscriptions after payment"
                );
                Ok(Reconciled::Applied)
            }
            Err(e) => {
                restore_meta(
                    self.ctx.meta.as_ref(),
                    scope,
                    meta_keys::PAYMENT_PROFILE_ID,
                    previous.as_deref(),
                )
                .await?;
                Err(e)
            }
        }
    }

    /// Starts the subscriptions of an invoice whose payment method was saved by a setup intent.
    pub async fn process_setup_intent(
        &self,
        intent: &SetupIntent,
        invoice: Option<&Invoice>,
    ) -> AppResult<Reconciled> {
        let Some(payment_method) = intent
            .payment_method_id()
            .filter(|_| intent.status == SetupIntentStatus::Succeeded)
        else {
            return Ok(Reconciled::Skipped("setup intent not succeeded"));
        };

        let invoice = match invoice {
            Some(invoice) => invoice.clone(),
            None => match self.invoice_from_metadata(&intent.metadata).await? {
                Some(invoice) => invoice,
                None => return Ok(Reconciled::Skipped("no matching invoice")),
            },
        };

        let scope = MetaScope::Invoice(invoice.id);
        let previous_intent = self
            .ctx
            .meta
            .swap_meta(scope, meta_keys::INTENT_ID, &intent.id)
            .await?;
        let outcome = self.start_subscriptions(&invoice, payment_method, false).await;
        if outcome.is_err() {
            restore_meta(
                self.ctx.meta.as_ref(),
                scope,
                meta_keys::INTENT_ID,
                previous_intent.as_deref(),
            )
            .await?;
        }
        outcome
    }

    async fn payment_intent_succeeded(&self, event: &Event) -> AppResult<Reconciled> {
        let intent: PaymentIntent = event_object(event)?;
        self.record_renewal_correlation(&intent, event).await?;

        let found = match self.invoice_from_metadata(&intent.metadata).await? {
            Some(invoice) => Some(invoice),
            None => self.invoice_by_intent(&intent.id).await?,
        };
        let Some(invoice) = found else {
            return Ok(Reconciled::Skipped("no matching invoice"));
        };

        // The browser confirmation may be applying this intent right now.
        if self
            .ctx
            .meta
            .delete_meta(MetaScope::Invoice(invoice.id), meta_keys::PROCESS_INTENT)
            .await?
        {
            tracing::debug!(invoice_id = invoice.id, "Redirect in flight, delaying webhook");
            tokio::time::sleep(self.ctx.settings.webhook_race_delay).await;
        }

        let Some(invoice) = self.invoices.get_by_id(invoice.id).await? else {
            return Ok(Reconciled::Skipped("no matching invoice"));
        };
        self.process_payment_intent(&intent, Some(&invoice)).await
    }

    /// Remembers which charge paid a renewal so the renewal invoice can reference it.
    async fn record_renewal_correlation(
        &self,
        intent: &PaymentIntent,
        event: &Event,
    ) -> AppResult<()> {
        let (Some(charge), Some(reference), Some(key)) = (
            intent.latest_charge_id(),
            intent.order_reference(),
            event.idempotency_key(),
        ) else {
            return Ok(());
        };
        if !key.starts_with(reference) {
            return Ok(());
        }

        let reference = key.split('-').next().unwrap_or(key);
        let value = serde_json::to_string(&RenewalCorrelation {
            charge: charge.to_string(),
            intent: intent.id.clone(),
        })
        .map_err(|e| AppError::Internal(format!("Failed to encode correlation: {e}")))?;

        self.ctx
            .cache
            .put(
                &renewal_ref_key(reference),
                &value,
                self.ctx.settings.correlation_ttl,
            )
            .await
    }

    async fn setup_intent_succeeded(&self, event: &Event) -> AppResult<Reconciled> {
        let intent: SetupIntent = event_object(event)?;

        let Some(remote_id) = intent.metadata.get("remote_id").filter(|id| !id.is_empty())
        else {
            return self.process_setup_intent(&intent, None).await;
        };

        // A payment method update for a running subscription.
        let Some(subscription) = self.subscriptions.get_by_profile_id(remote_id).await? else {
            return Ok(Reconciled::Skipped("no matching subscription"));
        };
        let Some(invoice) = self
            .invoices
            .get_by_id(subscription.parent_invoice_id)
            .await?
        else {
            return Ok(Reconciled::Skipped("no matching invoice"));
        };

        set_default_payment_method(&self.ctx, invoice.mode, &intent).await?;
        Ok(Reconciled::Applied)
    }

    // ========================================================================
    // Checkout sessions
    // ========================================================================

    async fn checkout_session_completed(&self, event: &Event) -> AppResult<Reconciled> {
        let session: CheckoutSession = event_object(event)?;

        let invoice_id = session
            .client_reference_id
            .as_deref()
            .and_then(|id| id.parse::<i64>().ok());
        let Some(invoice) = (match invoice_id {
            Some(id) => self.invoices.get_by_id(id).await?,
            None => None,
        }) else {
            return Ok(Reconciled::Skipped("no matching invoice"));
        };
        if invoice.is_paid() {
            return Ok(Reconciled::Skipped("invoice already paid"));
        }

        match session.mode {
            CheckoutMode::Setup => {
                let Some(intent_id) = session.setup_intent.as_deref() else {
                    return Ok(Reconciled::Skipped("session has no setup intent"));
                };
                match IntentResource::with_id(&self.ctx, &invoice, intent_id).get().await? {
                    Intent::Setup(intent) => self.process_setup_intent(&intent, Some(&invoice)).await,
                    Intent::Payment(_) => Ok(Reconciled::Skipped("unexpected intent kind")),
                }
            }
            CheckoutMode::Payment => {
                let Some(intent_id) = session.payment_intent.as_deref() else {
                    return Ok(Reconciled::Skipped("session has no payment intent"));
                };
                match IntentResource::with_id(&self.ctx, &invoice, intent_id).get().await? {
                    Intent::Payment(intent) => {
                        self.process_payment_intent(&intent, Some(&invoice)).await
                    }
                    Intent::Setup(_) => Ok(Reconciled::Skipped("unexpected intent kind")),
                }
            }
            CheckoutMode::Subscription => self.complete_subscription_checkout(&invoice, &session).await,
            CheckoutMode::Unknown => Ok(Reconciled::Skipped("unknown checkout mode")),
        }
    }

    async fn complete_subscription_checkout(
        &self,
        invoice: &Invoice,
        session: &CheckoutSession,
    ) -> AppResult<Reconciled> {
        let remote_id = session.subscription.as_deref().filter(|id| !id.is_empty());

        if let [subscription] = self.subscriptions.list_by_invoice(invoice.id).await?.as_slice() {
            if subscription.is_cancelled() {
                return Ok(Reconciled::Skipped("subscription cancelled"));
            }
            if let Some(remote_id) = remote_id {
                self.subscriptions
                    .set_profile_id(subscription.id, remote_id)
                    .await?;
            }
            self.subscriptions.activate(subscription.id).await?;
        }

        if let Some(remote_id) = remote_id {
            self.invoices
                .set_remote_subscription_id(invoice.id, remote_id)
                .await?;
        }
        match session.invoice.as_deref().filter(|id| !id.is_empty()) {
            Some(remote_invoice) => {
                self.invoices
                    .record_payment(
                        invoice.id,
                        remote_invoice,
                        &format!("Stripe Invoice ID: {remote_invoice}"),
                    )
                    .await?
            }
            None => self.invoices.mark_paid(invoice.id).await?,
        }

        tracing::info!(
            invoice_id = invoice.id,
            session_id = %session.id,
            "Checkout subscription completed"
        );
        Ok(Reconciled::Applied)
    }

    // ========================================================================
    // Refunds
    // ========================================================================

    async fn charge_refunded(&self, event: &Event) -> AppResult<Reconciled> {
        let charge: Charge = event_object(event)?;

        let mut found = self.invoices.get_by_transaction_id(&charge.id).await?;
        if found.is_none()
            && let Some(intent_id) = charge.payment_intent.as_deref()
        {
            found = self.invoice_by_intent(intent_id).await?;
        }
        let Some(invoice) = found else {
            return Ok(Reconciled::Skipped("no matching invoice"));
        };
        if invoice.is_refunded() {
            return Ok(Reconciled::Skipped("invoice already refunded"));
        }

        let scope = MetaScope::Invoice(invoice.id);
        let flag = meta_keys::refund_flag(&charge.id);
        if !self
            .ctx
            .meta
            .claim_meta(scope, &flag, &charge.created.to_string())
            .await?
        {
            return Ok(Reconciled::Skipped("refund already processed"));
        }

        if let Err(e) = self.apply_refund(&invoice, &charge).await {
            self.ctx.meta.delete_meta(scope, &flag).await?;
            return Err(e);
        }
        Ok(Reconciled::Applied)
    }

    async fn apply_refund(&self, invoice: &Invoice, charge: &Charge) -> AppResult<()> {
        let total = to_minor_units(invoice.total, &invoice.currency);

        if charge.amount_refunded > 0 && charge.amount_refunded < total {
            let amount = from_minor_units(charge.amount_refunded, &invoice.currency);
            self.invoices
                .add_note(
                    invoice.id,
                    &format!(
                        "Invoice partially refunded {amount} {}.",
                        invoice.currency.to_uppercase()
                    ),
                    false,
                )
                .await?;
            tracing::info!(
                invoice_id = invoice.id,
                charge_id = %charge.id,
                amount_refunded = charge.amount_refunded,
                "Partial refund recorded"
            );
            return Ok(());
        }

        self.invoices.refund(invoice.id).await?;
        tracing::info!(invoice_id = invoice.id, charge_id = %charge.id, "Invoice refunded");
        Ok(())
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    async fn live_subscription(&self, remote_id: &str) -> AppResult<Result<Subscription, Reconciled>> {
        match self.subscriptions.get_by_profile_id(remote_id).await? {
            None => {
                tracing::debug!(remote_subscription_id = remote_id, "No subscription found");
                Ok(Err(Reconciled::Skipped("no matching subscription")))
            }
            Some(subscription) if subscription.is_cancelled() => {
                Ok(Err(Reconciled::Skipped("subscription cancelled")))
            }
            Some(subscription) => Ok(Ok(subscription)),
        }
    }

    async fn customer_subscription_updated(&self, event: &Event) -> AppResult<Reconciled> {
        let remote: RemoteSubscription = event_object(event)?;
        let subscription = match self.live_subscription(&remote.id).await? {
            Ok(subscription) => subscription,
            Err(skipped) => return Ok(skipped),
        };

        let same_day = |date: DateTime<Utc>| {
            subscription
                .expiration
                .is_some_and(|current| current.date_naive() == date.date_naive())
        };

        let trial_end = remote
            .trial_end_at()
            .filter(|d| remote.status == RemoteStatus::Trialing && !same_day(*d));
        let new_expiration =
            trial_end.or_else(|| remote.period_end().filter(|d| !same_day(*d)));
        if let Some(expiration) = new_expiration {
            self.subscriptions
                .set_expiration(subscription.id, expiration)
                .await?;
            tracing::info!(
                subscription_id = subscription.id,
                expiration = %expiration,
                "Subscription expiration updated"
            );
        }

        self.hooks.subscription_status(&subscription, &remote).await;
        Ok(Reconciled::Applied)
    }

    async fn customer_subscription_deleted(&self, event: &Event) -> AppResult<Reconciled> {
        let remote: RemoteSubscription = event_object(event)?;
        let subscription = match self.live_subscription(&remote.id).await? {
            Ok(subscription) => subscription,
            Err(skipped) => return Ok(skipped),
        };

        self.subscriptions.cancel(subscription.id).await?;
        tracing::info!(
            subscription_id = subscription.id,
            remote_subscription_id = %remote.id,
            "Subscription cancelled"
        );
        Ok(Reconciled::Applied)
    }

    async fn invoice_payment_failed(&self, event: &Event) -> AppResult<Reconciled> {
        let remote: StripeInvoice = event_object(event)?;
        let Some(remote_id) = remote.subscription_id() else {
            return Ok(Reconciled::Skipped("not a subscription invoice"));
        };
        let Some(subscription) = self.subscriptions.get_by_profile_id(remote_id).await? else {
            return Ok(Reconciled::Skipped("no matching subscription"));
        };

        self.subscriptions.failing(subscription.id).await?;
        tracing::info!(subscription_id = subscription.id, "Subscription payment failed");
        Ok(Reconciled::Applied)
    }

    async fn invoice_payment_succeeded(&self, event: &Event) -> AppResult<Reconciled> {
        let remote: StripeInvoice = event_object(event)?;
        let Some(remote_id) = remote.subscription_id() else {
            return Ok(Reconciled::Skipped("not a subscription invoice"));
        };
        let subscription = match self.live_subscription(remote_id).await? {
            Ok(subscription) => subscription,
            Err(skipped) => return Ok(skipped),
        };

        let event_time = event.created_at().unwrap_or_else(Utc::now);
        if is_initial_payment(&remote, &subscription, event_time) {
            return self.initial_subscription_payment(&subscription, &remote).await;
        }
        self.renew_subscription(&subscription, &remote).await
    }

    async fn initial_subscription_payment(
        &self,
        subscription: &Subscription,
        remote: &StripeInvoice,
    ) -> AppResult<Reconciled> {
        let transaction_id = remote.transaction_id();
        let parent = self
            .invoices
            .get_by_id(subscription.parent_invoice_id)
            .await?;
        if let Some(parent) = &parent
            && parent.is_paid()
            && parent.has_transaction_id(transaction_id)
        {
            return Ok(Reconciled::Skipped("initial payment already processed"));
        }

        self.subscriptions.activate(subscription.id).await?;
        if let Some(parent) = parent {
            self.invoices
                .record_payment(
                    parent.id,
                    transaction_id,
                    &format!("Stripe Charge ID: {transaction_id}"),
                )
                .await?;
        }
        Ok(Reconciled::Applied)
    }

    async fn renew_subscription(
        &self,
        subscription: &Subscription,
        remote: &StripeInvoice,
    ) -> AppResult<Reconciled> {
        let scope = MetaScope::Subscription(subscription.id);
        let flag = meta_keys::renewal_flag(&remote.id);
        if !self
            .ctx
            .meta
            .claim_meta(scope, &flag, remote.transaction_id())
            .await?
        {
            return Ok(Reconciled::Skipped("renewal already processed"));
        }

        match self.apply_renewal(subscription, remote).await {
            Ok(invoice) => {
                tracing::info!(
                    subscription_id = subscription.id,
                    invoice_id = invoice.id,
                    transaction_id = remote.transaction_id(),
                    "Subscription renewed"
                );
                Ok(Reconciled::Applied)
            }
            Err(e) => {
                self.ctx.meta.delete_meta(scope, &flag).await?;
                Err(e)
            }
        }
    }

    async fn apply_renewal(
        &self,
        subscription: &Subscription,
        remote: &StripeInvoice,
    ) -> AppResult<Invoice> {
        let now = Utc::now();
        let period_start = match remote.paid_at() {
            Some(paid_at) => paid_at,
            None => now.duration_trunc(TimeDelta::minutes(1)).unwrap_or(now),
        };
        let correlation = self.renewal_correlation(remote).await?;

        // An earlier attempt may have stored the invoice before the subscription update failed.
        let invoice = match self
            .invoices
            .get_renewal(subscription.id, remote.transaction_id())
            .await?
        {
            Some(invoice) => invoice,
            None => {
                let payment = RenewalPayment {
                    transaction_id: remote.transaction_id().to_string(),
                    created_at: timestamp(remote.created).unwrap_or(now),
                    completed_at: period_start,
                    payment_intent_id: correlation.as_ref().map(|(_, c)| c.intent.clone()),
                    charge_id: correlation.as_ref().map(|(_, c)| c.charge.clone()),
                };
                self.invoices.create_renewal(subscription, &payment).await?
            }
        };
        self.subscriptions
            .renew(subscription.id, period_start)
            .await?;

        if let Some((key, _)) = correlation
            && let Err(e) = self.ctx.cache.remove(&key).await
        {
            tracing::warn!(key = %key, error = %e, "Failed to clear renewal correlation");
        }
        Ok(invoice)
    }

    /// The charge correlation recorded for this renewal, with its cache key.
    async fn renewal_correlation(
        &self,
        remote: &StripeInvoice,
    ) -> AppResult<Option<(String, RenewalCorrelation)>> {
        let mut references = vec![remote.id.as_str()];
        if remote.transaction_id() != remote.id {
            references.push(remote.transaction_id());
        }

        for reference in references {
            let key = renewal_ref_key(reference);
            if let Some(raw) = self.ctx.cache.get(&key).await? {
                match serde_json::from_str(&raw) {
                    Ok(correlation) => return Ok(Some((key, correlation))),
                    Err(e) => tracing::warn!(reference, error = %e, "Discarding bad correlation"),
                }
            }
        }
        Ok(None)
    }
}

/// The payment method to bill future renewals with.
///
/// iDEAL payments can't be reused, so Stripe generates a SEPA debit method from them.
fn effective_payment_method(intent: &PaymentIntent) -> Option<String> {
    let payment_method = intent.payment_method_id()?;
    let generated = intent
        .latest_charge_object()
        .and_then(Charge::generated_sepa_debit);
    Some(generated.unwrap_or(payment_method).to_string())
}

/// Whether a paid subscription invoice is the subscription's first payment.
///
/// Stripe's billing reason decides when present. Older payloads fall back to
/// comparing UTC calendar days of creation and payment.
fn is_initial_payment(
    remote: &StripeInvoice,
    subscription: &Subscription,
    event_time: DateTime<Utc>,
) -> bool {
    match remote.billing_reason.as_deref() {
        Some(reason) if !reason.is_empty() => reason == "subscription_create",
        _ => subscription.created_at.date_naive() == event_time.date_naive(),
    }
}
