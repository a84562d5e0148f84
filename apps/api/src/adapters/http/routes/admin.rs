//! Operator endpoints.
//! Note: The require_admin middleware is applied in mod.rs when nesting this router.

use super::common::*;
use crate::application::use_cases::{subscription_sync::ExpiredCheckReport, webhook::ReplayReport};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Deserialize)]
struct WebhookEndpointQuery {
    mode: Option<StripeMode>,
}

#[derive(Serialize)]
struct WebhookEndpointResponse {
    mode: StripeMode,
    webhook_endpoint_id: String,
}

#[derive(Serialize)]
struct RefundResponse {
    invoice_id: i64,
    refund_id: String,
    status: Option<String>,
}

#[derive(Serialize)]
struct CancelResponse {
    subscription_id: i64,
    cancelled: bool,
    remote_subscription_id: Option<String>,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/admin/stripe/events/{event_id}/replay
async fn replay_event(
    State(app_state): State<AppState>,
    Path(event_id): Path<String>,
) -> AppResult<Json<ReplayReport>> {
    let report = app_state
        .webhook_dispatcher
        .process_manually(&event_id)
        .await?;
    Ok(Json(report))
}

/// POST /api/admin/stripe/subscriptions/check-expired
async fn check_expired_subscriptions(
    State(app_state): State<AppState>,
) -> AppResult<Json<ExpiredCheckReport>> {
    let report = app_state
        .subscription_sync
        .check_expired_subscriptions()
        .await?;
    Ok(Json(report))
}

/// POST /api/admin/stripe/webhook-endpoint?mode=live
/// Registers this site's webhook endpoint; defaults to the configured mode.
async fn ensure_webhook_endpoint(
    State(app_state): State<AppState>,
    Query(query): Query<WebhookEndpointQuery>,
) -> AppResult<Json<WebhookEndpointResponse>> {
    let mode = query.mode.unwrap_or(app_state.config.default_mode);
    let webhook_endpoint_id = app_state
        .payment_use_cases
        .ensure_webhook_endpoint(mode)
        .await?;
    Ok(Json(WebhookEndpointResponse {
        mode,
        webhook_endpoint_id,
    }))
}

/// POST /api/admin/invoices/{invoice_id}/stripe/refund
async fn refund_invoice(
    State(app_state): State<AppState>,
    Path(invoice_id): Path<i64>,
) -> AppResult<Json<RefundResponse>> {
    let refund = app_state
        .payment_use_cases
        .refund_invoice(invoice_id)
        .await?;
    Ok(Json(RefundResponse {
        invoice_id,
        refund_id: refund.id,
        status: refund.status,
    }))
}

/// POST /api/admin/subscriptions/{subscription_id}/stripe/cancel
async fn cancel_subscription(
    State(app_state): State<AppState>,
    Path(subscription_id): Path<i64>,
) -> AppResult<Json<CancelResponse>> {
    let cancelled = app_state
        .subscription_sync
        .cancel_remote_subscription(subscription_id)
        .await?;
    Ok(Json(CancelResponse {
        subscription_id,
        cancelled: cancelled.is_some(),
        remote_subscription_id: cancelled.map(|remote| remote.id),
    }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/stripe/events/{event_id}/replay", post(replay_event))
        .route(
            "/stripe/subscriptions/check-expired",
            post(check_expired_subscriptions),
        )
        .route("/stripe/webhook-endpoint", post(ensure_webhook_endpoint))
        .route("/invoices/{invoice_id}/stripe/refund", post(refund_invoice))
        .route(
            "/subscriptions/{subscription_id}/stripe/cancel",
            post(cancel_subscription),
        )
}
