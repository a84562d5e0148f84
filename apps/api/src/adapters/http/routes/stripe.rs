//! Endpoints Stripe and the customer's browser call back into.

use super::common::*;
use axum::extract::rejection::BytesRejection;

const SIGNATURE_HEADER: &str = "stripe-signature";

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/stripe/webhook
/// Always answers 200; the body says what happened to the delivery.
async fn handle_webhook(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> impl IntoResponse {
    let body = match body {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!(error = %e, "Unreadable webhook body");
            return (StatusCode::OK, "Invalid payload");
        }
    };
    let body = String::from_utf8_lossy(&body);
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    let reply = app_state
        .webhook_dispatcher
        .handle(&body, signature)
        .await;
    (StatusCode::OK, reply)
}

/// GET /api/stripe/return
/// Landing page for redirect-based payment methods and 3DS challenges.
async fn handle_return(
    State(app_state): State<AppState>,
    Query(params): Query<Vec<(String, String)>>,
) -> AppResult<Redirect> {
    let target = app_state
        .payment_use_cases
        .handle_return(&params)
        .await?;
    Ok(Redirect::to(target.as_str()))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/webhook", post(handle_webhook))
        .route("/return", get(handle_return))
}
