//! Customer-facing checkout routes.

use super::common::*;
use crate::application::use_cases::payment::{
    PaymentMethodUpdate, PaymentOutcome, PaymentSubmission,
};

/// POST /api/invoices/{invoice_id}/stripe/pay
/// Prepares the invoice's intent or checkout session for the payment form.
async fn pay_invoice(
    State(app_state): State<AppState>,
    Path(invoice_id): Path<i64>,
    Json(submission): Json<PaymentSubmission>,
) -> AppResult<Json<PaymentOutcome>> {
    let outcome = app_state
        .payment_use_cases
        .process_payment(invoice_id, submission)
        .await?;
    Ok(Json(outcome))
}

/// POST /api/subscriptions/{subscription_id}/stripe/payment-method
async fn begin_payment_method_update(
    State(app_state): State<AppState>,
    Path(subscription_id): Path<i64>,
) -> AppResult<Json<PaymentMethodUpdate>> {
    let update = app_state
        .payment_use_cases
        .begin_payment_method_update(subscription_id)
        .await?;
    Ok(Json(update))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/invoices/{invoice_id}/stripe/pay", post(pay_invoice))
        .route(
            "/subscriptions/{subscription_id}/stripe/payment-method",
            post(begin_payment_method_update),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::stripe_api::{ApiMethod, ResourceKind};
    use crate::test_utils::{
        TestAppStateBuilder, TestServices, create_test_invoice, create_test_subscription,
    };
    use axum_test::TestServer;
    use rust_decimal::Decimal;
    use serde_json::{Value, json};

    fn build_test_router(app_state: AppState) -> Router<()> {
        router().with_state(app_state)
    }

    fn server_for(services: &TestServices) -> TestServer {
        let app_state = TestAppStateBuilder::new()
            .with_services(services.clone())
            .build();
        TestServer::new(build_test_router(app_state)).unwrap()
    }

    #[tokio::test]
    async fn pay_returns_confirmation_payload() {
        let services = TestServices::new();
        services.invoices.insert(create_test_invoice(|i| i.id = 42));
        let server = server_for(&services);

        let response = server
            .post("/invoices/42/stripe/pay")
            .json(&json!({"form_data": {"company": "Acme"}}))
            .await;

        response.assert_status(StatusCode::OK);
        let body: Value = response.json();
        assert_eq!(body["action"], "confirm");
        assert_eq!(body["is_setup"], false);
        assert_eq!(body["redirect"], "https://shop.example.com/invoices/key_test/receipt");
        assert!(body["intent"].as_str().unwrap().starts_with("pi_"));
        assert_eq!(
            services
                .api
                .count(ResourceKind::PaymentIntents, ApiMethod::Create),
            1
        );
    }

    #[tokio::test]
    async fn pay_unknown_invoice_is_404() {
        let services = TestServices::new();
        let server = server_for(&services);

        let response = server
            .post("/invoices/7/stripe/pay")
            .json(&json!({}))
            .await;

        response.assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn pay_below_minimum_is_rejected_before_calling_stripe() {
        let services = TestServices::new();
        services
            .invoices
            .insert(create_test_invoice(|i| i.total = Decimal::new(20, 2)));
        let server = server_for(&services);

        let response = server.post("/invoices/1/stripe/pay").json(&json!({})).await;

        response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
        let body: Value = response.json();
        assert_eq!(body["code"], "MIN_AMOUNT");
        assert!(services.api.calls().is_empty());
    }

    #[tokio::test]
    async fn payment_method_update_requires_started_subscription() {
        let services = TestServices::new();
        services.invoices.insert(create_test_invoice(|_| {}));
        services
            .subscriptions
            .insert(create_test_subscription(1, |s| s.id = 5));
        let server = server_for(&services);

        let response = server
            .post("/subscriptions/5/stripe/payment-method")
            .await;

        response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
        let body: Value = response.json();
        assert_eq!(body["code"], "SETUP_INTENT_NO_SUBSCRIPTION");
    }
}
