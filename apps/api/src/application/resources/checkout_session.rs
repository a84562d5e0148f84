//! Hosted checkout pages, used when the checkout redirect is enabled.

use async_trait::async_trait;
use getpaid_stripe_types::{CheckoutMode, CheckoutSession, to_minor_units};
use serde_json::{Value, json};

use super::{RemoteResource, StripeContext, customer::CustomerResource, product::ProductResource};
use crate::{
    app_error::{AppError, AppResult},
    application::ports::stripe_api::ResourceKind,
    domain::entities::{invoice::Invoice, stripe_mode::StripeMode, subscription::Subscription},
};

pub struct CheckoutSessionResource {
    ctx: StripeContext,
    invoice: Invoice,
    subscriptions: Vec<Subscription>,
}

impl CheckoutSessionResource {
    pub fn new(ctx: &StripeContext, invoice: &Invoice, subscriptions: &[Subscription]) -> Self {
        Self {
            ctx: ctx.clone(),
            invoice: invoice.clone(),
            subscriptions: subscriptions.to_vec(),
        }
    }

    fn id_key(&self) -> String {
        format!("stripe_checkout_session_id_{}", self.invoice.id)
    }

    fn url_key(&self) -> String {
        format!("stripe_checkout_session_url_{}", self.invoice.id)
    }

    /// Cached hosted page url from the last session created for this invoice.
    pub async fn payment_url(&self) -> AppResult<Option<String>> {
        self.ctx.cache.get(&self.url_key()).await
    }

    async fn clear_cache(&self) -> AppResult<()> {
        self.ctx.cache.remove(&self.id_key()).await?;
        self.ctx.cache.remove(&self.url_key()).await
    }

    /// Checkout cannot mix billing intervals or charge a different first amount,
    /// so those invoices only collect a payment method.
    pub fn checkout_mode(&self) -> CheckoutMode {
        match self.subscriptions.as_slice() {
            [] => CheckoutMode::Payment,
            [subscription] if subscription.initial_amount == subscription.recurring_amount => {
                CheckoutMode::Subscription
            }
            _ => CheckoutMode::Setup,
        }
    }

    async fn line_items(&self) -> AppResult<Vec<Value>> {
        let currency = self.invoice.currency.to_lowercase();
        let mut items = Vec::new();

        for subscription in &self.subscriptions {
            let line = subscription
                .item_ids
                .first()
                .and_then(|id| self.invoice.line(*id))
                .ok_or_else(|| {
                    AppError::InvalidInput(format!(
                        "Subscription {} has no billable items",
                        subscription.id
                    ))
                })?;
            let product = ProductResource::new(&self.ctx, self.mode(), line)
                .ensure_id()
                .await?;
            items.push(json!({
                "price_data": {
                    "currency": currency,
                    "product": product,
                    "recurring": {
                        "interval": subscription.period.as_interval(),
                        "interval_count": subscription.frequency,
                    },
                    "unit_amount": to_minor_units(subscription.recurring_amount, &self.invoice.currency),
                },
                "quantity": 1,
            }));
        }

        for line in self.invoice.items.iter().filter(|line| !line.is_recurring) {
            let product = ProductResource::new(&self.ctx, self.mode(), line)
                .ensure_id()
                .await?;
            items.push(json!({
                "price_data": {
                    "currency": currency,
                    "product": product,
                    "unit_amount": to_minor_units(line.unit_price, &self.invoice.currency),
                },
                "quantity": line.quantity,
            }));
        }

        Ok(items)
    }

    /// Creates a fresh session and returns the url to send the customer to.
    pub async fn process(&self) -> AppResult<String> {
        self.clear_cache().await?;
        let session = self.create().await?;
        let url = session.url.clone().ok_or_else(|| AppError::GenericApiError {
            code: "missing_url".into(),
            message: format!("Checkout session {} has no url", session.id),
        })?;

        let ttl = self.ctx.settings.correlation_ttl;
        self.ctx.cache.put(&self.id_key(), &session.id, ttl).await?;
        self.ctx.cache.put(&self.url_key(), &url, ttl).await?;

        tracing::info!(
            invoice_id = self.invoice.id,
            session_id = %session.id,
            mode = %session.mode,
            "Created checkout session"
        );
        Ok(url)
    }
}

#[async_trait]
impl RemoteResource for CheckoutSessionResource {
    type Object = CheckoutSession;

    fn context(&self) -> &StripeContext {
        &self.ctx
    }

    fn mode(&self) -> StripeMode {
        self.invoice.mode
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::CheckoutSessions
    }

    async fn get_remote_id(&self) -> AppResult<Option<String>> {
        self.ctx.cache.get(&self.id_key()).await
    }

    async fn get_args(&self) -> AppResult<Value> {
        let settings = &self.ctx.settings;
        let mode = self.checkout_mode();

        let mut args = json!({
            "mode": mode.as_ref(),
            "success_url": settings.receipt_url(&self.invoice)?.to_string(),
            "cancel_url": settings.checkout_url(&self.invoice)?.to_string(),
            "client_reference_id": self.invoice.id.to_string(),
            "currency": self.invoice.currency.to_lowercase(),
        });

        let customer = CustomerResource::for_invoice(&self.ctx, &self.invoice)
            .get_remote_id()
            .await?;
        match customer {
            Some(customer) => args["customer"] = json!(customer),
            None => args["customer_email"] = json!(self.invoice.customer_email),
        }

        if mode == CheckoutMode::Setup {
            args["payment_method_types"] = json!(settings.payment_method_types(true));
        } else {
            args["line_items"] = json!(self.line_items().await?);
        }

        Ok(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::stripe_api::ApiMethod;
    use crate::test_utils::{
        FakeStripeApi, create_test_invoice, create_test_line, create_test_subscription,
        test_context,
    };
    use rust_decimal::Decimal;
    use std::sync::Arc;

    #[test]
    fn test_checkout_mode_selection() {
        let ctx = test_context(Arc::new(FakeStripeApi::new()));
        let invoice = create_test_invoice(|_| {});
        let same = create_test_subscription(invoice.id, |_| {});
        let different = create_test_subscription(invoice.id, |s| {
            s.initial_amount = Decimal::new(100, 0);
        });

        let mode = |subs: &[Subscription]| {
            CheckoutSessionResource::new(&ctx, &invoice, subs).checkout_mode()
        };
        assert_eq!(mode(&[]), CheckoutMode::Payment);
        assert_eq!(mode(std::slice::from_ref(&same)), CheckoutMode::Subscription);
        assert_eq!(mode(std::slice::from_ref(&different)), CheckoutMode::Setup);
        assert_eq!(mode(&[same.clone(), same]), CheckoutMode::Setup);
    }

    #[tokio::test]
    async fn test_process_creates_session_and_caches_url() {
        let api = Arc::new(FakeStripeApi::new());
        let ctx = test_context(api.clone());
        let invoice = create_test_invoice(|i| {
            i.id = 42;
            i.items[0].quantity = 2;
            i.items[0].is_recurring = false;
        });
        let resource = CheckoutSessionResource::new(&ctx, &invoice, &[]);

        let url = resource.process().await.unwrap();

        assert_eq!(resource.payment_url().await.unwrap(), Some(url));
        let call = api
            .last_call(ResourceKind::CheckoutSessions, ApiMethod::Create)
            .unwrap();
        assert_eq!(call.params["mode"], "payment");
        assert_eq!(call.params["client_reference_id"], "42");
        assert_eq!(call.params["customer_email"], "jane@example.com");
        assert_eq!(call.params["line_items"][0]["quantity"], 2);
        assert_eq!(
            call.params["success_url"],
            "https://shop.example.com/invoices/key_test/receipt"
        );
    }

    #[tokio::test]
    async fn test_setup_mode_sends_payment_methods_instead_of_items() {
        let api = Arc::new(FakeStripeApi::new());
        let ctx = test_context(api.clone());
        let invoice = create_test_invoice(|i| {
            i.is_recurring = true;
            i.items.push(create_test_line(|l| {
                l.item_id = 2;
                l.is_recurring = true;
            }));
        });
        let subs = vec![
            create_test_subscription(invoice.id, |s| s.item_ids = vec![1]),
            create_test_subscription(invoice.id, |s| {
                s.id = 2;
                s.item_ids = vec![2];
            }),
        ];

        CheckoutSessionResource::new(&ctx, &invoice, &subs)
            .process()
            .await
            .unwrap();

        let call = api
            .last_call(ResourceKind::CheckoutSessions, ApiMethod::Create)
            .unwrap();
        assert_eq!(call.params["mode"], "setup");
        assert!(call.params.get("line_items").is_none());
        assert_eq!(call.params["payment_method_types"], json!(["card"]));
    }
}
