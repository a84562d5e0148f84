use std::collections::BTreeMap;
use std::sync::Arc;

use getpaid_stripe_types::{Intent, Refund, minimum_amount};
use serde::{Deserialize, Serialize};
use url::Url;

use super::reconciliation::ReconciliationEngine;
use crate::{
    app_error::{AppError, AppResult},
    application::{
        ports::store::{InvoiceRepo, MetaScope, SubscriptionRepo, meta_keys},
        resources::{
            RemoteResource, StripeContext, checkout_session::CheckoutSessionResource,
            intent::IntentResource, refund::RefundResource, setup_intent::SetupIntentResource,
            webhook_endpoint::WebhookEndpointResource,
        },
    },
    domain::entities::{
        invoice::{Invoice, InvoiceStatus},
        stripe_mode::StripeMode,
        subscription::Subscription,
    },
};

/// Query parameters Stripe appends to a redirect return.
const PROVIDER_PARAMS: [&str; 5] = [
    "payment_intent",
    "payment_intent_client_secret",
    "setup_intent",
    "setup_intent_client_secret",
    "redirect_status",
];

/// Parameters that select the return flow and are consumed by it.
const ROUTING_PARAMS: [&str; 2] = ["invoice_key", "subscription"];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymentSubmission {
    /// Checkout form fields, forwarded to Stripe as metadata.
    #[serde(default)]
    pub form_data: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PaymentOutcome {
    /// Send the customer to a hosted checkout page.
    Redirect { url: String },
    /// Confirm the intent client-side, then continue to `redirect`.
    Confirm {
        intent: String,
        redirect: String,
        is_setup: bool,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentMethodUpdate {
    pub subscription_id: i64,
    pub client_secret: String,
}

pub struct PaymentUseCases {
    ctx: StripeContext,
    invoices: Arc<dyn InvoiceRepo>,
    subscriptions: Arc<dyn SubscriptionRepo>,
    engine: Arc<ReconciliationEngine>,
}

impl PaymentUseCases {
    pub fn new(
        ctx: StripeContext,
        invoices: Arc<dyn InvoiceRepo>,
        subscriptions: Arc<dyn SubscriptionRepo>,
        engine: Arc<ReconciliationEngine>,
    ) -> Self {
        Self {
            ctx,
            invoices,
            subscriptions,
            engine,
        }
    }

    async fn invoice(&self, id: i64) -> AppResult<Invoice> {
        self.invoices.get_by_id(id).await?.ok_or(AppError::NotFound)
    }

    async fn subscription(&self, id: i64) -> AppResult<Subscription> {
        self.subscriptions
            .get_by_id(id)
            .await?
            .ok_or(AppError::NotFound)
    }

    // ========================================================================
    // Checkout
    // ========================================================================

    pub async fn process_payment(
        &self,
        invoice_id: i64,
        submission: PaymentSubmission,
    ) -> AppResult<PaymentOutcome> {
        let mut invoice = self.invoice(invoice_id).await?;
        if invoice.is_paid() {
            return Err(AppError::InvalidInput("Invoice is already paid".into()));
        }
        check_minimum_amount(&invoice)?;

        for (key, value) in submission.form_data {
            invoice.metadata.entry(key).or_insert(value);
        }

        if self.ctx.settings.checkout_redirect {
            let subscriptions = self.subscriptions.list_by_invoice(invoice.id).await?;
            let url = CheckoutSessionResource::new(&self.ctx, &invoice, &subscriptions)
                .process()
                .await?;
            return Ok(PaymentOutcome::Redirect { url });
        }

        let intent = IntentResource::for_invoice(&self.ctx, &invoice)
            .update()
            .await?;
        let intent_id = intent.id().to_string();

        self.invoices
            .add_note(invoice.id, &format!("Stripe Payment Intent ID: {intent_id}"), false)
            .await?;
        self.invoices
            .set_transaction_id(invoice.id, &intent_id)
            .await?;

        let scope = MetaScope::Invoice(invoice.id);
        self.ctx
            .meta
            .set_meta(scope, meta_keys::INTENT_ID, &intent_id)
            .await?;
        self.ctx
            .meta
            .set_meta(scope, meta_keys::PROCESS_INTENT, "1")
            .await?;

        tracing::info!(invoice_id = invoice.id, intent_id, "Payment intent ready");
        Ok(PaymentOutcome::Confirm {
            redirect: self.ctx.settings.receipt_url(&invoice)?.to_string(),
            is_setup: intent.is_setup(),
            intent: intent_id,
        })
    }

    // ========================================================================
    // Redirect returns
    // ========================================================================

    /// Applies a redirect return and gives the url to send the customer on to.
    ///
    /// Stripe's own query parameters are dropped; any others are kept.
    pub async fn handle_return(&self, params: &[(String, String)]) -> AppResult<Url> {
        let param = |name: &str| {
            params
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.as_str())
                .filter(|value| !value.is_empty())
        };

        let mut target = match (
            param("payment_intent"),
            param("setup_intent"),
            param("invoice_key"),
            param("subscription"),
        ) {
            (Some(intent_id), _, Some(key), _) => self.return_from_payment(intent_id, key).await?,
            (None, Some(intent_id), Some(key), _) => self.return_from_setup(intent_id, key).await?,
            (None, Some(intent_id), None, Some(subscription)) => {
                let subscription_id = subscription
                    .parse()
                    .map_err(|_| AppError::InvalidInput("Invalid subscription id".into()))?;
                self.return_from_payment_method_update(intent_id, subscription_id)
                    .await?
            }
            _ => return Err(AppError::InvalidInput("Unrecognized return parameters".into())),
        };

        let kept = params
            .iter()
            .filter(|(key, _)| !PROVIDER_PARAMS.contains(&key.as_str()))
            .filter(|(key, _)| !ROUTING_PARAMS.contains(&key.as_str()));
        let mut kept = kept.peekable();
        if kept.peek().is_some() {
            target.query_pairs_mut().extend_pairs(kept);
        }
        Ok(target)
    }

    async fn invoice_by_key(&self, key: &str) -> AppResult<Invoice> {
        self.invoices.get_by_key(key).await?.ok_or(AppError::NotFound)
    }

    async fn return_from_payment(&self, intent_id: &str, invoice_key: &str) -> AppResult<Url> {
        let invoice = self.invoice_by_key(invoice_key).await?;
        self.ctx
            .meta
            .set_meta(MetaScope::Invoice(invoice.id), meta_keys::PROCESS_INTENT, "1")
            .await?;

        let processed = async {
            match IntentResource::with_id(&self.ctx, &invoice, intent_id).get().await? {
                Intent::Payment(intent) => self.engine.process_payment_intent(&intent, None).await,
                Intent::Setup(_) => Err(AppError::InvalidInput("Expected a payment intent".into())),
            }
        }
        .await;
        if let Err(e) = processed {
            return self.checkout_with_error(&invoice, &e);
        }

        let invoice = self.invoice(invoice.id).await?;
        match invoice.status {
            InvoiceStatus::Paid | InvoiceStatus::Processing | InvoiceStatus::OnHold => {
                self.ctx.settings.receipt_url(&invoice)
            }
            _ => self.ctx.settings.checkout_url(&invoice),
        }
    }

    async fn return_from_setup(&self, intent_id: &str, invoice_key: &str) -> AppResult<Url> {
        let invoice = self.invoice_by_key(invoice_key).await?;

        let processed = async {
            match IntentResource::with_id(&self.ctx, &invoice, intent_id).get().await? {
                Intent::Setup(intent) => {
                    self.engine
                        .process_setup_intent(&intent, Some(&invoice))
                        .await
                }
                Intent::Payment(_) => Err(AppError::InvalidInput("Expected a setup intent".into())),
            }
        }
        .await;
        if let Err(e) = processed {
            return self.checkout_with_error(&invoice, &e);
        }

        self.ctx.settings.receipt_url(&invoice)
    }

    async fn return_from_payment_method_update(
        &self,
        intent_id: &str,
        subscription_id: i64,
    ) -> AppResult<Url> {
        let subscription = self.subscription(subscription_id).await?;
        let invoice = self.invoice(subscription.parent_invoice_id).await?;
        let resource = SetupIntentResource::new(&self.ctx, &subscription, &invoice);

        let mut target = self.ctx.settings.subscription_url(subscription.id)?;
        let outcome = match resource.get_remote_id().await? {
            Some(cached) if cached != intent_id => Err(AppError::SetupIntentNotFound),
            _ => resource.process().await.map(|_| ()),
        };

        match outcome {
            Ok(()) => {
                tracing::info!(subscription_id, "Payment method updated");
                target
                    .query_pairs_mut()
                    .append_pair("payment_method_updated", "1");
            }
            Err(e) => {
                tracing::warn!(subscription_id, error = %e, "Payment method update failed");
                target
                    .query_pairs_mut()
                    .append_pair("error", &e.user_message());
            }
        }
        Ok(target)
    }

    fn checkout_with_error(&self, invoice: &Invoice, error: &AppError) -> AppResult<Url> {
        tracing::warn!(invoice_id = invoice.id, error = %error, "Failed to apply redirect return");
        let mut url = self.ctx.settings.checkout_url(invoice)?;
        url.query_pairs_mut()
            .append_pair("error", &error.user_message());
        Ok(url)
    }

    // ========================================================================
    // Subscriptions & admin
    // ========================================================================

    /// Client secret for the form that replaces a subscription's card.
    pub async fn begin_payment_method_update(
        &self,
        subscription_id: i64,
    ) -> AppResult<PaymentMethodUpdate> {
        let subscription = self.subscription(subscription_id).await?;
        if subscription.profile_id.as_deref().is_none_or(str::is_empty) {
            return Err(AppError::SetupIntentNoSubscription);
        }
        let invoice = self.invoice(subscription.parent_invoice_id).await?;

        let client_secret = SetupIntentResource::new(&self.ctx, &subscription, &invoice)
            .begin()
            .await?;
        Ok(PaymentMethodUpdate {
            subscription_id,
            client_secret,
        })
    }

    /// Refunds the invoice's payment in Stripe and notes the result on the invoice.
    pub async fn refund_invoice(&self, invoice_id: i64) -> AppResult<Refund> {
        let invoice = self.invoice(invoice_id).await?;

        match RefundResource::new(&self.ctx, &invoice).create().await {
            Ok(refund) => {
                self.invoices
                    .add_note(
                        invoice.id,
                        &format!(
                            "Successfully refunded invoice #{} in Stripe. Refund ID: {}",
                            invoice.number, refund.id
                        ),
                        false,
                    )
                    .await?;
                tracing::info!(invoice_id, refund_id = %refund.id, "Refund created");
                Ok(refund)
            }
            Err(e) => {
                self.invoices
                    .add_note(
                        invoice.id,
                        &format!(
                            "An error occured while trying to refund invoice #{} in Stripe: {}",
                            invoice.number,
                            e.user_message()
                        ),
                        false,
                    )
                    .await?;
                Err(e)
            }
        }
    }

    /// Registers this site's webhook endpoint with Stripe, returning its id.
    pub async fn ensure_webhook_endpoint(&self, mode: StripeMode) -> AppResult<String> {
        WebhookEndpointResource::new(&self.ctx, mode).ensure().await
    }
}

fn check_minimum_amount(invoice: &Invoice) -> AppResult<()> {
    let minimum = minimum_amount(&invoice.currency);
    let below = |amount| amount < minimum;

    if (!invoice.has_free_trial && below(invoice.total))
        || (invoice.is_recurring && below(invoice.recurring_total))
    {
        return Err(AppError::MinAmount {
            minimum: minimum.to_string(),
            currency: invoice.currency.to_uppercase(),
        });
    }
    Ok(())
}
