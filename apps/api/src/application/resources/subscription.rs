use async_trait::async_trait;
use chrono::{Duration, Utc};
use getpaid_stripe_types::{Subscription as RemoteSubscription, to_minor_units};
use rust_decimal::Decimal;
use serde_json::{Value, json};

use super::{
    RemoteResource, StripeContext, customer::CustomerResource, invoice_metadata,
    product::ProductResource,
};
use crate::{
    app_error::{AppError, AppResult},
    application::ports::{
        store::{MetaScope, meta_keys},
        stripe_api::{ApiRequest, ResourceKind, decode},
    },
    domain::entities::{invoice::Invoice, stripe_mode::StripeMode, subscription::Subscription},
};

/// Create payload for a remote subscription plus what must be billed on top of it.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionArgs {
    pub params: Value,
    pub customer_id: String,
    /// Difference between the first and recurring charge, billed as a one-off invoice item.
    pub setup_fee: Option<i64>,
}

pub struct SubscriptionResource {
    ctx: StripeContext,
    subscription: Subscription,
    invoice: Invoice,
    initial_payment_processed: bool,
}

impl SubscriptionResource {
    /// `invoice` is the subscription's parent invoice.
    pub fn new(ctx: &StripeContext, subscription: &Subscription, invoice: &Invoice) -> Self {
        Self {
            ctx: ctx.clone(),
            subscription: subscription.clone(),
            invoice: invoice.clone(),
            initial_payment_processed: false,
        }
    }

    /// Marks the first charge as already taken by a payment intent.
    pub fn with_initial_payment_processed(mut self, processed: bool) -> Self {
        self.initial_payment_processed = processed;
        self
    }

    fn minor(&self, amount: Decimal) -> i64 {
        to_minor_units(amount, &self.invoice.currency)
    }

    fn non_recurring_total(&self) -> Decimal {
        self.invoice
            .items
            .iter()
            .filter(|line| !line.is_recurring)
            .map(|line| line.line_total())
            .sum()
    }

    async fn price_items(&self, recurring_amount: i64) -> AppResult<Vec<Value>> {
        let recurring = json!({
            "interval": self.subscription.period.as_interval(),
            "interval_count": self.subscription.frequency,
        });
        let currency = self.invoice.currency.to_lowercase();

        let lines: Vec<_> = self
            .subscription
            .item_ids
            .iter()
            .filter_map(|id| self.invoice.line(*id))
            .collect();
        if lines.is_empty() {
            return Err(AppError::InvalidInput(format!(
                "Subscription {} has no billable items",
                self.subscription.id
            )));
        }

        let mut items = Vec::with_capacity(lines.len());
        if let [line] = lines.as_slice() {
            let product = ProductResource::new(&self.ctx, self.mode(), line)
                .ensure_id()
                .await?;
            items.push(json!({
                "price_data": {
                    "currency": currency,
                    "product": product,
                    "recurring": recurring,
                    "unit_amount": recurring_amount,
                },
            }));
        } else {
            for line in lines {
                let product = ProductResource::new(&self.ctx, self.mode(), line)
                    .ensure_id()
                    .await?;
                items.push(json!({
                    "price_data": {
                        "currency": currency,
                        "product": product,
                        "recurring": recurring,
                        "unit_amount": self.minor(line.line_total()),
                    },
                }));
            }
        }
        Ok(items)
    }

    /// Builds the create payload. `is_first` adds the invoice's one-off items to the first charge.
    pub async fn build_args(&self, is_first: bool) -> AppResult<SubscriptionArgs> {
        let subscription = &self.subscription;
        let customer_id = CustomerResource::for_invoice(&self.ctx, &self.invoice)
            .resolve_id()
            .await?;

        let recurring_amount = self.minor(subscription.recurring_amount);
        let initial_amount = if self.initial_payment_processed {
            0
        } else if is_first {
            self.minor(subscription.initial_amount + self.non_recurring_total())
        } else {
            self.minor(subscription.initial_amount)
        };

        let subscription_url = self.ctx.settings.subscription_url(subscription.id)?;
        let metadata = invoice_metadata(
            &self.invoice,
            &self.ctx.settings,
            [
                ("subscription_id", subscription.id.to_string()),
                ("subscription_url", subscription_url.to_string()),
            ],
        )?;

        let mut params = json!({
            "customer": customer_id,
            "items": self.price_items(recurring_amount).await?,
            "metadata": metadata,
            "off_session": true,
            "expand": ["latest_invoice.payment_intent", "pending_setup_intent"],
        });

        if let Some(pm) = self
            .ctx
            .meta
            .get_meta(MetaScope::Invoice(self.invoice.id), meta_keys::PAYMENT_PROFILE_ID)
            .await?
            .filter(|pm| !pm.is_empty())
        {
            params["default_payment_method"] = json!(pm);
        }

        let mut trial_end = None;
        if subscription.is_trialing
            && let Some(expiration) = subscription.expiration
        {
            trial_end = Some(expiration);
            params["trial_end"] = json!(expiration.timestamp());
        } else if self.initial_payment_processed
            && let Some(expiration) = subscription.expiration
        {
            params["billing_cycle_anchor"] = json!((expiration - Duration::hours(1)).timestamp());
            params["proration_behavior"] = json!("none");
        }

        if subscription.bill_times > 0 {
            let periods = u32::try_from(subscription.bill_times * subscription.frequency.max(1))
                .map_err(|_| AppError::InvalidInput("Invalid subscription length".into()))?;
            let base = trial_end.unwrap_or_else(Utc::now);
            if let Some(ends) = subscription.period.advance(base, periods) {
                params["cancel_at"] = json!((ends - Duration::hours(1)).timestamp());
            }
        }

        let setup_fee = (initial_amount != 0 && initial_amount != recurring_amount)
            .then_some(initial_amount - recurring_amount);

        Ok(SubscriptionArgs {
            params,
            customer_id,
            setup_fee,
        })
    }

    pub async fn create_with(&self, args: &SubscriptionArgs) -> AppResult<RemoteSubscription> {
        decode(
            self.call(ApiRequest::create(self.kind(), args.params.clone()))
                .await?,
        )
    }

    pub async fn cancel(&self) -> AppResult<RemoteSubscription> {
        let id = self.require_remote_id().await?;
        decode(self.call(ApiRequest::cancel(self.kind(), &id)).await?)
    }

    pub async fn update_payment_method(&self, payment_method: &str) -> AppResult<RemoteSubscription> {
        let id = self.require_remote_id().await?;
        decode(
            self.call(ApiRequest::update(
                self.kind(),
                &id,
                json!({ "default_payment_method": payment_method }),
            ))
            .await?,
        )
    }
}

#[async_trait]
impl RemoteResource for SubscriptionResource {
    type Object = RemoteSubscription;

    fn context(&self) -> &StripeContext {
        &self.ctx
    }

    fn mode(&self) -> StripeMode {
        self.invoice.mode
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::Subscriptions
    }

    async fn get_remote_id(&self) -> AppResult<Option<String>> {
        Ok(self
            .subscription
            .profile_id
            .clone()
            .filter(|id| !id.is_empty()))
    }

    async fn get_args(&self) -> AppResult<Value> {
        Ok(self.build_args(false).await?.params)
    }
}
