//! Starting remote subscriptions for an invoice's subscription group, and the
//! admin tools that keep local subscriptions in line with Stripe.

use std::sync::Arc;

use getpaid_stripe_types::{
    Intent, PaymentIntent, PaymentIntentStatus, Subscription as RemoteSubscription,
};
use serde::Serialize;

use crate::{
    app_error::{AppError, AppResult},
    application::{
        ports::store::{InvoiceRepo, MetaScope, SubscriptionRepo, meta_keys},
        resources::{
            RemoteResource, StripeContext, intent::IntentResource,
            invoice_item::InvoiceItemResource, subscription::SubscriptionResource,
        },
    },
    domain::entities::{
        invoice::{Invoice, InvoiceStatus},
        subscription::{Subscription, SubscriptionStatus},
    },
};

const SETUP_FEE_DESCRIPTION: &str = "Misc";

/// What happened to one group member after its remote subscription was created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StartOutcome {
    Active,
    /// The first charge needs the customer, e.g. for 3D Secure.
    RequiresAction { client_secret: String },
    /// The first charge is still being confirmed by the bank.
    Processing,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GroupStart {
    pub started: usize,
    pub failed: usize,
    pub processing: bool,
    /// Set when a member stopped the run waiting on the customer.
    pub requires_action: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExpiredCheckReport {
    pub checked: usize,
    pub reactivated: usize,
    pub errors: usize,
}

pub struct SubscriptionSync {
    ctx: StripeContext,
    invoices: Arc<dyn InvoiceRepo>,
    subscriptions: Arc<dyn SubscriptionRepo>,
}

impl SubscriptionSync {
    pub fn new(
        ctx: StripeContext,
        invoices: Arc<dyn InvoiceRepo>,
        subscriptions: Arc<dyn SubscriptionRepo>,
    ) -> Self {
        Self {
            ctx,
            invoices,
            subscriptions,
        }
    }

    /// Starts every subscription billed by `invoice`.
    pub async fn process_invoice_subscriptions(
        &self,
        invoice: &Invoice,
        initial_payment_taken: bool,
    ) -> AppResult<GroupStart> {
        let subscriptions = self.subscriptions.list_by_invoice(invoice.id).await?;
        if subscriptions.is_empty() {
            tracing::debug!(invoice_id = invoice.id, "Invoice has no subscriptions");
            return Ok(GroupStart::default());
        }
        self.process_subscriptions(invoice, &subscriptions, initial_payment_taken)
            .await
    }

    /// Creates one remote subscription per member.
    ///
    /// The first member carries the invoice's one-off charges; the last one
    /// settles the invoice. Once the initial payment was taken, member
    /// failures are logged and skipped since the funds are already captured.
    pub async fn process_subscriptions(
        &self,
        invoice: &Invoice,
        subscriptions: &[Subscription],
        initial_payment_taken: bool,
    ) -> AppResult<GroupStart> {
        let mut report = GroupStart::default();
        let last = subscriptions.len().saturating_sub(1);

        for (index, subscription) in subscriptions.iter().enumerate() {
            let result = self
                .start_subscription(
                    invoice,
                    subscription,
                    index == 0,
                    index == last,
                    initial_payment_taken,
                )
                .await;

            match result {
                Ok(StartOutcome::Active) => report.started += 1,
                Ok(StartOutcome::Processing) => {
                    report.started += 1;
                    report.processing = true;
                }
                Ok(StartOutcome::RequiresAction { client_secret }) => {
                    report.requires_action = Some(client_secret);
                    return Ok(report);
                }
                Err(e) if initial_payment_taken => {
                    tracing::error!(
                        invoice_id = invoice.id,
                        subscription_id = subscription.id,
                        error = %e,
                        "Failed to start subscription after initial payment"
                    );
                    report.failed += 1;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(report)
    }

    pub async fn start_subscription(
        &self,
        invoice: &Invoice,
        subscription: &Subscription,
        is_first: bool,
        is_last: bool,
        initial_payment_taken: bool,
    ) -> AppResult<StartOutcome> {
        let resource = SubscriptionResource::new(&self.ctx, subscription, invoice)
            .with_initial_payment_processed(initial_payment_taken);
        let args = resource.build_args(is_first).await?;

        let invoice_item = InvoiceItemResource::new(&self.ctx, invoice);
        if is_first && let Some(fee) = args.setup_fee {
            invoice_item
                .save_item(fee, &args.customer_id, Some(SETUP_FEE_DESCRIPTION))
                .await?;
        }

        let remote = match resource.create_with(&args).await {
            Ok(remote) => remote,
            Err(e) => {
                if !initial_payment_taken
                    && let Err(cleanup) = invoice_item.delete().await
                {
                    tracing::warn!(
                        invoice_id = invoice.id,
                        error = %cleanup,
                        "Failed to delete setup fee invoice item"
                    );
                }
                return Err(e);
            }
        };

        self.subscriptions
            .set_profile_id(subscription.id, &remote.id)
            .await?;
        tracing::info!(
            subscription_id = subscription.id,
            remote_subscription_id = %remote.id,
            status = %remote.status,
            "Created remote subscription"
        );

        if remote.status.is_live() {
            self.activate_subscription(subscription.id, &remote).await?;
            if is_last {
                self.invoices
                    .set_remote_subscription_id(invoice.id, &remote.id)
                    .await?;
                if !initial_payment_taken {
                    if let Some(charge) = remote
                        .latest_invoice_object()
                        .and_then(|i| i.charge.as_deref())
                        .filter(|c| !c.is_empty())
                    {
                        self.invoices.set_transaction_id(invoice.id, charge).await?;
                    }
                    if !invoice.is_paid() {
                        self.invoices.mark_paid(invoice.id).await?;
                    }
                }
            }
            return Ok(StartOutcome::Active);
        }

        let Some(intent) = remote
            .latest_invoice_object()
            .and_then(|i| i.payment_intent_object())
            .cloned()
        else {
            return Err(AppError::GenericApiError {
                code: "intent_error".into(),
                message: "Payment Intent creation failed while creating your subscription.".into(),
            });
        };

        self.handle_subscription_intent(invoice, subscription.id, &remote, intent, is_last)
            .await
    }

    async fn handle_subscription_intent(
        &self,
        invoice: &Invoice,
        subscription_id: i64,
        remote: &RemoteSubscription,
        mut intent: PaymentIntent,
        is_last: bool,
    ) -> AppResult<StartOutcome> {
        self.ctx
            .meta
            .set_meta(MetaScope::Invoice(invoice.id), meta_keys::INTENT_ID, &intent.id)
            .await?;

        if intent.last_payment_error.is_none()
            && matches!(
                intent.status,
                PaymentIntentStatus::RequiresConfirmation | PaymentIntentStatus::RequiresPaymentMethod
            )
        {
            match IntentResource::with_id(&self.ctx, invoice, &intent.id)
                .confirm(None)
                .await?
            {
                Intent::Payment(confirmed) => intent = confirmed,
                Intent::Setup(si) => {
                    return Err(AppError::GenericApiError {
                        code: "invalid_response".into(),
                        message: format!("Expected a payment intent, got {}", si.id),
                    });
                }
            }
        }

        if let Some(error) = &intent.last_payment_error {
            tracing::warn!(
                invoice_id = invoice.id,
                intent_id = %intent.id,
                code = error.code_or_type(),
                "Subscription payment failed"
            );
            return Err(AppError::GenericApiError {
                code: "payment_intent_last_payment_error".into(),
                message: error.message.clone().unwrap_or_default(),
            });
        }

        match intent.status {
            PaymentIntentStatus::RequiresAction => Ok(StartOutcome::RequiresAction {
                client_secret: intent.client_secret.clone().unwrap_or_default(),
            }),
            PaymentIntentStatus::Processing => {
                self.invoices
                    .set_status(invoice.id, InvoiceStatus::OnHold)
                    .await?;
                Ok(StartOutcome::Processing)
            }
            PaymentIntentStatus::Succeeded => {
                self.activate_subscription(subscription_id, remote).await?;
                if is_last {
                    let transaction_id = intent.latest_charge_id().unwrap_or(&intent.id);
                    self.invoices
                        .set_remote_subscription_id(invoice.id, &remote.id)
                        .await?;
                    self.invoices
                        .record_payment(
                            invoice.id,
                            transaction_id,
                            &format!("Stripe Charge ID: {transaction_id}"),
                        )
                        .await?;
                }
                Ok(StartOutcome::Active)
            }
            _ => Err(AppError::invalid_argument(
                "Please try again with a different payment method.",
            )),
        }
    }

    /// Copies the remote billing period onto the local subscription and activates it.
    pub async fn activate_subscription(
        &self,
        subscription_id: i64,
        remote: &RemoteSubscription,
    ) -> AppResult<()> {
        self.subscriptions
            .set_dates(subscription_id, remote.period_start(), remote.period_end())
            .await?;
        self.subscriptions
            .set_profile_id(subscription_id, &remote.id)
            .await?;
        self.subscriptions.activate(subscription_id).await
    }

    /// Cancels the remote subscription behind a local one. `None` when it was never started.
    pub async fn cancel_remote_subscription(
        &self,
        subscription_id: i64,
    ) -> AppResult<Option<RemoteSubscription>> {
        let subscription = self
            .subscriptions
            .get_by_id(subscription_id)
            .await?
            .ok_or(AppError::NotFound)?;
        if subscription.profile_id.as_deref().is_none_or(str::is_empty) {
            return Ok(None);
        }
        let invoice = self
            .invoices
            .get_by_id(subscription.parent_invoice_id)
            .await?
            .ok_or(AppError::NotFound)?;

        let cancelled = SubscriptionResource::new(&self.ctx, &subscription, &invoice)
            .cancel()
            .await?;
        tracing::info!(
            subscription_id,
            remote_subscription_id = %cancelled.id,
            "Cancelled remote subscription"
        );
        Ok(Some(cancelled))
    }

    /// Re-activates failing or expired subscriptions that are still live in Stripe.
    pub async fn check_expired_subscriptions(&self) -> AppResult<ExpiredCheckReport> {
        let candidates = self
            .subscriptions
            .list_by_status(&[SubscriptionStatus::Failing, SubscriptionStatus::Expired])
            .await?;
        let mut report = ExpiredCheckReport::default();

        for subscription in candidates.iter().filter(|s| {
            s.profile_id.as_deref().is_some_and(|id| !id.is_empty())
        }) {
            report.checked += 1;
            let Some(invoice) = self.invoices.get_by_id(subscription.parent_invoice_id).await?
            else {
                continue;
            };

            let remote = match SubscriptionResource::new(&self.ctx, subscription, &invoice)
                .get()
                .await
            {
                Ok(remote) => remote,
                Err(e) => {
                    tracing::warn!(
                        subscription_id = subscription.id,
                        error = %e,
                        "Failed to fetch remote subscription"
                    );
                    report.errors += 1;
                    continue;
                }
            };

            if remote.status.is_live() {
                if let Some(renews) = remote.period_end() {
                    self.subscriptions
                        .set_expiration(subscription.id, renews)
                        .await?;
                }
                self.subscriptions.activate(subscription.id).await?;
                report.reactivated += 1;
            }
        }

        tracing::info!(
            checked = report.checked,
            reactivated = report.reactivated,
            errors = report.errors,
            "Checked expired subscriptions"
        );
        Ok(report)
    }
}
