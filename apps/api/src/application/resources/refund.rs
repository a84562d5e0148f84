use async_trait::async_trait;
use getpaid_stripe_types::{ObjectKind, Refund};
use serde_json::{Value, json};

use super::{RemoteResource, StripeContext};
use crate::{
    app_error::{AppError, AppResult},
    application::ports::stripe_api::ResourceKind,
    domain::entities::{invoice::Invoice, stripe_mode::StripeMode},
};

/// Refund of an invoice's recorded transaction.
pub struct RefundResource {
    ctx: StripeContext,
    invoice: Invoice,
}

impl RefundResource {
    pub fn new(ctx: &StripeContext, invoice: &Invoice) -> Self {
        Self {
            ctx: ctx.clone(),
            invoice: invoice.clone(),
        }
    }
}

#[async_trait]
impl RemoteResource for RefundResource {
    type Object = Refund;

    fn context(&self) -> &StripeContext {
        &self.ctx
    }

    fn mode(&self) -> StripeMode {
        self.invoice.mode
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::Refunds
    }

    // Refunds are only ever created.
    async fn get_remote_id(&self) -> AppResult<Option<String>> {
        Ok(None)
    }

    async fn get_args(&self) -> AppResult<Value> {
        let transaction_id = self
            .invoice
            .transaction_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                AppError::InvalidInput(format!("Invoice {} has no transaction", self.invoice.id))
            })?;

        match ObjectKind::of(transaction_id) {
            ObjectKind::PaymentIntent => Ok(json!({ "payment_intent": transaction_id })),
            ObjectKind::Charge => Ok(json!({ "charge": transaction_id })),
            _ => Err(AppError::InvalidInput(format!(
                "Transaction {transaction_id} cannot be refunded remotely"
            ))),
        }
    }
}
