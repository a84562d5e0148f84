//! One-off invoice items that carry a subscription's setup fee.

use async_trait::async_trait;
use getpaid_stripe_types::InvoiceItem;
use serde_json::{Value, json};

use super::{RemoteResource, StripeContext, without_empty};
use crate::{
    app_error::AppResult,
    application::ports::{
        store::{MetaScope, meta_keys},
        stripe_api::{ApiRequest, ResourceKind, decode},
    },
    domain::entities::{invoice::Invoice, stripe_mode::StripeMode},
};

pub struct InvoiceItemResource {
    ctx: StripeContext,
    invoice: Invoice,
}

impl InvoiceItemResource {
    pub fn new(ctx: &StripeContext, invoice: &Invoice) -> Self {
        Self {
            ctx: ctx.clone(),
            invoice: invoice.clone(),
        }
    }

    fn scope(&self) -> MetaScope {
        MetaScope::Invoice(self.invoice.id)
    }

    /// Adds a pending item to the customer's next remote invoice and remembers its id.
    pub async fn save_item(
        &self,
        amount: i64,
        customer_id: &str,
        description: Option<&str>,
    ) -> AppResult<InvoiceItem> {
        let args = without_empty(json!({
            "amount": amount,
            "currency": self.invoice.currency.to_lowercase(),
            "customer": customer_id,
            "description": description,
        }));

        let item: InvoiceItem = decode(self.call(ApiRequest::create(self.kind(), args)).await?)?;
        self.ctx
            .meta
            .set_meta(self.scope(), meta_keys::INVOICE_ITEM_ID, &item.id)
            .await?;
        Ok(item)
    }

    /// Deletes the stored item. Returns `false` when none was saved.
    pub async fn delete(&self) -> AppResult<bool> {
        let Some(id) = self.get_remote_id().await? else {
            return Ok(false);
        };

        self.call(ApiRequest::delete(self.kind(), &id)).await?;
        self.ctx
            .meta
            .delete_meta(self.scope(), meta_keys::INVOICE_ITEM_ID)
            .await?;
        Ok(true)
    }
}

#[async_trait]
impl RemoteResource for InvoiceItemResource {
    type Object = InvoiceItem;

    fn context(&self) -> &StripeContext {
        &self.ctx
    }

    fn mode(&self) -> StripeMode {
        self.invoice.mode
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::InvoiceItems
    }

    async fn get_remote_id(&self) -> AppResult<Option<String>> {
        Ok(self
            .ctx
            .meta
            .get_meta(self.scope(), meta_keys::INVOICE_ITEM_ID)
            .await?
            .filter(|id| !id.is_empty()))
    }

    async fn get_args(&self) -> AppResult<Value> {
        Ok(json!({ "currency": self.invoice.currency.to_lowercase() }))
    }
}
