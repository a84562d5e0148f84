use async_trait::async_trait;
use getpaid_stripe_types::{Product, clean_metadata};
use serde_json::{Value, json};

use super::{RemoteResource, StripeContext, without_empty};
use crate::{
    app_error::AppResult,
    application::ports::{
        store::{MetaScope, meta_keys},
        stripe_api::ResourceKind,
    },
    domain::entities::{invoice::InvoiceLine, stripe_mode::StripeMode},
};

/// Stripe product for one invoice item. The remote id is kept per mode on the item.
pub struct ProductResource {
    ctx: StripeContext,
    mode: StripeMode,
    line: InvoiceLine,
}

impl ProductResource {
    pub fn new(ctx: &StripeContext, mode: StripeMode, line: &InvoiceLine) -> Self {
        Self {
            ctx: ctx.clone(),
            mode,
            line: line.clone(),
        }
    }

    fn meta_key(&self) -> &'static str {
        match self.mode {
            StripeMode::Sandbox => meta_keys::SANDBOX_PRODUCT_ID,
            StripeMode::Live => meta_keys::PRODUCT_ID,
        }
    }

    /// Remote product id, creating and remembering the product if needed.
    pub async fn ensure_id(&self) -> AppResult<String> {
        if self.exists().await? {
            return self.require_remote_id().await;
        }

        let product = self.create().await?;
        self.ctx
            .meta
            .set_meta(MetaScope::Item(self.line.item_id), self.meta_key(), &product.id)
            .await?;

        tracing::info!(
            item_id = self.line.item_id,
            product_id = %product.id,
            mode = %self.mode,
            "Created Stripe product"
        );
        Ok(product.id)
    }
}

#[async_trait]
impl RemoteResource for ProductResource {
    type Object = Product;

    fn context(&self) -> &StripeContext {
        &self.ctx
    }

    fn mode(&self) -> StripeMode {
        self.mode
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::Products
    }

    async fn get_remote_id(&self) -> AppResult<Option<String>> {
        Ok(self
            .ctx
            .meta
            .get_meta(MetaScope::Item(self.line.item_id), self.meta_key())
            .await?
            .filter(|id| !id.is_empty()))
    }

    async fn get_args(&self) -> AppResult<Value> {
        Ok(without_empty(json!({
            "name": self.line.name,
            "description": self.line.description.as_deref().unwrap_or_default().trim(),
            "metadata": clean_metadata([("item_id", self.line.item_id.to_string())]),
        })))
    }
}
