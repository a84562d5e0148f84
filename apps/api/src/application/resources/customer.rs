use async_trait::async_trait;
use getpaid_stripe_types::{Customer, List, clean_metadata};
use serde_json::{Value, json};

use super::{RemoteResource, StripeContext, without_empty};
use crate::{
    app_error::AppResult,
    application::ports::stripe_api::{ApiRequest, ResourceKind, decode},
    domain::entities::{invoice::Invoice, stripe_mode::StripeMode},
};

/// Stripe customer, identified by email.
pub struct CustomerResource {
    ctx: StripeContext,
    mode: StripeMode,
    email: String,
    name: String,
    user_id: Option<i64>,
}

impl CustomerResource {
    pub fn for_invoice(ctx: &StripeContext, invoice: &Invoice) -> Self {
        Self {
            ctx: ctx.clone(),
            mode: invoice.mode,
            email: invoice.customer_email.trim().to_string(),
            name: invoice.customer_name.clone(),
            user_id: invoice.customer_user_id,
        }
    }

    fn cache_key(&self) -> String {
        format!("{}:{}", self.mode, self.email.to_lowercase())
    }

    /// The existing customer id, creating the customer when there is none.
    pub async fn resolve_id(&self) -> AppResult<String> {
        if let Some(id) = self.get_remote_id().await? {
            return Ok(id);
        }

        let customer = self.create().await?;
        tracing::info!(customer_id = %customer.id, mode = %self.mode, "Created Stripe customer");
        self.ctx
            .customers
            .insert(self.cache_key(), customer.id.clone())
            .await;
        Ok(customer.id)
    }
}

#[async_trait]
impl RemoteResource for CustomerResource {
    type Object = Customer;

    fn context(&self) -> &StripeContext {
        &self.ctx
    }

    fn mode(&self) -> StripeMode {
        self.mode
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::Customers
    }

    async fn get_remote_id(&self) -> AppResult<Option<String>> {
        if self.email.is_empty() {
            return Ok(None);
        }

        let key = self.cache_key();
        if let Some(id) = self.ctx.customers.get(&key).await {
            return Ok(Some(id));
        }

        let found: List<Customer> = decode(
            self.call(ApiRequest::all(
                self.kind(),
                json!({ "email": self.email, "limit": 1 }),
            ))
            .await?,
        )?;

        let id = found
            .data
            .into_iter()
            .find(|customer| !customer.deleted)
            .map(|customer| customer.id);

        if let Some(id) = &id {
            self.ctx.customers.insert(key, id.clone()).await;
        }
        Ok(id)
    }

    async fn get_args(&self) -> AppResult<Value> {
        let metadata = clean_metadata(
            self.user_id
                .map(|id| ("user_id", id.to_string()))
                .into_iter(),
        );

        Ok(without_empty(json!({
            "email": self.email,
            "name": self.name,
            "metadata": metadata,
        })))
    }
}
