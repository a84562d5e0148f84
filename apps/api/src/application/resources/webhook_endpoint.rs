use async_trait::async_trait;
use getpaid_stripe_types::{List, WebhookEndpoint};
use serde_json::{Value, json};

use super::{RemoteResource, StripeContext};
use crate::{
    app_error::AppResult,
    application::ports::{
        store::{MetaScope, meta_keys},
        stripe_api::{ApiRequest, ResourceKind, decode},
    },
    domain::entities::{stripe_event::StripeEventKind, stripe_mode::StripeMode},
};

/// The endpoint Stripe delivers this site's events to, one per mode.
pub struct WebhookEndpointResource {
    ctx: StripeContext,
    mode: StripeMode,
}

impl WebhookEndpointResource {
    pub fn new(ctx: &StripeContext, mode: StripeMode) -> Self {
        Self {
            ctx: ctx.clone(),
            mode,
        }
    }

    fn meta_key(&self) -> String {
        format!("{}_{}", meta_keys::WEBHOOK_ENDPOINT_ID, self.mode)
    }

    /// Looks for an endpoint already pointing at our webhook url.
    pub async fn find_saved(&self) -> AppResult<Option<WebhookEndpoint>> {
        let url = self.ctx.settings.webhook_url()?.to_string();
        let endpoints: List<WebhookEndpoint> = decode(
            self.call(ApiRequest::all(self.kind(), json!({ "limit": 100 })))
                .await?,
        )?;
        Ok(endpoints.data.into_iter().find(|e| e.url == url))
    }

    /// Returns the endpoint id, registering one when none exists.
    pub async fn ensure(&self) -> AppResult<String> {
        let endpoint = match self.find_saved().await? {
            Some(endpoint) => endpoint,
            None => {
                let endpoint = self.create().await?;
                tracing::info!(
                    mode = %self.mode,
                    endpoint_id = %endpoint.id,
                    url = %endpoint.url,
                    "Registered webhook endpoint"
                );
                endpoint
            }
        };

        self.ctx
            .meta
            .set_meta(MetaScope::Global, &self.meta_key(), &endpoint.id)
            .await?;
        Ok(endpoint.id)
    }
}

#[async_trait]
impl RemoteResource for WebhookEndpointResource {
    type Object = WebhookEndpoint;

    fn context(&self) -> &StripeContext {
        &self.ctx
    }

    fn mode(&self) -> StripeMode {
        self.mode
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::WebhookEndpoints
    }

    async fn get_remote_id(&self) -> AppResult<Option<String>> {
        self.ctx
            .meta
            .get_meta(MetaScope::Global, &self.meta_key())
            .await
    }

    async fn get_args(&self) -> AppResult<Value> {
        Ok(json!({
            "url": self.ctx.settings.webhook_url()?.to_string(),
            "enabled_events": StripeEventKind::enabled_events(),
        }))
    }
}
