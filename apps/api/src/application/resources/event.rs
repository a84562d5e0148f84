use async_trait::async_trait;
use getpaid_stripe_types::Event;
use serde_json::Value;

use super::{RemoteResource, StripeContext};
use crate::{
    app_error::{AppError, AppResult},
    application::ports::stripe_api::ResourceKind,
    domain::entities::stripe_mode::StripeMode,
};

/// Authoritative copy of a webhook event, fetched by id.
pub struct EventResource {
    ctx: StripeContext,
    mode: StripeMode,
    event_id: String,
}

impl EventResource {
    pub fn new(ctx: &StripeContext, mode: StripeMode, event_id: &str) -> Self {
        Self {
            ctx: ctx.clone(),
            mode,
            event_id: event_id.to_string(),
        }
    }
}

#[async_trait]
impl RemoteResource for EventResource {
    type Object = Event;

    fn context(&self) -> &StripeContext {
        &self.ctx
    }

    fn mode(&self) -> StripeMode {
        self.mode
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::Events
    }

    async fn get_remote_id(&self) -> AppResult<Option<String>> {
        Ok(Some(self.event_id.clone()))
    }

    async fn get_args(&self) -> AppResult<Value> {
        Err(AppError::invalid_argument("Events are created by Stripe"))
    }
}
