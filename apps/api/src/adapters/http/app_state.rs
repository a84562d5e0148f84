use std::sync::Arc;

use crate::{
    application::use_cases::{
        payment::PaymentUseCases, subscription_sync::SubscriptionSync,
        webhook::WebhookDispatcher,
    },
    infra::config::AppConfig,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub payment_use_cases: Arc<PaymentUseCases>,
    pub webhook_dispatcher: Arc<WebhookDispatcher>,
    pub subscription_sync: Arc<SubscriptionSync>,
}
