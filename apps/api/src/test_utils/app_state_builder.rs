//! Use case and app state builders for tests.
//!
//! `TestServices` wires every use case over the same in-memory stores and fake
//! Stripe API, so a test can drive one use case and assert on the shared state.
//! `TestAppStateBuilder` wraps those services into an `AppState` for HTTP tests.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::HeaderValue;
use secrecy::SecretString;

use crate::{
    adapters::http::app_state::AppState,
    application::{
        resources::{StripeContext, StripeSettings},
        use_cases::{
            payment::PaymentUseCases, reconciliation::ReconciliationEngine,
            subscription_sync::SubscriptionSync, webhook::WebhookDispatcher,
        },
    },
    infra::config::AppConfig,
    test_utils::{
        FakeStripeApi, InMemoryInvoiceRepo, InMemorySubscriptionRepo, RecordingHooks,
        context_with_settings, test_settings,
    },
};

pub const TEST_ADMIN_TOKEN: &str = "test_admin_token";

// ============================================================================
// Use case wiring
// ============================================================================

#[derive(Clone)]
pub struct TestServices {
    pub api: Arc<FakeStripeApi>,
    pub invoices: Arc<InMemoryInvoiceRepo>,
    pub subscriptions: Arc<InMemorySubscriptionRepo>,
    pub hooks: Arc<RecordingHooks>,
    pub ctx: StripeContext,
}

impl TestServices {
    pub fn new() -> Self {
        Self::with_settings(|_| {})
    }

    /// Services whose adapter settings are adjusted by `overrides`.
    pub fn with_settings(overrides: impl FnOnce(&mut StripeSettings)) -> Self {
        let mut settings = test_settings();
        overrides(&mut settings);

        let api = Arc::new(FakeStripeApi::new());
        Self {
            ctx: context_with_settings(api.clone(), settings),
            api,
            invoices: Arc::new(InMemoryInvoiceRepo::new()),
            subscriptions: Arc::new(InMemorySubscriptionRepo::new()),
            hooks: Arc::new(RecordingHooks::new()),
        }
    }

    pub fn sync(&self) -> Arc<SubscriptionSync> {
        Arc::new(SubscriptionSync::new(
            self.ctx.clone(),
            self.invoices.clone(),
            self.subscriptions.clone(),
        ))
    }

    pub fn engine(&self) -> Arc<ReconciliationEngine> {
        Arc::new(ReconciliationEngine::new(
            self.ctx.clone(),
            self.invoices.clone(),
            self.subscriptions.clone(),
            self.sync(),
            self.hooks.clone(),
        ))
    }

    pub fn dispatcher(&self) -> WebhookDispatcher {
        self.build_dispatcher(None)
    }

    /// Dispatcher that only accepts deliveries signed with `secret`.
    pub fn dispatcher_with_secret(&self, secret: &str) -> WebhookDispatcher {
        self.build_dispatcher(Some(SecretString::new(secret.into())))
    }

    fn build_dispatcher(&self, secret: Option<SecretString>) -> WebhookDispatcher {
        WebhookDispatcher::new(self.ctx.clone(), self.engine(), self.hooks.clone(), secret)
    }

    pub fn payments(&self) -> PaymentUseCases {
        PaymentUseCases::new(
            self.ctx.clone(),
            self.invoices.clone(),
            self.subscriptions.clone(),
            self.engine(),
        )
    }
}

impl Default for TestServices {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// App state
// ============================================================================

pub struct TestAppStateBuilder {
    services: TestServices,
    webhook_secret: Option<String>,
}

impl TestAppStateBuilder {
    pub fn new() -> Self {
        Self {
            services: TestServices::new(),
            webhook_secret: None,
        }
    }

    /// Use `services` so the test keeps handles on the stores behind the app.
    pub fn with_services(mut self, services: TestServices) -> Self {
        self.services = services;
        self
    }

    pub fn with_webhook_secret(mut self, secret: &str) -> Self {
        self.webhook_secret = Some(secret.to_string());
        self
    }

    pub fn build(self) -> AppState {
        let services = self.services;
        let settings = services.ctx.settings.clone();
        let webhook_secret = self
            .webhook_secret
            .map(|secret| SecretString::new(secret.into()));

        // Create minimal config for testing
        let config = Arc::new(AppConfig {
            bind_addr: "127.0.0.1:3001".parse::<SocketAddr>().unwrap(),
            database_url: String::new(),
            redis_url: String::new(),
            site_url: settings.site_url.clone(),
            cors_origin: HeaderValue::from_static("https://shop.example.com"),
            stripe_live_secret_key: None,
            stripe_test_secret_key: Some(SecretString::new("sk_test_123".into())),
            default_mode: settings.default_mode,
            webhook_secret: webhook_secret.clone(),
            checkout_redirect: settings.checkout_redirect,
            payment_method_types: settings.payment_method_types.clone(),
            webhook_race_delay: settings.webhook_race_delay,
            customer_cache_ttl: settings.customer_cache_ttl,
            correlation_ttl: settings.correlation_ttl,
            admin_token: SecretString::new(TEST_ADMIN_TOKEN.into()),
            log_file: None,
        });

        AppState {
            config,
            payment_use_cases: Arc::new(services.payments()),
            webhook_dispatcher: Arc::new(services.build_dispatcher(webhook_secret)),
            subscription_sync: services.sync(),
        }
    }
}

impl Default for TestAppStateBuilder {
    fn default() -> Self {
        Self::new()
    }
}
