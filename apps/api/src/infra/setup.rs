use crate::{
    adapters::http::app_state::AppState,
    application::{
        ports::{
            correlation_cache::CorrelationCache,
            hooks::BillingHooks,
            store::{InvoiceRepo, MetaStore, SubscriptionRepo},
            stripe_api::StripeApi,
        },
        resources::{StripeContext, customer_cache},
        use_cases::{
            payment::PaymentUseCases, reconciliation::ReconciliationEngine,
            subscription_sync::SubscriptionSync, webhook::WebhookDispatcher,
        },
    },
    infra::{
        billing_hooks::TracingHooks, config::AppConfig, correlation_cache::RedisCorrelationCache,
        error::InfraError, postgres_persistence, stripe_client::StripeClient,
    },
};
use std::fs::File;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub async fn init_app_state() -> anyhow::Result<AppState> {
    let config = AppConfig::from_env()?;
    init_tracing(config.log_file.as_deref())?;

    let postgres_arc = Arc::new(postgres_persistence(&config.database_url).await?);
    let invoice_repo_arc = postgres_arc.clone() as Arc<dyn InvoiceRepo>;
    let subscription_repo_arc = postgres_arc.clone() as Arc<dyn SubscriptionRepo>;
    let meta_store_arc = postgres_arc.clone() as Arc<dyn MetaStore>;

    let stripe_api = Arc::new(StripeClient::new(
        config.stripe_live_secret_key.clone(),
        config.stripe_test_secret_key.clone(),
    )?) as Arc<dyn StripeApi>;
    let correlation_cache =
        Arc::new(RedisCorrelationCache::new(&config.redis_url).await?) as Arc<dyn CorrelationCache>;
    let hooks = Arc::new(TracingHooks) as Arc<dyn BillingHooks>;

    let ctx = StripeContext {
        api: stripe_api,
        meta: meta_store_arc,
        cache: correlation_cache,
        customers: customer_cache(config.customer_cache_ttl),
        settings: Arc::new(config.stripe_settings()),
    };

    let subscription_sync = Arc::new(SubscriptionSync::new(
        ctx.clone(),
        invoice_repo_arc.clone(),
        subscription_repo_arc.clone(),
    ));

    let engine = Arc::new(ReconciliationEngine::new(
        ctx.clone(),
        invoice_repo_arc.clone(),
        subscription_repo_arc.clone(),
        subscription_sync.clone(),
        hooks.clone(),
    ));

    let payment_use_cases = PaymentUseCases::new(
        ctx.clone(),
        invoice_repo_arc,
        subscription_repo_arc,
        engine.clone(),
    );

    let webhook_dispatcher =
        WebhookDispatcher::new(ctx, engine, hooks, config.webhook_secret.clone());

    tracing::info!(
        default_mode = %config.default_mode,
        checkout_redirect = config.checkout_redirect,
        webhook_signatures = config.webhook_secret.is_some(),
        "Stripe reconciliation configured"
    );

    Ok(AppState {
        config: Arc::new(config),
        payment_use_cases: Arc::new(payment_use_cases),
        webhook_dispatcher: Arc::new(webhook_dispatcher),
        subscription_sync,
    })
}

pub fn init_tracing(log_file: Option<&str>) -> Result<(), InfraError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "getpaid_stripe_api=debug,tower_http=debug".into());

    // Console (pretty logs)
    let console_layer = fmt::layer()
        .with_target(false) // don’t show target (module path)
        .with_level(true) // show log level
        .pretty(); // human-friendly, with colors

    // File (structured JSON logs)
    let json_layer = match log_file {
        Some(path) => {
            let file = File::create(path).map_err(InfraError::LogFile)?;
            Some(
                fmt::layer()
                    .json()
                    .with_writer(file)
                    .with_current_span(true)
                    .with_span_list(true)
                    .boxed(),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(json_layer)
        .try_init()
        .ok();
    Ok(())
}
