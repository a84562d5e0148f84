use std::net::SocketAddr;
use std::time::Duration;

use axum::http::HeaderValue;
use env_helpers::{get_env, get_env_default};
use secrecy::{ExposeSecret, SecretString};
use url::Url;

use crate::{
    application::resources::StripeSettings, domain::entities::stripe_mode::StripeMode,
    infra::error::InfraError,
};

pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub database_url: String,
    pub redis_url: String,
    /// Public base URL of the shop; receipts, checkout pages and callbacks hang off it.
    pub site_url: Url,
    pub cors_origin: HeaderValue,
    pub stripe_live_secret_key: Option<SecretString>,
    pub stripe_test_secret_key: Option<SecretString>,
    /// Mode used for requests that are not tied to an invoice, e.g. fetching webhook events.
    pub default_mode: StripeMode,
    /// When set, webhook deliveries must carry a valid `Stripe-Signature`.
    pub webhook_secret: Option<SecretString>,
    pub checkout_redirect: bool,
    pub payment_method_types: Vec<String>,
    pub webhook_race_delay: Duration,
    pub customer_cache_ttl: Duration,
    pub correlation_ttl: Duration,
    pub admin_token: SecretString,
    pub log_file: Option<String>,
}

fn optional_secret(var: &str) -> Option<SecretString> {
    std::env::var(var)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(|value| SecretString::new(value.into()))
}

fn check_key(
    key: &Option<SecretString>,
    mode: StripeMode,
    var: &'static str,
) -> Result<(), InfraError> {
    match key {
        Some(key) => mode
            .validate_key_prefix(key.expose_secret(), var)
            .map_err(|message| InfraError::ConfigInvalid { var, message }),
        None => Ok(()),
    }
}

/// Splits a comma separated list, dropping blanks.
pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

impl AppConfig {
    pub fn from_env() -> Result<Self, InfraError> {
        let bind_addr: SocketAddr = get_env_default("BIND_ADDR", SocketAddr::from(([127, 0, 0, 1], 3001)));
        let database_url: String = get_env("DATABASE_URL");
        let redis_url: String = get_env_default("REDIS_URL", "redis://127.0.0.1:6379".to_string());
        let site_url: Url = get_env("SITE_URL");
        let cors_origin: HeaderValue = get_env_default("CORS_ORIGIN", site_url.origin().ascii_serialization())
            .parse()
            .map_err(|_| InfraError::ConfigInvalid {
                var: "CORS_ORIGIN",
                message: "not a valid header value".into(),
            })?;

        let stripe_live_secret_key = optional_secret("STRIPE_LIVE_SECRET_KEY");
        let stripe_test_secret_key = optional_secret("STRIPE_TEST_SECRET_KEY");
        check_key(&stripe_live_secret_key, StripeMode::Live, "STRIPE_LIVE_SECRET_KEY")?;
        check_key(&stripe_test_secret_key, StripeMode::Sandbox, "STRIPE_TEST_SECRET_KEY")?;
        if stripe_live_secret_key.is_none() && stripe_test_secret_key.is_none() {
            return Err(InfraError::ConfigMissing {
                var: "STRIPE_TEST_SECRET_KEY",
            });
        }

        let sandbox: bool = get_env_default("STRIPE_SANDBOX", true);
        let default_mode = if sandbox {
            StripeMode::Sandbox
        } else {
            StripeMode::Live
        };

        let webhook_secret = optional_secret("STRIPE_WEBHOOK_SECRET");
        let checkout_redirect: bool = get_env_default("STRIPE_CHECKOUT_REDIRECT", false);
        let payment_method_types =
            parse_list(&get_env_default("STRIPE_PAYMENT_METHOD_TYPES", String::new()));
        let race_delay_ms: u64 = get_env_default("STRIPE_WEBHOOK_RACE_DELAY_MS", 2_000);
        let customer_cache_ttl_secs: u64 = get_env_default("CUSTOMER_CACHE_TTL_SECS", 60);
        let correlation_ttl_secs: u64 = get_env_default("CORRELATION_TTL_SECS", 6 * 60 * 60);

        let admin_token =
            optional_secret("ADMIN_TOKEN").ok_or(InfraError::ConfigMissing { var: "ADMIN_TOKEN" })?;
        let log_file = std::env::var("LOG_FILE").ok().filter(|path| !path.is_empty());

        Ok(Self {
            bind_addr,
            database_url,
            redis_url,
            site_url,
            cors_origin,
            stripe_live_secret_key,
            stripe_test_secret_key,
            default_mode,
            webhook_secret,
            checkout_redirect,
            payment_method_types,
            webhook_race_delay: Duration::from_millis(race_delay_ms),
            customer_cache_ttl: Duration::from_secs(customer_cache_ttl_secs),
            correlation_ttl: Duration::from_secs(correlation_ttl_secs),
            admin_token,
            log_file,
        })
    }

    pub fn secret_key(&self, mode: StripeMode) -> Option<&SecretString> {
        match mode {
            StripeMode::Live => self.stripe_live_secret_key.as_ref(),
            StripeMode::Sandbox => self.stripe_test_secret_key.as_ref(),
        }
    }

    pub fn stripe_settings(&self) -> StripeSettings {
        StripeSettings {
            site_url: self.site_url.clone(),
            default_mode: self.default_mode,
            checkout_redirect: self.checkout_redirect,
            payment_method_types: self.payment_method_types.clone(),
            customer_cache_ttl: self.customer_cache_ttl,
            correlation_ttl: self.correlation_ttl,
            webhook_race_delay: self.webhook_race_delay,
        }
    }
}
