//! Resource adapters.
//!
//! One adapter per Stripe resource kind. Each knows how to find its remote
//! object from local state and how to build the payload Stripe expects; the
//! shared behaviour (get, exists, create, update-or-create) lives on the
//! [`RemoteResource`] trait.

pub mod checkout_session;
pub mod customer;
pub mod event;
pub mod intent;
pub mod invoice_item;
pub mod product;
pub mod refund;
pub mod setup_intent;
pub mod subscription;
pub mod webhook_endpoint;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use url::Url;

use crate::{
    app_error::{AppError, AppResult},
    application::ports::{
        correlation_cache::CorrelationCache,
        store::MetaStore,
        stripe_api::{ApiRequest, ResourceKind, StripeApi, decode},
    },
    domain::entities::{invoice::Invoice, stripe_mode::StripeMode},
};

/// Payment method types Stripe can reuse off-session.
const REUSABLE_PAYMENT_METHODS: [&str; 13] = [
    "acss_debit",
    "au_becs_debit",
    "bacs_debit",
    "bancontact",
    "blik",
    "boleto",
    "card",
    "card_present",
    "ideal",
    "link",
    "sepa_debit",
    "sofort",
    "us_bank_account",
];

#[derive(Debug, Clone)]
pub struct StripeSettings {
    pub site_url: Url,
    /// Mode used when no invoice is involved, e.g. for webhook events.
    pub default_mode: StripeMode,
    pub checkout_redirect: bool,
    pub payment_method_types: Vec<String>,
    pub customer_cache_ttl: Duration,
    pub correlation_ttl: Duration,
    pub webhook_race_delay: Duration,
}

impl StripeSettings {
    fn site_path(&self, path: &str) -> AppResult<Url> {
        self.site_url
            .join(path)
            .map_err(|e| AppError::Internal(format!("Invalid site url path {path}: {e}")))
    }

    pub fn receipt_url(&self, invoice: &Invoice) -> AppResult<Url> {
        self.site_path(&format!("invoices/{}/receipt", invoice.key))
    }

    pub fn checkout_url(&self, invoice: &Invoice) -> AppResult<Url> {
        self.site_path(&format!("invoices/{}/checkout", invoice.key))
    }

    pub fn subscription_url(&self, subscription_id: i64) -> AppResult<Url> {
        self.site_path(&format!("subscriptions/{subscription_id}"))
    }

    pub fn return_url(&self) -> AppResult<Url> {
        self.site_path("api/stripe/return")
    }

    pub fn webhook_url(&self) -> AppResult<Url> {
        self.site_path("api/stripe/webhook")
    }

    /// Configured payment method types, `card` when none are set.
    ///
    /// Recurring payments keep only methods Stripe can charge off-session.
    pub fn payment_method_types(&self, recurring: bool) -> Vec<String> {
        let configured: Vec<String> = if self.payment_method_types.is_empty() {
            vec!["card".to_string()]
        } else {
            self.payment_method_types.clone()
        };

        if recurring {
            configured
                .into_iter()
                .filter(|pm| REUSABLE_PAYMENT_METHODS.contains(&pm.as_str()))
                .collect()
        } else {
            configured
        }
    }
}

/// `{mode}:{email}` -> remote customer id.
pub type CustomerCache = Cache<String, String>;

pub fn customer_cache(ttl: Duration) -> CustomerCache {
    Cache::builder()
        .max_capacity(10_000)
        .time_to_live(ttl)
        .build()
}

/// Shared dependencies handed to every adapter.
#[derive(Clone)]
pub struct StripeContext {
    pub api: Arc<dyn StripeApi>,
    pub meta: Arc<dyn MetaStore>,
    pub cache: Arc<dyn CorrelationCache>,
    pub customers: CustomerCache,
    pub settings: Arc<StripeSettings>,
}

/// Capability set shared by all resource adapters.
#[async_trait]
pub trait RemoteResource: Send + Sync {
    type Object: DeserializeOwned + Send;

    fn context(&self) -> &StripeContext;
    fn mode(&self) -> StripeMode;
    fn kind(&self) -> ResourceKind;

    async fn get_remote_id(&self) -> AppResult<Option<String>>;
    async fn get_args(&self) -> AppResult<Value>;

    async fn call(&self, request: ApiRequest) -> AppResult<Value> {
        self.context().api.call(self.mode(), request).await
    }

    /// Whether the remote object exists and has not been deleted.
    async fn exists(&self) -> AppResult<bool> {
        let Some(id) = self.get_remote_id().await? else {
            return Ok(false);
        };

        match self.call(ApiRequest::retrieve(self.kind(), &id)).await {
            Ok(object) => Ok(!object
                .get("deleted")
                .and_then(Value::as_bool)
                .unwrap_or(false)),
            Err(AppError::InvalidRequest { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn get(&self) -> AppResult<Self::Object> {
        let id = self.require_remote_id().await?;
        decode(self.call(ApiRequest::retrieve(self.kind(), &id)).await?)
    }

    async fn create(&self) -> AppResult<Self::Object> {
        let args = self.get_args().await?;
        decode(self.call(ApiRequest::create(self.kind(), args)).await?)
    }

    /// Updates the remote object, creating it when it does not exist yet.
    async fn update(&self) -> AppResult<Self::Object> {
        if !self.exists().await? {
            return self.create().await;
        }

        let id = self.require_remote_id().await?;
        let args = self.get_args().await?;
        decode(self.call(ApiRequest::update(self.kind(), &id, args)).await?)
    }

    async fn require_remote_id(&self) -> AppResult<String> {
        self.get_remote_id().await?.ok_or_else(|| {
            AppError::invalid_argument(format!("No remote {} id", self.kind().path()))
        })
    }
}

/// Drops null and empty-string entries from a JSON object.
pub(crate) fn without_empty(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| match v {
                    Value::Null => false,
                    Value::String(s) => !s.is_empty(),
                    _ => true,
                })
                .collect::<Map<String, Value>>(),
        ),
        other => other,
    }
}

/// Ids Stripe should carry for an invoice, followed by the stored payment form data.
///
/// Form data never overrides the ids.
pub(crate) fn invoice_metadata(
    invoice: &Invoice,
    settings: &StripeSettings,
    extra: impl IntoIterator<Item = (&'static str, String)>,
) -> AppResult<getpaid_stripe_types::Metadata> {
    let mut entries: Vec<(String, String)> = vec![
        ("invoice_id".into(), invoice.id.to_string()),
        ("invoice_key".into(), invoice.key.clone()),
        ("invoice_url".into(), settings.receipt_url(invoice)?.to_string()),
        ("invoice_date".into(), invoice.created_at.to_rfc3339()),
    ];
    entries.extend(extra.into_iter().map(|(k, v)| (k.to_string(), v)));

    let form_data: Vec<(String, String)> = invoice
        .metadata
        .iter()
        .filter(|(k, _)| !entries.iter().any(|(id_key, _)| id_key == *k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    entries.extend(form_data);

    Ok(getpaid_stripe_types::clean_metadata(entries))
}
