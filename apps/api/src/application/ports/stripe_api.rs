//! Port for calling the Stripe REST API.
//!
//! Every resource adapter talks to Stripe through [`StripeApi::call`], so the
//! whole service can be exercised against an in-memory fake in tests.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{
    app_error::{AppError, AppResult},
    domain::entities::stripe_mode::StripeMode,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Customers,
    Products,
    PaymentIntents,
    SetupIntents,
    PaymentMethods,
    Subscriptions,
    CheckoutSessions,
    InvoiceItems,
    Refunds,
    WebhookEndpoints,
    Events,
}

impl ResourceKind {
    /// Path below `/v1`.
    pub fn path(&self) -> &'static str {
        match self {
            ResourceKind::Customers => "customers",
            ResourceKind::Products => "products",
            ResourceKind::PaymentIntents => "payment_intents",
            ResourceKind::SetupIntents => "setup_intents",
            ResourceKind::PaymentMethods => "payment_methods",
            ResourceKind::Subscriptions => "subscriptions",
            ResourceKind::CheckoutSessions => "checkout/sessions",
            ResourceKind::InvoiceItems => "invoiceitems",
            ResourceKind::Refunds => "refunds",
            ResourceKind::WebhookEndpoints => "webhook_endpoints",
            ResourceKind::Events => "events",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiMethod {
    Create,
    Update,
    Retrieve,
    All,
    Cancel,
    Delete,
    Confirm,
    Capture,
    Attach,
    Detach,
}

impl ApiMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiMethod::Create => "create",
            ApiMethod::Update => "update",
            ApiMethod::Retrieve => "retrieve",
            ApiMethod::All => "all",
            ApiMethod::Cancel => "cancel",
            ApiMethod::Delete => "delete",
            ApiMethod::Confirm => "confirm",
            ApiMethod::Capture => "capture",
            ApiMethod::Attach => "attach",
            ApiMethod::Detach => "detach",
        }
    }

    /// Verbs whose arguments are written to the audit log.
    pub fn is_destructive(&self) -> bool {
        matches!(self, ApiMethod::Delete | ApiMethod::Cancel)
    }

    pub fn needs_id(&self) -> bool {
        !matches!(self, ApiMethod::Create | ApiMethod::All)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub kind: ResourceKind,
    pub method: ApiMethod,
    pub id: Option<String>,
    pub params: Value,
}

impl ApiRequest {
    fn new(kind: ResourceKind, method: ApiMethod, id: Option<&str>, params: Value) -> Self {
        Self {
            kind,
            method,
            id: id.map(str::to_owned),
            params,
        }
    }

    pub fn create(kind: ResourceKind, params: Value) -> Self {
        Self::new(kind, ApiMethod::Create, None, params)
    }

    pub fn retrieve(kind: ResourceKind, id: &str) -> Self {
        Self::new(kind, ApiMethod::Retrieve, Some(id), Value::Null)
    }

    pub fn update(kind: ResourceKind, id: &str, params: Value) -> Self {
        Self::new(kind, ApiMethod::Update, Some(id), params)
    }

    pub fn all(kind: ResourceKind, params: Value) -> Self {
        Self::new(kind, ApiMethod::All, None, params)
    }

    pub fn cancel(kind: ResourceKind, id: &str) -> Self {
        Self::new(kind, ApiMethod::Cancel, Some(id), Value::Null)
    }

    pub fn delete(kind: ResourceKind, id: &str) -> Self {
        Self::new(kind, ApiMethod::Delete, Some(id), Value::Null)
    }

    pub fn confirm(kind: ResourceKind, id: &str, params: Value) -> Self {
        Self::new(kind, ApiMethod::Confirm, Some(id), params)
    }

    pub fn capture(kind: ResourceKind, id: &str) -> Self {
        Self::new(kind, ApiMethod::Capture, Some(id), Value::Null)
    }

    pub fn attach(kind: ResourceKind, id: &str, params: Value) -> Self {
        Self::new(kind, ApiMethod::Attach, Some(id), params)
    }

    pub fn detach(kind: ResourceKind, id: &str) -> Self {
        Self::new(kind, ApiMethod::Detach, Some(id), Value::Null)
    }
}

/// Uniform wrapper over Stripe's resource endpoints.
///
/// Implementations never panic or leak transport errors: every failure comes
/// back as one of the remote `AppError` variants.
#[async_trait]
pub trait StripeApi: Send + Sync {
    async fn call(&self, mode: StripeMode, request: ApiRequest) -> AppResult<Value>;
}

/// Decodes a raw Stripe response into a typed object.
pub fn decode<T: DeserializeOwned>(value: Value) -> AppResult<T> {
    serde_json::from_value(value).map_err(|e| AppError::GenericApiError {
        code: "invalid_response".into(),
        message: format!("Unexpected response from Stripe: {e}"),
    })
}
