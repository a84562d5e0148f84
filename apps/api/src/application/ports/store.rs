//! Collaborator interface to the invoicing store.
//!
//! Invoices and subscriptions are owned by the invoicing system; this service
//! only reads them and applies the documented transitions. Idempotency
//! markers live in the same durable store as scoped metadata.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    app_error::AppResult,
    domain::entities::{
        invoice::{Invoice, InvoiceStatus},
        subscription::{Subscription, SubscriptionStatus},
    },
};

// ============================================================================
// Metadata keys
// ============================================================================

pub mod meta_keys {
    /// Last payment or setup intent created for an invoice.
    pub const INTENT_ID: &str = "stripe_intent_id";
    /// `{intent_id}|{status}` of the last applied intent transition.
    pub const INTENT_STATE: &str = "stripe_intent_state";
    /// Set while the browser confirmation path is in flight.
    pub const PROCESS_INTENT: &str = "stripe_process_intent";
    /// Payment method last used to start the invoice's subscriptions.
    pub const PAYMENT_PROFILE_ID: &str = "stripe_payment_profile_id";
    /// Setup-fee invoice item created for the first group member.
    pub const INVOICE_ITEM_ID: &str = "stripe_invoice_item_id";
    /// Remote webhook endpoint registered for a mode.
    pub const WEBHOOK_ENDPOINT_ID: &str = "stripe_webhook_endpoint_id";
    pub const PRODUCT_ID: &str = "stripe_product_id";
    pub const SANDBOX_PRODUCT_ID: &str = "stripe_sandbox_product_id";

    pub fn refund_flag(charge_id: &str) -> String {
        format!("stripe_refund_{charge_id}")
    }

    pub fn renewal_flag(remote_invoice_id: &str) -> String {
        format!("stripe_renewal_{remote_invoice_id}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetaScope {
    Invoice(i64),
    Subscription(i64),
    Item(i64),
    Global,
}

impl MetaScope {
    pub fn kind(&self) -> &'static str {
        match self {
            MetaScope::Invoice(_) => "invoice",
            MetaScope::Subscription(_) => "subscription",
            MetaScope::Item(_) => "item",
            MetaScope::Global => "global",
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            MetaScope::Invoice(id) | MetaScope::Subscription(id) | MetaScope::Item(id) => *id,
            MetaScope::Global => 0,
        }
    }
}

/// Everything the renewal-invoice creation needs about the payment that renewed it.
#[derive(Debug, Clone, PartialEq)]
pub struct RenewalPayment {
    pub transaction_id: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub payment_intent_id: Option<String>,
    pub charge_id: Option<String>,
}

// ============================================================================
// Repositories
// ============================================================================

#[async_trait]
pub trait InvoiceRepo: Send + Sync {
    async fn get_by_id(&self, id: i64) -> AppResult<Option<Invoice>>;
    async fn get_by_key(&self, key: &str) -> AppResult<Option<Invoice>>;
    async fn get_by_transaction_id(&self, transaction_id: &str) -> AppResult<Option<Invoice>>;
    async fn mark_paid(&self, id: i64) -> AppResult<()>;
    async fn set_status(&self, id: i64, status: InvoiceStatus) -> AppResult<()>;
    async fn set_transaction_id(&self, id: i64, transaction_id: &str) -> AppResult<()>;
    async fn set_remote_subscription_id(&self, id: i64, remote_id: &str) -> AppResult<()>;
    async fn refund(&self, id: i64) -> AppResult<()>;
    async fn add_note(&self, id: i64, note: &str, customer_visible: bool) -> AppResult<()>;
    /// Sets the transaction id, adds the audit `note` and marks the invoice
    /// paid as one unit: either all three are stored or none is.
    async fn record_payment(&self, id: i64, transaction_id: &str, note: &str) -> AppResult<()>;
    /// The renewal invoice already created for `transaction_id`, if any.
    async fn get_renewal(
        &self,
        subscription_id: i64,
        transaction_id: &str,
    ) -> AppResult<Option<Invoice>>;
    /// Creates the paid renewal invoice for one billing cycle of `subscription`.
    async fn create_renewal(
        &self,
        subscription: &Subscription,
        payment: &RenewalPayment,
    ) -> AppResult<Invoice>;
}

#[async_trait]
pub trait SubscriptionRepo: Send + Sync {
    async fn get_by_id(&self, id: i64) -> AppResult<Option<Subscription>>;
    async fn get_by_profile_id(&self, profile_id: &str) -> AppResult<Option<Subscription>>;
    async fn list_by_invoice(&self, invoice_id: i64) -> AppResult<Vec<Subscription>>;
    async fn list_by_status(&self, statuses: &[SubscriptionStatus]) -> AppResult<Vec<Subscription>>;
    async fn set_profile_id(&self, id: i64, profile_id: &str) -> AppResult<()>;
    /// Moves to `trialing` or `active`, depending on whether the subscription has a trial.
    async fn activate(&self, id: i64) -> AppResult<()>;
    async fn set_dates(
        &self,
        id: i64,
        created_at: Option<DateTime<Utc>>,
        expiration: Option<DateTime<Utc>>,
    ) -> AppResult<()>;
    async fn set_expiration(&self, id: i64, expiration: DateTime<Utc>) -> AppResult<()>;
    /// Starts a new billing cycle at `period_start`.
    async fn renew(&self, id: i64, period_start: DateTime<Utc>) -> AppResult<()>;
    async fn failing(&self, id: i64) -> AppResult<()>;
    async fn cancel(&self, id: i64) -> AppResult<()>;
}

#[async_trait]
pub trait MetaStore: Send + Sync {
    async fn get_meta(&self, scope: MetaScope, key: &str) -> AppResult<Option<String>>;
    async fn set_meta(&self, scope: MetaScope, key: &str, value: &str) -> AppResult<()>;
    /// Returns whether the key existed.
    async fn delete_meta(&self, scope: MetaScope, key: &str) -> AppResult<bool>;
    /// Atomically stores `value` and returns what was there before.
    async fn swap_meta(&self, scope: MetaScope, key: &str, value: &str)
    -> AppResult<Option<String>>;
    /// Stores `value` only if the key is absent. Returns whether it was stored.
    async fn claim_meta(&self, scope: MetaScope, key: &str, value: &str) -> AppResult<bool>;
    async fn find_invoice_id(&self, key: &str, value: &str) -> AppResult<Option<i64>>;
}

/// Puts a swapped marker back the way it was after a failed transition.
pub async fn restore_meta(
    meta: &dyn MetaStore,
    scope: MetaScope,
    key: &str,
    previous: Option<&str>,
) -> AppResult<()> {
    match previous {
        Some(value) => meta.set_meta(scope, key, value).await,
        None => meta.delete_meta(scope, key).await.map(|_| ()),
    }
}
