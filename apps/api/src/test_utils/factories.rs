//! Test data factories for creating valid test fixtures.
//!
//! Each factory function creates a complete, valid object with sensible defaults.
//! Use the closure parameter to override specific fields as needed.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use getpaid_stripe_types::{Event, EventData};
use rust_decimal::Decimal;
use serde_json::Value;
use url::Url;

use crate::{
    application::resources::{StripeContext, StripeSettings, customer_cache},
    domain::entities::{
        invoice::{Invoice, InvoiceLine, InvoiceStatus},
        stripe_mode::StripeMode,
        subscription::{BillingPeriod, Subscription, SubscriptionStatus},
    },
    test_utils::{FakeStripeApi, InMemoryCorrelationCache, InMemoryMetaStore},
};

/// Create a test invoice with sensible defaults.
pub fn create_test_invoice(overrides: impl FnOnce(&mut Invoice)) -> Invoice {
    let mut invoice = Invoice {
        id: 1,
        key: "key_test".to_string(),
        number: "INV-0001".to_string(),
        status: InvoiceStatus::Pending,
        mode: StripeMode::Sandbox,
        currency: "USD".to_string(),
        total: Decimal::new(1999, 2),
        recurring_total: Decimal::new(1999, 2),
        is_recurring: false,
        has_free_trial: false,
        transaction_id: None,
        remote_subscription_id: None,
        customer_user_id: None,
        customer_email: "jane@example.com".to_string(),
        customer_name: "Jane Doe".to_string(),
        description: None,
        items: vec![create_test_line(|_| {})],
        metadata: BTreeMap::new(),
        created_at: test_datetime(),
    };
    overrides(&mut invoice);
    invoice
}

/// Create a test invoice line with sensible defaults.
pub fn create_test_line(overrides: impl FnOnce(&mut InvoiceLine)) -> InvoiceLine {
    let mut line = InvoiceLine {
        item_id: 1,
        name: "Pro Plan".to_string(),
        description: None,
        quantity: 1,
        unit_price: Decimal::new(1999, 2),
        is_recurring: true,
    };
    overrides(&mut line);
    line
}

/// Create a test subscription with sensible defaults.
pub fn create_test_subscription(
    parent_invoice_id: i64,
    overrides: impl FnOnce(&mut Subscription),
) -> Subscription {
    let mut subscription = Subscription {
        id: 1,
        parent_invoice_id,
        customer_user_id: None,
        item_ids: vec![1],
        status: SubscriptionStatus::Pending,
        profile_id: None,
        period: BillingPeriod::Month,
        frequency: 1,
        bill_times: 0,
        initial_amount: Decimal::new(1999, 2),
        recurring_amount: Decimal::new(1999, 2),
        is_trialing: false,
        expiration: None,
        created_at: test_datetime(),
    };
    overrides(&mut subscription);
    subscription
}

/// Create a Stripe event wrapping `object`.
pub fn create_test_event(event_type: &str, object: Value) -> Event {
    Event {
        id: "evt_test".to_string(),
        event_type: event_type.to_string(),
        created: test_datetime().timestamp(),
        livemode: false,
        data: EventData {
            object,
            previous_attributes: None,
        },
        request: None,
    }
}

/// Settings for a sandbox shop with no webhook race delay.
pub fn test_settings() -> StripeSettings {
    StripeSettings {
        site_url: Url::parse("https://shop.example.com/").unwrap(),
        default_mode: StripeMode::Sandbox,
        checkout_redirect: false,
        payment_method_types: vec![],
        customer_cache_ttl: Duration::from_secs(60),
        correlation_ttl: Duration::from_secs(6 * 60 * 60),
        webhook_race_delay: Duration::ZERO,
    }
}

/// Adapter context over `api` with fresh in-memory stores.
pub fn test_context(api: Arc<FakeStripeApi>) -> StripeContext {
    context_with_settings(api, test_settings())
}

pub fn context_with_settings(api: Arc<FakeStripeApi>, settings: StripeSettings) -> StripeContext {
    StripeContext {
        api,
        meta: Arc::new(InMemoryMetaStore::new()),
        cache: Arc::new(InMemoryCorrelationCache::new()),
        customers: customer_cache(settings.customer_cache_ttl),
        settings: Arc::new(settings),
    }
}

/// A fixed datetime for deterministic tests.
pub fn test_datetime() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap()
}
