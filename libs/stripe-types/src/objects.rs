use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{AsRefStr, Display};

use crate::{Expandable, HasId, Metadata};

macro_rules! impl_has_id {
    ($($ty:ty),* $(,)?) => {
        $(impl HasId for $ty {
            fn id(&self) -> &str {
                &self.id
            }
        })*
    };
}

impl_has_id!(
    PaymentIntent,
    SetupIntent,
    CheckoutSession,
    Subscription,
    StripeInvoice,
    Charge,
    Customer,
    Product,
    PaymentMethod,
    InvoiceItem,
    Refund,
    WebhookEndpoint,
    Event,
);

/// Converts a unix timestamp as sent by Stripe.
pub fn timestamp(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}

// ============================================================================
// Lists
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct List<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
    #[serde(default)]
    pub has_more: bool,
}

impl<T> Default for List<T> {
    fn default() -> Self {
        Self {
            data: Vec::new(),
            has_more: false,
        }
    }
}

// ============================================================================
// Payment Intents
// ============================================================================

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentIntentStatus {
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    Processing,
    RequiresCapture,
    Canceled,
    Succeeded,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    #[serde(default)]
    pub status: PaymentIntentStatus,
    #[serde(default)]
    pub amount: i64,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub customer: Option<Expandable<Customer>>,
    #[serde(default)]
    pub latest_charge: Option<Expandable<Charge>>,
    /// Older API versions embed charges instead of `latest_charge`.
    #[serde(default)]
    pub charges: Option<List<Charge>>,
    #[serde(default)]
    pub payment_method: Option<Expandable<PaymentMethod>>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub last_payment_error: Option<crate::ApiErrorObject>,
    #[serde(default)]
    pub payment_details: Option<PaymentDetails>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaymentDetails {
    #[serde(default)]
    pub order_reference: Option<String>,
}

impl PaymentIntent {
    pub fn latest_charge_id(&self) -> Option<&str> {
        self.latest_charge
            .as_ref()
            .map(|c| c.id())
            .or_else(|| self.charges.as_ref()?.data.last().map(|c| c.id.as_str()))
            .filter(|id| !id.is_empty())
    }

    /// The most recent charge, when it was expanded or embedded.
    pub fn latest_charge_object(&self) -> Option<&Charge> {
        self.latest_charge
            .as_ref()
            .and_then(|c| c.as_object())
            .or_else(|| self.charges.as_ref()?.data.last())
    }

    pub fn payment_method_id(&self) -> Option<&str> {
        self.payment_method
            .as_ref()
            .map(|pm| pm.id())
            .filter(|id| !id.is_empty())
    }

    pub fn customer_id(&self) -> Option<&str> {
        self.customer.as_ref().map(|c| c.id())
    }

    pub fn order_reference(&self) -> Option<&str> {
        self.payment_details
            .as_ref()?
            .order_reference
            .as_deref()
            .filter(|r| !r.is_empty())
    }
}

// ============================================================================
// Setup Intents
// ============================================================================

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SetupIntentStatus {
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    Processing,
    Canceled,
    Succeeded,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetupIntent {
    pub id: String,
    #[serde(default)]
    pub status: SetupIntentStatus,
    #[serde(default)]
    pub customer: Option<Expandable<Customer>>,
    #[serde(default)]
    pub payment_method: Option<Expandable<PaymentMethod>>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl SetupIntent {
    pub fn payment_method_id(&self) -> Option<&str> {
        self.payment_method
            .as_ref()
            .map(|pm| pm.id())
            .filter(|id| !id.is_empty())
    }
}

/// A payment or setup intent, told apart by Stripe's `object` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "object")]
pub enum Intent {
    #[serde(rename = "payment_intent")]
    Payment(PaymentIntent),
    #[serde(rename = "setup_intent")]
    Setup(SetupIntent),
}

impl Intent {
    pub fn id(&self) -> &str {
        match self {
            Intent::Payment(pi) => &pi.id,
            Intent::Setup(si) => &si.id,
        }
    }

    pub fn client_secret(&self) -> Option<&str> {
        match self {
            Intent::Payment(pi) => pi.client_secret.as_deref(),
            Intent::Setup(si) => si.client_secret.as_deref(),
        }
    }

    pub fn customer_id(&self) -> Option<&str> {
        match self {
            Intent::Payment(pi) => pi.customer_id(),
            Intent::Setup(si) => si.customer.as_ref().map(|c| c.id()),
        }
    }

    pub fn is_setup(&self) -> bool {
        matches!(self, Intent::Setup(_))
    }
}

// ============================================================================
// Charges & Payment Methods
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Charge {
    pub id: String,
    #[serde(default)]
    pub amount: i64,
    #[serde(default)]
    pub amount_refunded: i64,
    #[serde(default)]
    pub refunded: bool,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub payment_method_details: Option<PaymentMethodDetails>,
    #[serde(default)]
    pub created: i64,
}

impl Charge {
    /// For iDEAL payments Stripe generates a reusable SEPA debit method.
    pub fn generated_sepa_debit(&self) -> Option<&str> {
        self.payment_method_details
            .as_ref()?
            .ideal
            .as_ref()?
            .generated_sepa_debit
            .as_deref()
            .filter(|pm| !pm.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaymentMethodDetails {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub ideal: Option<IdealDetails>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdealDetails {
    #[serde(default)]
    pub generated_sepa_debit: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

// ============================================================================
// Checkout Sessions
// ============================================================================

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CheckoutMode {
    Payment,
    Setup,
    Subscription,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    #[serde(default)]
    pub mode: CheckoutMode,
    #[serde(default)]
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub setup_intent: Option<String>,
    #[serde(default)]
    pub subscription: Option<String>,
    #[serde(default)]
    pub invoice: Option<String>,
    #[serde(default)]
    pub client_reference_id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

// ============================================================================
// Subscriptions & Invoices
// ============================================================================

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SubscriptionStatus {
    Incomplete,
    IncompleteExpired,
    Trialing,
    Active,
    PastDue,
    Canceled,
    Unpaid,
    Paused,
    #[default]
    #[serde(other)]
    Unknown,
}

impl SubscriptionStatus {
    /// Active or trialing.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Active | Self::Trialing)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    #[serde(default)]
    pub status: SubscriptionStatus,
    #[serde(default)]
    pub current_period_start: Option<i64>,
    #[serde(default)]
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub trial_end: Option<i64>,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub latest_invoice: Option<Expandable<StripeInvoice>>,
    #[serde(default)]
    pub items: List<SubscriptionItem>,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Newer API versions report billing periods per item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionItem {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub current_period_start: Option<i64>,
    #[serde(default)]
    pub current_period_end: Option<i64>,
}

impl Subscription {
    pub fn period_start(&self) -> Option<DateTime<Utc>> {
        self.current_period_start
            .or_else(|| self.items.data.first()?.current_period_start)
            .and_then(timestamp)
    }

    pub fn period_end(&self) -> Option<DateTime<Utc>> {
        self.current_period_end
            .or_else(|| self.items.data.first()?.current_period_end)
            .and_then(timestamp)
    }

    pub fn trial_end_at(&self) -> Option<DateTime<Utc>> {
        self.trial_end.and_then(timestamp)
    }

    pub fn latest_invoice_object(&self) -> Option<&StripeInvoice> {
        self.latest_invoice.as_ref()?.as_object()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StripeInvoice {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub subscription: Option<String>,
    #[serde(default)]
    pub parent: Option<InvoiceParent>,
    #[serde(default)]
    pub charge: Option<String>,
    #[serde(default)]
    pub payment_intent: Option<Expandable<PaymentIntent>>,
    #[serde(default)]
    pub billing_reason: Option<String>,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub status_transitions: StatusTransitions,
    #[serde(default)]
    pub amount_paid: i64,
    #[serde(default)]
    pub currency: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvoiceParent {
    #[serde(default)]
    pub subscription_details: Option<SubscriptionDetails>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionDetails {
    #[serde(default)]
    pub subscription: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusTransitions {
    #[serde(default)]
    pub paid_at: Option<i64>,
}

impl StripeInvoice {
    /// Remote subscription id from either the legacy field or `parent.subscription_details`.
    pub fn subscription_id(&self) -> Option<&str> {
        self.subscription
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| {
                self.parent
                    .as_ref()?
                    .subscription_details
                    .as_ref()?
                    .subscription
                    .as_deref()
                    .filter(|s| !s.is_empty())
            })
    }

    /// The charge id when Stripe still reports one, else the invoice id.
    pub fn transaction_id(&self) -> &str {
        self.charge
            .as_deref()
            .filter(|c| !c.is_empty())
            .unwrap_or(&self.id)
    }

    pub fn paid_at(&self) -> Option<DateTime<Utc>> {
        self.status_transitions.paid_at.and_then(timestamp)
    }

    pub fn payment_intent_object(&self) -> Option<&PaymentIntent> {
        self.payment_intent.as_ref()?.as_object()
    }
}

// ============================================================================
// Catalog & Customers
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub deleted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub deleted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvoiceItem {
    pub id: String,
    #[serde(default)]
    pub amount: i64,
    #[serde(default)]
    pub currency: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Refund {
    pub id: String,
    #[serde(default)]
    pub amount: i64,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub charge: Option<String>,
    #[serde(default)]
    pub payment_intent: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebhookEndpoint {
    pub id: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub enabled_events: Vec<String>,
    #[serde(default)]
    pub status: Option<String>,
}

// ============================================================================
// Events
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub livemode: bool,
    pub data: EventData,
    #[serde(default)]
    pub request: Option<EventRequest>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventData {
    pub object: Value,
    #[serde(default)]
    pub previous_attributes: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventRequest {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl Event {
    /// `customer.subscription.updated` becomes `customer_subscription_updated`.
    pub fn normalized_type(&self) -> String {
        normalize_event_type(&self.event_type)
    }

    pub fn object<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.data.object)
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        timestamp(self.created)
    }

    pub fn idempotency_key(&self) -> Option<&str> {
        self.request
            .as_ref()?
            .idempotency_key
            .as_deref()
            .filter(|k| !k.is_empty())
    }
}

pub fn normalize_event_type(event_type: &str) -> String {
    event_type.trim().replace('.', "_").to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_intent_is_told_apart_by_object_field() {
        let pi: Intent = serde_json::from_value(json!({
            "object": "payment_intent",
            "id": "pi_1",
            "status": "requires_action",
            "client_secret": "pi_1_secret"
        }))
        .unwrap();
        assert!(!pi.is_setup());
        assert_eq!(pi.client_secret(), Some("pi_1_secret"));

        let si: Intent = serde_json::from_value(json!({
            "object": "setup_intent",
            "id": "seti_1",
            "status": "succeeded"
        }))
        .unwrap();
        assert!(si.is_setup());
        assert_eq!(si.id(), "seti_1");
    }

    #[test]
    fn test_unknown_status_does_not_fail_decoding() {
        let pi: PaymentIntent =
            serde_json::from_value(json!({"id": "pi_1", "status": "brand_new_status"})).unwrap();
        assert_eq!(pi.status, PaymentIntentStatus::Unknown);
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(PaymentIntentStatus::RequiresAction.as_ref(), "requires_action");
        assert_eq!(SubscriptionStatus::PastDue.to_string(), "past_due");
    }

    #[test]
    fn test_latest_charge_prefers_new_field_then_embedded_list() {
        let pi: PaymentIntent =
            serde_json::from_value(json!({"id": "pi_1", "latest_charge": "ch_new"})).unwrap();
        assert_eq!(pi.latest_charge_id(), Some("ch_new"));

        let pi: PaymentIntent = serde_json::from_value(json!({
            "id": "pi_1",
            "charges": {"data": [{"id": "ch_old"}]}
        }))
        .unwrap();
        assert_eq!(pi.latest_charge_id(), Some("ch_old"));

        let pi: PaymentIntent = serde_json::from_value(json!({"id": "pi_1"})).unwrap();
        assert_eq!(pi.latest_charge_id(), None);
    }

    #[test]
    fn test_invoice_subscription_id_supports_both_shapes() {
        let legacy: StripeInvoice =
            serde_json::from_value(json!({"id": "in_1", "subscription": "sub_a"})).unwrap();
        assert_eq!(legacy.subscription_id(), Some("sub_a"));

        let current: StripeInvoice = serde_json::from_value(json!({
            "id": "in_2",
            "parent": {"subscription_details": {"subscription": "sub_b"}}
        }))
        .unwrap();
        assert_eq!(current.subscription_id(), Some("sub_b"));
    }

    #[test]
    fn test_invoice_transaction_id_falls_back_to_invoice_id() {
        let with_charge: StripeInvoice =
            serde_json::from_value(json!({"id": "in_1", "charge": "ch_1"})).unwrap();
        assert_eq!(with_charge.transaction_id(), "ch_1");

        let without: StripeInvoice =
            serde_json::from_value(json!({"id": "in_2", "charge": null})).unwrap();
        assert_eq!(without.transaction_id(), "in_2");
    }

    #[test]
    fn test_subscription_period_falls_back_to_items() {
        let sub: Subscription = serde_json::from_value(json!({
            "id": "sub_1",
            "status": "active",
            "items": {"data": [{"id": "si_1", "current_period_end": 1_700_000_000}]}
        }))
        .unwrap();
        assert_eq!(sub.period_end().map(|d| d.timestamp()), Some(1_700_000_000));
    }

    #[test]
    fn test_generated_sepa_debit() {
        let charge: Charge = serde_json::from_value(json!({
            "id": "ch_1",
            "payment_method_details": {"type": "ideal", "ideal": {"generated_sepa_debit": "pm_sepa"}}
        }))
        .unwrap();
        assert_eq!(charge.generated_sepa_debit(), Some("pm_sepa"));
    }

    #[test]
    fn test_normalized_event_type() {
        assert_eq!(
            normalize_event_type("customer.subscription.updated"),
            "customer_subscription_updated"
        );
        assert_eq!(normalize_event_type("Charge.Refunded"), "charge_refunded");
    }
}
