use strum::{AsRefStr, EnumIter, EnumString, IntoEnumIterator};

/// Stripe webhook events with a reconciliation handler.
///
/// Parsed from the normalized event type (`charge.refunded` -> `charge_refunded`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, AsRefStr, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum StripeEventKind {
    ChargeRefunded,
    CheckoutSessionCompleted,
    CustomerSubscriptionDeleted,
    CustomerSubscriptionUpdated,
    InvoicePaymentFailed,
    InvoicePaymentSucceeded,
    PaymentIntentSucceeded,
    SetupIntentSucceeded,
}

impl StripeEventKind {
    pub fn from_normalized(event_type: &str) -> Option<Self> {
        event_type.parse().ok()
    }

    /// Dotted name as Stripe sends it and expects it in `enabled_events`.
    pub fn remote_name(&self) -> &'static str {
        match self {
            StripeEventKind::ChargeRefunded => "charge.refunded",
            StripeEventKind::CheckoutSessionCompleted => "checkout.session.completed",
            StripeEventKind::CustomerSubscriptionDeleted => "customer.subscription.deleted",
            StripeEventKind::CustomerSubscriptionUpdated => "customer.subscription.updated",
            StripeEventKind::InvoicePaymentFailed => "invoice.payment_failed",
            StripeEventKind::InvoicePaymentSucceeded => "invoice.payment_succeeded",
            StripeEventKind::PaymentIntentSucceeded => "payment_intent.succeeded",
            StripeEventKind::SetupIntentSucceeded => "setup_intent.succeeded",
        }
    }

    pub fn enabled_events() -> Vec<&'static str> {
        Self::iter().map(|kind| kind.remote_name()).collect()
    }
}
