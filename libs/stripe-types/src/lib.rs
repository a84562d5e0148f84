//! Stripe object model shared by the GetPaid Stripe service.
//!
//! This crate provides:
//! - Remote objects as returned by the Stripe API (`PaymentIntent`, `SetupIntent`,
//!   `CheckoutSession`, `Subscription`, `StripeInvoice`, `Charge`, `Event`, ...)
//! - Id-prefix helpers used to tell payment intents, setup intents, charges and
//!   invoices apart
//! - Currency helpers (zero-decimal currencies, minor units, minimum charge amounts)
//! - Metadata cleaning to Stripe's size limits

mod currency;
mod errors;
mod expandable;
mod ids;
mod metadata;
mod objects;

pub use currency::{from_minor_units, is_zero_decimal, minimum_amount, to_minor_units};
pub use errors::{ApiErrorBody, ApiErrorObject};
pub use expandable::{Expandable, HasId};
pub use ids::{ObjectKind, is_valid_event_id};
pub use metadata::{
    MAX_METADATA_KEY_LEN, MAX_METADATA_KEYS, MAX_METADATA_VALUE_LEN, Metadata, clean_metadata,
};
pub use objects::*;
