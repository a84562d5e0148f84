use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

/// Currencies Stripe charges in whole units.
const ZERO_DECIMAL_CURRENCIES: [&str; 16] = [
    "BIF", "CLP", "DJF", "GNF", "JPY", "KMF", "KRW", "MGA", "PYG", "RWF", "UGX", "VND", "VUV",
    "XAF", "XOF", "XPF",
];

pub fn is_zero_decimal(currency: &str) -> bool {
    ZERO_DECIMAL_CURRENCIES
        .iter()
        .any(|c| c.eq_ignore_ascii_case(currency.trim()))
}

/// Converts a local amount into the integer Stripe expects.
///
/// Zero-decimal currencies are sent as-is; everything else is multiplied by 100.
/// Halves round away from zero. Saturates at `i64::MAX`.
pub fn to_minor_units(amount: Decimal, currency: &str) -> i64 {
    let scaled = if is_zero_decimal(currency) {
        amount
    } else {
        amount * Decimal::ONE_HUNDRED
    };

    scaled
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .unwrap_or(i64::MAX)
}

pub fn from_minor_units(minor: i64, currency: &str) -> Decimal {
    if is_zero_decimal(currency) {
        Decimal::from(minor)
    } else {
        Decimal::new(minor, 2)
    }
}

/// Smallest amount Stripe will charge in the given currency.
///
/// Unlisted currencies fall back to 0.50, or 50 for zero-decimal currencies.
pub fn minimum_amount(currency: &str) -> Decimal {
    let cents = |v: i64| Decimal::new(v, 2);

    match currency.trim().to_ascii_uppercase().as_str() {
        "USD" | "AUD" | "BRL" | "CAD" | "CHF" | "EUR" | "INR" | "NZD" | "SGD" => cents(50),
        "AED" | "MYR" | "PLN" | "RON" => Decimal::from(2),
        "BGN" => Decimal::ONE,
        "CZK" => Decimal::from(15),
        "DKK" => cents(250),
        "GBP" => cents(30),
        "HKD" => Decimal::from(4),
        "HUF" => Decimal::from(175),
        "JPY" => Decimal::from(50),
        "MXN" => Decimal::from(10),
        "NOK" | "SEK" => Decimal::from(3),
        other if is_zero_decimal(other) => Decimal::from(50),
        _ => cents(50),
    }
}
