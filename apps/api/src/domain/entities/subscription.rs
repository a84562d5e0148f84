use chrono::{DateTime, Duration, Months, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "subscription_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    #[default]
    Pending,
    Trialing,
    Active,
    Failing,
    Expired,
    Cancelled,
    Completed,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Pending => "pending",
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Failing => "failing",
            SubscriptionStatus::Expired => "expired",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Completed => "completed",
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(SubscriptionStatus::Pending),
            "trialing" => Ok(SubscriptionStatus::Trialing),
            "active" => Ok(SubscriptionStatus::Active),
            "failing" => Ok(SubscriptionStatus::Failing),
            "expired" => Ok(SubscriptionStatus::Expired),
            "cancelled" => Ok(SubscriptionStatus::Cancelled),
            "completed" => Ok(SubscriptionStatus::Completed),
            _ => Err(format!("Invalid subscription status: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "billing_period", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BillingPeriod {
    Day,
    Week,
    #[default]
    Month,
    Year,
}

impl BillingPeriod {
    /// Stripe's `recurring.interval` value.
    pub fn as_interval(&self) -> &'static str {
        match self {
            BillingPeriod::Day => "day",
            BillingPeriod::Week => "week",
            BillingPeriod::Month => "month",
            BillingPeriod::Year => "year",
        }
    }

    /// Moves `from` forward by `count` periods.
    pub fn advance(&self, from: DateTime<Utc>, count: u32) -> Option<DateTime<Utc>> {
        match self {
            BillingPeriod::Day => from.checked_add_signed(Duration::days(i64::from(count))),
            BillingPeriod::Week => from.checked_add_signed(Duration::weeks(i64::from(count))),
            BillingPeriod::Month => from.checked_add_months(Months::new(count)),
            BillingPeriod::Year => from.checked_add_months(Months::new(count.checked_mul(12)?)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: i64,
    pub parent_invoice_id: i64,
    pub customer_user_id: Option<i64>,
    /// Invoice items billed by this subscription.
    pub item_ids: Vec<i64>,
    pub status: SubscriptionStatus,
    /// Remote Stripe subscription id.
    pub profile_id: Option<String>,
    pub period: BillingPeriod,
    pub frequency: i32,
    /// Number of renewals before the subscription completes; 0 means unlimited.
    pub bill_times: i32,
    pub initial_amount: Decimal,
    pub recurring_amount: Decimal,
    pub is_trialing: bool,
    /// Next renewal date, also the current expiration.
    pub expiration: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    pub fn is_cancelled(&self) -> bool {
        matches!(self.status, SubscriptionStatus::Cancelled)
    }

    pub fn has_profile_id(&self, profile_id: &str) -> bool {
        self.profile_id.as_deref() == Some(profile_id)
    }
}
