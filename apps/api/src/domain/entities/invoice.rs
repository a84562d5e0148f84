use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::stripe_mode::StripeMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "invoice_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    #[default]
    Pending,
    Processing,
    OnHold,
    Paid,
    Refunded,
    Cancelled,
    Failed,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::Processing => "processing",
            InvoiceStatus::OnHold => "on_hold",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Refunded => "refunded",
            InvoiceStatus::Cancelled => "cancelled",
            InvoiceStatus::Failed => "failed",
        }
    }

    pub fn is_paid(&self) -> bool {
        matches!(self, InvoiceStatus::Paid)
    }
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for InvoiceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "draft" => Ok(InvoiceStatus::Draft),
            "pending" => Ok(InvoiceStatus::Pending),
            "processing" => Ok(InvoiceStatus::Processing),
            "on_hold" => Ok(InvoiceStatus::OnHold),
            "paid" => Ok(InvoiceStatus::Paid),
            "refunded" => Ok(InvoiceStatus::Refunded),
            "cancelled" => Ok(InvoiceStatus::Cancelled),
            "failed" => Ok(InvoiceStatus::Failed),
            _ => Err(format!("Invalid invoice status: {s}")),
        }
    }
}

/// One billed item on an invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub item_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub is_recurring: bool,
}

impl InvoiceLine {
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: i64,
    /// Opaque key used in customer-facing URLs.
    pub key: String,
    pub number: String,
    pub status: InvoiceStatus,
    pub mode: StripeMode,
    pub currency: String,
    /// Amount due now.
    pub total: Decimal,
    pub recurring_total: Decimal,
    pub is_recurring: bool,
    pub has_free_trial: bool,
    pub transaction_id: Option<String>,
    pub remote_subscription_id: Option<String>,
    pub customer_user_id: Option<i64>,
    pub customer_email: String,
    pub customer_name: String,
    pub description: Option<String>,
    pub items: Vec<InvoiceLine>,
    pub metadata: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl Invoice {
    pub fn is_paid(&self) -> bool {
        self.status.is_paid()
    }

    pub fn is_refunded(&self) -> bool {
        matches!(self.status, InvoiceStatus::Refunded)
    }

    pub fn is_free(&self) -> bool {
        self.total.is_zero()
    }

    /// Recurring invoices with nothing due now only need a saved payment method.
    pub fn needs_setup_intent(&self) -> bool {
        self.is_recurring && self.is_free()
    }

    pub fn has_transaction_id(&self, transaction_id: &str) -> bool {
        self.transaction_id.as_deref() == Some(transaction_id)
    }

    pub fn line(&self, item_id: i64) -> Option<&InvoiceLine> {
        self.items.iter().find(|line| line.item_id == item_id)
    }

    /// Text sent to Stripe as the payment description.
    pub fn remote_description(&self) -> String {
        match &self.description {
            Some(description) if !description.trim().is_empty() => description.clone(),
            _ => self
                .items
                .iter()
                .map(|line| line.name.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}
