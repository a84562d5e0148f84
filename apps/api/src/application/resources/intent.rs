use async_trait::async_trait;
use getpaid_stripe_types::{Intent, ObjectKind, to_minor_units};
use serde_json::{Value, json};

use super::{RemoteResource, StripeContext, customer::CustomerResource, invoice_metadata, without_empty};
use crate::{
    app_error::AppResult,
    application::ports::{
        store::{MetaScope, meta_keys},
        stripe_api::{ApiRequest, ResourceKind, decode},
    },
    domain::entities::{invoice::Invoice, stripe_mode::StripeMode},
};

/// The payment or setup intent confirmed by the checkout payment element.
///
/// An invoice has at most one active intent: a setup intent when it is
/// recurring with nothing due now, a payment intent otherwise.
pub struct IntentResource {
    ctx: StripeContext,
    invoice: Invoice,
    explicit_id: Option<String>,
}

impl IntentResource {
    pub fn for_invoice(ctx: &StripeContext, invoice: &Invoice) -> Self {
        Self {
            ctx: ctx.clone(),
            invoice: invoice.clone(),
            explicit_id: None,
        }
    }

    /// Adapter for a known intent id, e.g. one echoed back on a redirect.
    pub fn with_id(ctx: &StripeContext, invoice: &Invoice, intent_id: &str) -> Self {
        Self {
            ctx: ctx.clone(),
            invoice: invoice.clone(),
            explicit_id: Some(intent_id.to_string()),
        }
    }

    fn uses_setup_intent(&self) -> bool {
        match &self.explicit_id {
            Some(id) => ObjectKind::is_setup_intent(id),
            None => self.invoice.needs_setup_intent(),
        }
    }

    /// Stored intent id for the invoice, if it matches the kind the invoice needs now.
    async fn stored_id(&self) -> AppResult<Option<String>> {
        let from_transaction = self
            .invoice
            .transaction_id
            .as_deref()
            .filter(|id| ObjectKind::is_payment_intent(id))
            .map(str::to_owned);

        let id = match from_transaction {
            Some(id) => Some(id),
            None => self
                .ctx
                .meta
                .get_meta(MetaScope::Invoice(self.invoice.id), meta_keys::INTENT_ID)
                .await?,
        };

        Ok(id
            .filter(|id| !id.is_empty())
            .filter(|id| ObjectKind::is_setup_intent(id) == self.invoice.needs_setup_intent()))
    }

    /// Whether the existing intent already has a customer attached.
    async fn has_customer(&self) -> AppResult<bool> {
        Ok(self.get().await?.customer_id().is_some())
    }

    fn setup_args(&self, customer_id: &str, metadata: Value) -> Value {
        json!({
            "customer": customer_id,
            "metadata": metadata,
            "usage": "off_session",
            "payment_method_types": self.ctx.settings.payment_method_types(true),
        })
    }

    fn payment_args(&self, customer_id: &str, metadata: Value) -> Value {
        let invoice = &self.invoice;
        let mut args = json!({
            "customer": customer_id,
            "amount": to_minor_units(invoice.total, &invoice.currency),
            "currency": invoice.currency.to_lowercase(),
            "metadata": metadata,
            "description": format!("Payment for invoice {}", invoice.number),
            "payment_method_types": self.ctx.settings.payment_method_types(invoice.is_recurring),
        });
        if invoice.is_recurring {
            args["setup_future_usage"] = json!("off_session");
        }
        args
    }

    pub async fn confirm(&self, payment_method: Option<&str>) -> AppResult<Intent> {
        let id = self.require_remote_id().await?;
        let params = match payment_method {
            Some(pm) => json!({ "payment_method": pm }),
            None => Value::Null,
        };
        decode(self.call(ApiRequest::confirm(self.kind(), &id, params)).await?)
    }
}

#[async_trait]
impl RemoteResource for IntentResource {
    type Object = Intent;

    fn context(&self) -> &StripeContext {
        &self.ctx
    }

    fn mode(&self) -> StripeMode {
        self.invoice.mode
    }

    fn kind(&self) -> ResourceKind {
        if self.uses_setup_intent() {
            ResourceKind::SetupIntents
        } else {
            ResourceKind::PaymentIntents
        }
    }

    async fn get_remote_id(&self) -> AppResult<Option<String>> {
        match &self.explicit_id {
            Some(id) => Ok(Some(id.clone())),
            None => self.stored_id().await,
        }
    }

    async fn get_args(&self) -> AppResult<Value> {
        let customer_id = CustomerResource::for_invoice(&self.ctx, &self.invoice)
            .resolve_id()
            .await?;
        let metadata = json!(invoice_metadata(&self.invoice, &self.ctx.settings, [])?);

        let mut args = if self.uses_setup_intent() {
            self.setup_args(&customer_id, metadata)
        } else {
            self.payment_args(&customer_id, metadata)
        };

        // Existing intents keep their customer and payment method types.
        if self.get_remote_id().await?.is_some()
            && let Some(map) = args.as_object_mut()
        {
            map.remove("payment_method_types");
            if self.has_customer().await? {
                map.remove("customer");
            }
        }

        Ok(without_empty(args))
    }
}
