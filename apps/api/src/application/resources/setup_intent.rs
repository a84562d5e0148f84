//! Setup intents used to replace the card on an existing subscription.

use async_trait::async_trait;
use getpaid_stripe_types::{SetupIntent, SetupIntentStatus, Subscription as RemoteSubscription};
use serde_json::{Value, json};

use super::{RemoteResource, StripeContext, customer::CustomerResource, without_empty};
use crate::{
    app_error::{AppError, AppResult},
    application::ports::stripe_api::{ApiRequest, ResourceKind, decode},
    domain::entities::{invoice::Invoice, stripe_mode::StripeMode, subscription::Subscription},
};

pub struct SetupIntentResource {
    ctx: StripeContext,
    subscription: Subscription,
    invoice: Invoice,
}

impl SetupIntentResource {
    /// `invoice` is the subscription's parent invoice.
    pub fn new(ctx: &StripeContext, subscription: &Subscription, invoice: &Invoice) -> Self {
        Self {
            ctx: ctx.clone(),
            subscription: subscription.clone(),
            invoice: invoice.clone(),
        }
    }

    fn id_key(&self) -> String {
        format!("stripe_setup_intent_id_{}", self.subscription.id)
    }

    fn secret_key(&self) -> String {
        format!("stripe_setup_intent_secret_{}", self.subscription.id)
    }

    async fn cache_keys(&self, intent_id: &str, client_secret: &str) -> AppResult<()> {
        let ttl = self.ctx.settings.correlation_ttl;
        self.ctx.cache.put(&self.id_key(), intent_id, ttl).await?;
        self.ctx
            .cache
            .put(&self.secret_key(), client_secret, ttl)
            .await
    }

    async fn clear_cache(&self) -> AppResult<()> {
        self.ctx.cache.remove(&self.id_key()).await?;
        self.ctx.cache.remove(&self.secret_key()).await
    }

    /// Client secret for the card update form, reusing a pending intent if one is cached.
    pub async fn begin(&self) -> AppResult<String> {
        if let Some(secret) = self.ctx.cache.get(&self.secret_key()).await? {
            return Ok(secret);
        }

        let intent = self.create().await?;
        let secret = intent.client_secret.clone().ok_or_else(|| AppError::GenericApiError {
            code: "missing_client_secret".into(),
            message: "Stripe returned a setup intent without a client secret".into(),
        })?;
        self.cache_keys(&intent.id, &secret).await?;
        Ok(secret)
    }

    /// Completes a card update after the customer returns from confirmation.
    pub async fn process(&self) -> AppResult<RemoteSubscription> {
        if self.get_remote_id().await?.is_none() {
            return Err(AppError::SetupIntentNotFound);
        }

        let intent = self.get().await?;
        let updated = set_default_payment_method(&self.ctx, self.mode(), &intent).await?;
        self.clear_cache().await?;
        Ok(updated)
    }
}

/// Makes a succeeded setup intent's payment method the default on the remote
/// subscription named by its `remote_id` metadata.
pub async fn set_default_payment_method(
    ctx: &StripeContext,
    mode: StripeMode,
    intent: &SetupIntent,
) -> AppResult<RemoteSubscription> {
    let remote_id = intent
        .metadata
        .get("remote_id")
        .filter(|id| !id.is_empty())
        .ok_or(AppError::SetupIntentNoSubscription)?;

    let payment_method = match intent.payment_method_id() {
        Some(pm) if intent.status == SetupIntentStatus::Succeeded => pm,
        _ => return Err(AppError::SetupIntentNotSucceeded),
    };

    let updated: RemoteSubscription = decode(
        ctx.api
            .call(
                mode,
                ApiRequest::update(
                    ResourceKind::Subscriptions,
                    remote_id,
                    json!({ "default_payment_method": payment_method }),
                ),
            )
            .await?,
    )?;

    tracing::info!(
        setup_intent_id = %intent.id,
        remote_subscription_id = %remote_id,
        payment_method = %payment_method,
        "Updated subscription payment method"
    );
    Ok(updated)
}

#[async_trait]
impl RemoteResource for SetupIntentResource {
    type Object = SetupIntent;

    fn context(&self) -> &StripeContext {
        &self.ctx
    }

    fn mode(&self) -> StripeMode {
        self.invoice.mode
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::SetupIntents
    }

    async fn get_remote_id(&self) -> AppResult<Option<String>> {
        self.ctx.cache.get(&self.id_key()).await
    }

    async fn get_args(&self) -> AppResult<Value> {
        let customer_id = CustomerResource::for_invoice(&self.ctx, &self.invoice)
            .resolve_id()
            .await?;
        let subscription_url = self.ctx.settings.subscription_url(self.subscription.id)?;

        Ok(without_empty(json!({
            "customer": customer_id,
            "usage": "off_session",
            "payment_method_types": self.ctx.settings.payment_method_types(true),
            "metadata": getpaid_stripe_types::clean_metadata([
                ("subscription_id", self.subscription.id.to_string()),
                ("subscription_url", subscription_url.to_string()),
                ("remote_id", self.subscription.profile_id.clone().unwrap_or_default()),
            ]),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::stripe_api::ApiMethod;
    use crate::test_utils::{
        FakeStripeApi, create_test_invoice, create_test_subscription, test_context,
    };
    use std::sync::Arc;

    fn fixtures() -> (Subscription, Invoice) {
        let invoice = create_test_invoice(|i| i.is_recurring = true);
        let subscription = create_test_subscription(invoice.id, |s| {
            s.profile_id = Some("sub_remote".into());
        });
        (subscription, invoice)
    }

    #[tokio::test]
    async fn test_process_without_cached_intent_fails() {
        let api = Arc::new(FakeStripeApi::new());
        let ctx = test_context(api);
        let (subscription, invoice) = fixtures();

        let err = SetupIntentResource::new(&ctx, &subscription, &invoice)
            .process()
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SetupIntentNotFound));
    }

    #[tokio::test]
    async fn test_begin_then_process_updates_default_payment_method() {
        let api = Arc::new(FakeStripeApi::new());
        let ctx = test_context(api.clone());
        let (subscription, invoice) = fixtures();
        let resource = SetupIntentResource::new(&ctx, &subscription, &invoice);

        let secret = resource.begin().await.unwrap();
        assert!(!secret.is_empty());
        let created = api.last_call(ResourceKind::SetupIntents, ApiMethod::Create).unwrap();
        assert_eq!(created.params["metadata"]["remote_id"], "sub_remote");

        let intent_id = resource.get_remote_id().await.unwrap().unwrap();
        api.put_object(
            ResourceKind::SetupIntents,
            &intent_id,
            json!({
                "id": intent_id,
                "status": "succeeded",
                "payment_method": "pm_new",
                "metadata": {"remote_id": "sub_remote"}
            }),
        );
        api.put_object(
            ResourceKind::Subscriptions,
            "sub_remote",
            json!({"id": "sub_remote", "status": "active"}),
        );

        resource.process().await.unwrap();

        let update = api
            .last_call(ResourceKind::Subscriptions, ApiMethod::Update)
            .unwrap();
        assert_eq!(update.id.as_deref(), Some("sub_remote"));
        assert_eq!(update.params["default_payment_method"], "pm_new");
        assert_eq!(resource.get_remote_id().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unsucceeded_or_orphan_intents_are_rejected() {
        let api = Arc::new(FakeStripeApi::new());
        let ctx = test_context(api);

        let orphan: SetupIntent = serde_json::from_value(
            json!({"id": "seti_1", "status": "succeeded", "payment_method": "pm_1"}),
        )
        .unwrap();
        let err = set_default_payment_method(&ctx, StripeMode::Sandbox, &orphan)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SetupIntentNoSubscription));

        let pending: SetupIntent = serde_json::from_value(json!({
            "id": "seti_2",
            "status": "requires_action",
            "payment_method": "pm_1",
            "metadata": {"remote_id": "sub_1"}
        }))
        .unwrap();
        let err = set_default_payment_method(&ctx, StripeMode::Sandbox, &pending)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SetupIntentNotSucceeded));
    }
}
