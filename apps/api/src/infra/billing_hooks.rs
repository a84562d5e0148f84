use async_trait::async_trait;
use getpaid_stripe_types::{Event, Subscription as RemoteSubscription, SubscriptionStatus};

use crate::{
    application::ports::hooks::BillingHooks, domain::entities::subscription::Subscription,
};

/// Default hooks: structured log lines for downstream log shippers.
#[derive(Default)]
pub struct TracingHooks;

#[async_trait]
impl BillingHooks for TracingHooks {
    async fn stripe_event(&self, event_type: &str, event: &Event) {
        tracing::debug!(
            event_id = %event.id,
            event_type,
            livemode = event.livemode,
            "Stripe event dispatched"
        );
    }

    async fn subscription_status(&self, subscription: &Subscription, remote: &RemoteSubscription) {
        if remote.status == SubscriptionStatus::PastDue {
            tracing::warn!(
                subscription_id = subscription.id,
                remote_subscription_id = %remote.id,
                "Subscription payment failed, remote subscription is past due"
            );
            return;
        }

        tracing::info!(
            subscription_id = subscription.id,
            remote_subscription_id = %remote.id,
            status = %remote.status,
            "Remote subscription status updated"
        );
    }
}
