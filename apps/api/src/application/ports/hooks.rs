use async_trait::async_trait;
use getpaid_stripe_types::{Event, Subscription as RemoteSubscription};

use crate::domain::entities::subscription::Subscription;

/// Downstream notifications fired by the webhook dispatcher.
#[async_trait]
pub trait BillingHooks: Send + Sync {
    /// Runs after every dispatched event, handled or not.
    async fn stripe_event(&self, event_type: &str, event: &Event);

    /// Runs for every `customer.subscription.updated` on a live local subscription.
    async fn subscription_status(&self, subscription: &Subscription, remote: &RemoteSubscription);
}
