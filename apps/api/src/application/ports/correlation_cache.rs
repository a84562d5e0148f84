use std::time::Duration;

use async_trait::async_trait;

use crate::app_error::AppResult;

/// Short-lived key/value storage for correlating requests.
///
/// Holds checkout session ids, setup-intent secrets and renewal charge
/// correlations. Entries expire on their own and losing one only means the
/// flow is restarted, so it must never hold idempotency markers.
#[async_trait]
pub trait CorrelationCache: Send + Sync {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> AppResult<()>;
    async fn get(&self, key: &str) -> AppResult<Option<String>>;
    async fn remove(&self, key: &str) -> AppResult<()>;
}
