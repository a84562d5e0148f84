use std::time::Duration;

use async_trait::async_trait;
use redis::{AsyncCommands, aio::ConnectionManager};

use crate::{
    app_error::{AppError, AppResult},
    application::ports::correlation_cache::CorrelationCache,
    infra::error::InfraError,
};

/// Redis-backed correlation cache shared by every API instance.
#[derive(Clone)]
pub struct RedisCorrelationCache {
    manager: ConnectionManager,
}

impl RedisCorrelationCache {
    pub async fn new(redis_url: &str) -> Result<Self, InfraError> {
        let client = redis::Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self { manager })
    }

    fn key(key: &str) -> String {
        format!("getpaid_stripe:{key}")
    }
}

fn cache_error(e: redis::RedisError) -> AppError {
    AppError::Internal(format!("Correlation cache unavailable: {e}"))
}

#[async_trait]
impl CorrelationCache for RedisCorrelationCache {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> AppResult<()> {
        let mut conn = self.manager.clone();
        let ttl_secs = ttl.as_secs().max(1);

        let _: () = conn
            .set_ex(Self::key(key), value, ttl_secs)
            .await
            .map_err(cache_error)?;
        Ok(())
    }

    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let mut conn = self.manager.clone();
        conn.get(Self::key(key)).await.map_err(cache_error)
    }

    async fn remove(&self, key: &str) -> AppResult<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.del(Self::key(key)).await.map_err(cache_error)?;
        Ok(())
    }
}
