use async_trait::async_trait;

use crate::{
    adapters::persistence::PostgresPersistence,
    app_error::{AppError, AppResult},
    application::ports::store::{MetaScope, MetaStore},
};

/// Advisory-lock key for one marker, so concurrent swaps on it run one at a time.
fn lock_key(scope: MetaScope, key: &str) -> String {
    format!("stripe_meta:{}:{}:{key}", scope.kind(), scope.id())
}

#[async_trait]
impl MetaStore for PostgresPersistence {
    async fn get_meta(&self, scope: MetaScope, key: &str) -> AppResult<Option<String>> {
        sqlx::query_scalar(
            "SELECT value FROM stripe_meta WHERE scope_kind = $1 AND scope_id = $2 AND key = $3",
        )
        .bind(scope.kind())
        .bind(scope.id())
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::from)
    }

    async fn set_meta(&self, scope: MetaScope, key: &str, value: &str) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO stripe_meta (scope_kind, scope_id, key, value)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (scope_kind, scope_id, key)
            DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()
            "#,
        )
        .bind(scope.kind())
        .bind(scope.id())
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(())
    }

    async fn delete_meta(&self, scope: MetaScope, key: &str) -> AppResult<bool> {
        let result = sqlx::query(
            "DELETE FROM stripe_meta WHERE scope_kind = $1 AND scope_id = $2 AND key = $3",
        )
        .bind(scope.kind())
        .bind(scope.id())
        .bind(key)
        .execute(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(result.rows_affected() > 0)
    }

    async fn swap_meta(
        &self,
        scope: MetaScope,
        key: &str,
        value: &str,
    ) -> AppResult<Option<String>> {
        let mut tx = self.pool.begin().await.map_err(AppError::from)?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(lock_key(scope, key))
            .execute(&mut *tx)
            .await
            .map_err(AppError::from)?;

        let previous: Option<String> = sqlx::query_scalar(
            "SELECT value FROM stripe_meta WHERE scope_kind = $1 AND scope_id = $2 AND key = $3",
        )
        .bind(scope.kind())
        .bind(scope.id())
        .bind(key)
        .fetch_optional(&mut *tx)
        .await
        .map_err(AppError::from)?;

        sqlx::query(
            r#"
            INSERT INTO stripe_meta (scope_kind, scope_id, key, value)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (scope_kind, scope_id, key)
            DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()
            "#,
        )
        .bind(scope.kind())
        .bind(scope.id())
        .bind(key)
        .bind(value)
        .execute(&mut *tx)
        .await
        .map_err(AppError::from)?;

        tx.commit().await.map_err(AppError::from)?;
        Ok(previous)
    }

    async fn claim_meta(&self, scope: MetaScope, key: &str, value: &str) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO stripe_meta (scope_kind, scope_id, key, value)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (scope_kind, scope_id, key) DO NOTHING
            "#,
        )
        .bind(scope.kind())
        .bind(scope.id())
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(result.rows_affected() == 1)
    }

    async fn find_invoice_id(&self, key: &str, value: &str) -> AppResult<Option<i64>> {
        sqlx::query_scalar(
            r#"
            SELECT scope_id FROM stripe_meta
            WHERE scope_kind = 'invoice' AND key = $1 AND value = $2
            ORDER BY scope_id
            LIMIT 1
            "#,
        )
        .bind(key)
        .bind(value)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::from)
    }
}
