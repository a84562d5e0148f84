use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::{
    adapters::persistence::PostgresPersistence,
    app_error::{AppError, AppResult},
    application::ports::store::SubscriptionRepo,
    domain::entities::subscription::{Subscription, SubscriptionStatus},
};

fn row_to_subscription(row: &sqlx::postgres::PgRow) -> Subscription {
    Subscription {
        id: row.get("id"),
        parent_invoice_id: row.get("parent_invoice_id"),
        customer_user_id: row.get("customer_user_id"),
        item_ids: row.get("item_ids"),
        status: row.get("status"),
        profile_id: row.get("profile_id"),
        period: row.get("period"),
        frequency: row.get("frequency"),
        bill_times: row.get("bill_times"),
        initial_amount: row.get("initial_amount"),
        recurring_amount: row.get("recurring_amount"),
        is_trialing: row.get("is_trialing"),
        expiration: row.get("expiration"),
        created_at: row.get("created_at"),
    }
}

const SELECT_COLS: &str = r#"
    id, parent_invoice_id, customer_user_id, item_ids, status, profile_id, period,
    frequency, bill_times, initial_amount, recurring_amount, is_trialing, expiration,
    created_at
"#;

impl PostgresPersistence {
    async fn set_subscription_status(&self, id: i64, status: SubscriptionStatus) -> AppResult<()> {
        let result =
            sqlx::query("UPDATE subscriptions SET status = $2::subscription_status WHERE id = $1")
                .bind(id)
                .bind(status.as_str())
                .execute(&self.pool)
                .await
                .map_err(AppError::from)?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl SubscriptionRepo for PostgresPersistence {
    async fn get_by_id(&self, id: i64) -> AppResult<Option<Subscription>> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLS} FROM subscriptions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(row.as_ref().map(row_to_subscription))
    }

    async fn get_by_profile_id(&self, profile_id: &str) -> AppResult<Option<Subscription>> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLS} FROM subscriptions WHERE profile_id = $1 ORDER BY id LIMIT 1"
        ))
        .bind(profile_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(row.as_ref().map(row_to_subscription))
    }

    async fn list_by_invoice(&self, invoice_id: i64) -> AppResult<Vec<Subscription>> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLS} FROM subscriptions WHERE parent_invoice_id = $1 ORDER BY id"
        ))
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(rows.iter().map(row_to_subscription).collect())
    }

    async fn list_by_status(&self, statuses: &[SubscriptionStatus]) -> AppResult<Vec<Subscription>> {
        let statuses: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLS} FROM subscriptions WHERE status::text = ANY($1) ORDER BY id"
        ))
        .bind(&statuses)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(rows.iter().map(row_to_subscription).collect())
    }

    async fn set_profile_id(&self, id: i64, profile_id: &str) -> AppResult<()> {
        sqlx::query("UPDATE subscriptions SET profile_id = $2 WHERE id = $1")
            .bind(id)
            .bind(profile_id)
            .execute(&self.pool)
            .await
            .map_err(AppError::from)?;
        Ok(())
    }

    async fn activate(&self, id: i64) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = CASE WHEN is_trialing THEN 'trialing'::subscription_status
                              ELSE 'active'::subscription_status END
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(())
    }

    async fn set_dates(
        &self,
        id: i64,
        created_at: Option<DateTime<Utc>>,
        expiration: Option<DateTime<Utc>>,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE subscriptions
            SET created_at = COALESCE($2, created_at),
                expiration = COALESCE($3, expiration)
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(created_at)
        .bind(expiration)
        .execute(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(())
    }

    async fn set_expiration(&self, id: i64, expiration: DateTime<Utc>) -> AppResult<()> {
        sqlx::query("UPDATE subscriptions SET expiration = $2 WHERE id = $1")
            .bind(id)
            .bind(expiration)
            .execute(&self.pool)
            .await
            .map_err(AppError::from)?;
        Ok(())
    }

    /// Completes the subscription once `bill_times` renewals have been billed.
    async fn renew(&self, id: i64, period_start: DateTime<Utc>) -> AppResult<()> {
        let subscription = SubscriptionRepo::get_by_id(self, id)
            .await?
            .ok_or(AppError::NotFound)?;
        let frequency = u32::try_from(subscription.frequency.max(1)).unwrap_or(1);
        let expiration = subscription
            .period
            .advance(period_start, frequency)
            .ok_or_else(|| AppError::Internal(format!("Renewal date overflow for subscription {id}")))?;

        sqlx::query(
            r#"
            UPDATE subscriptions
            SET bill_count = bill_count + 1,
                expiration = $2,
                is_trialing = FALSE,
                status = CASE WHEN bill_times > 0 AND bill_count + 1 >= bill_times
                              THEN 'completed'::subscription_status
                              ELSE 'active'::subscription_status END
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(expiration)
        .execute(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(())
    }

    async fn failing(&self, id: i64) -> AppResult<()> {
        self.set_subscription_status(id, SubscriptionStatus::Failing)
            .await
    }

    async fn cancel(&self, id: i64) -> AppResult<()> {
        self.set_subscription_status(id, SubscriptionStatus::Cancelled)
            .await
    }
}
