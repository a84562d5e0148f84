use std::collections::BTreeMap;

use async_trait::async_trait;
use sqlx::Row;
use uuid::Uuid;

use crate::{
    adapters::persistence::{PostgresPersistence, parse_json_column},
    app_error::{AppError, AppResult},
    application::ports::store::{InvoiceRepo, RenewalPayment, meta_keys},
    domain::entities::{
        invoice::{Invoice, InvoiceLine, InvoiceStatus},
        subscription::Subscription,
    },
};

fn row_to_invoice(row: &sqlx::postgres::PgRow) -> Invoice {
    let id: i64 = row.get("id");
    let items_json: serde_json::Value = row.get("items");
    let metadata_json: serde_json::Value = row.get("metadata");

    Invoice {
        id,
        key: row.get("key"),
        number: row.get("number"),
        status: row.get("status"),
        mode: row.get("mode"),
        currency: row.get("currency"),
        total: row.get("total"),
        recurring_total: row.get("recurring_total"),
        is_recurring: row.get("is_recurring"),
        has_free_trial: row.get("has_free_trial"),
        transaction_id: row.get("transaction_id"),
        remote_subscription_id: row.get("remote_subscription_id"),
        customer_user_id: row.get("customer_user_id"),
        customer_email: row.get("customer_email"),
        customer_name: row.get("customer_name"),
        description: row.get("description"),
        items: parse_json_column::<Vec<InvoiceLine>>(&items_json, "items", id),
        metadata: parse_json_column::<BTreeMap<String, String>>(&metadata_json, "metadata", id),
        created_at: row.get("created_at"),
    }
}

const SELECT_COLS: &str = r#"
    id, key, number, status, mode, currency, total, recurring_total, is_recurring,
    has_free_trial, transaction_id, remote_subscription_id, customer_user_id,
    customer_email, customer_name, description, items, metadata, created_at
"#;

impl PostgresPersistence {
    async fn invoice_where(&self, clause: &str, value: &str) -> AppResult<Option<Invoice>> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLS} FROM invoices WHERE {clause} ORDER BY id LIMIT 1"
        ))
        .bind(value)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(row.as_ref().map(row_to_invoice))
    }

    async fn update_invoice(&self, sql: &str, id: i64, value: &str) -> AppResult<()> {
        let result = sqlx::query(sql)
            .bind(id)
            .bind(value)
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
impl InvoiceRepo for PostgresPersistence {
    async fn get_by_id(&self, id: i64) -> AppResult<Option<Invoice>> {
        let row = sqlx::query(&format!("SELECT {SELECT_COLS} FROM invoices WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::from)?;
        Ok(row.as_ref().map(row_to_invoice))
    }

    async fn get_by_key(&self, key: &str) -> AppResult<Option<Invoice>> {
        self.invoice_where("key = $1", key).await
    }

    async fn get_by_transaction_id(&self, transaction_id: &str) -> AppResult<Option<Invoice>> {
        self.invoice_where("transaction_id = $1", transaction_id)
            .await
    }

    async fn mark_paid(&self, id: i64) -> AppResult<()> {
        self.update_invoice(
            "UPDATE invoices SET status = $2::invoice_status, paid_at = COALESCE(paid_at, NOW()) WHERE id = $1",
            id,
            InvoiceStatus::Paid.as_str(),
        )
        .await
    }

    async fn set_status(&self, id: i64, status: InvoiceStatus) -> AppResult<()> {
        self.update_invoice(
            "UPDATE invoices SET status = $2::invoice_status WHERE id = $1",
            id,
            status.as_str(),
        )
        .await
    }

    async fn set_transaction_id(&self, id: i64, transaction_id: &str) -> AppResult<()> {
        self.update_invoice(
            "UPDATE invoices SET transaction_id = $2 WHERE id = $1",
            id,
            transaction_id,
        )
        .await
    }

    async fn set_remote_subscription_id(&self, id: i64, remote_id: &str) -> AppResult<()> {
        self.update_invoice(
            "UPDATE invoices SET remote_subscription_id = $2 WHERE id = $1",
            id,
            remote_id,
        )
        .await
    }

    async fn refund(&self, id: i64) -> AppResult<()> {
        self.update_invoice(
            "UPDATE invoices SET status = $2::invoice_status WHERE id = $1",
            id,
            InvoiceStatus::Refunded.as_str(),
        )
        .await
    }

    async fn add_note(&self, id: i64, note: &str, customer_visible: bool) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO invoice_notes (invoice_id, note, customer_visible) VALUES ($1, $2, $3)",
        )
        .bind(id)
        .bind(note)
        .bind(customer_visible)
        .execute(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(())
    }

    async fn record_payment(&self, id: i64, transaction_id: &str, note: &str) -> AppResult<()> {
        let mut tx = self.pool.begin().await.map_err(AppError::from)?;

        let result = sqlx::query(
            r#"
            UPDATE invoices
            SET transaction_id = $2,
                status = $3::invoice_status,
                paid_at = COALESCE(paid_at, NOW())
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(transaction_id)
        .bind(InvoiceStatus::Paid.as_str())
        .execute(&mut *tx)
        .await
        .map_err(AppError::from)?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }

        sqlx::query("INSERT INTO invoice_notes (invoice_id, note) VALUES ($1, $2)")
            .bind(id)
            .bind(note)
            .execute(&mut *tx)
            .await
            .map_err(AppError::from)?;

        tx.commit().await.map_err(AppError::from)?;
        Ok(())
    }

    async fn get_renewal(
        &self,
        subscription_id: i64,
        transaction_id: &str,
    ) -> AppResult<Option<Invoice>> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLS} FROM invoices WHERE subscription_id = $1 AND transaction_id = $2 ORDER BY id LIMIT 1"
        ))
        .bind(subscription_id)
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(row.as_ref().map(row_to_invoice))
    }

    async fn create_renewal(
        &self,
        subscription: &Subscription,
        payment: &RenewalPayment,
    ) -> AppResult<Invoice> {
        let parent = InvoiceRepo::get_by_id(self, subscription.parent_invoice_id)
            .await?
            .ok_or(AppError::NotFound)?;

        let items: Vec<InvoiceLine> = parent
            .items
            .iter()
            .filter(|line| subscription.item_ids.contains(&line.item_id))
            .map(|line| InvoiceLine {
                unit_price: subscription.recurring_amount,
                quantity: 1,
                ..line.clone()
            })
            .collect();
        let items_json = serde_json::to_value(&items)
            .map_err(|e| AppError::Internal(format!("Failed to encode invoice items: {e}")))?;

        let mut tx = self.pool.begin().await.map_err(AppError::from)?;

        let renewals: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM invoices WHERE parent_invoice_id = $1",
        )
        .bind(parent.id)
        .fetch_one(&mut *tx)
        .await
        .map_err(AppError::from)?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO invoices (
                key, number, status, mode, currency, total, recurring_total, is_recurring,
                has_free_trial, transaction_id, remote_subscription_id, customer_user_id,
                customer_email, customer_name, description, items, metadata,
                parent_invoice_id, subscription_id, paid_at, created_at
            )
            VALUES ($1, $2, 'paid', $3, $4, $5, $5, TRUE, FALSE, $6, $7, $8, $9, $10, $11, $12, '{{}}', $13, $14, $15, $16)
            RETURNING {SELECT_COLS}
            "#
        ))
        .bind(Uuid::new_v4().simple().to_string())
        .bind(format!("{}-{}", parent.number, renewals + 1))
        .bind(parent.mode)
        .bind(&parent.currency)
        .bind(subscription.recurring_amount)
        .bind(&payment.transaction_id)
        .bind(&parent.remote_subscription_id)
        .bind(parent.customer_user_id)
        .bind(&parent.customer_email)
        .bind(&parent.customer_name)
        .bind(&parent.description)
        .bind(items_json)
        .bind(parent.id)
        .bind(subscription.id)
        .bind(payment.completed_at)
        .bind(payment.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(AppError::from)?;
        let renewal = row_to_invoice(&row);

        if let Some(intent_id) = &payment.payment_intent_id {
            sqlx::query(
                "INSERT INTO stripe_meta (scope_kind, scope_id, key, value) VALUES ('invoice', $1, $2, $3)",
            )
            .bind(renewal.id)
            .bind(meta_keys::INTENT_ID)
            .bind(intent_id)
            .execute(&mut *tx)
            .await
            .map_err(AppError::from)?;
        }

        if let Some(charge_id) = &payment.charge_id {
            sqlx::query("INSERT INTO invoice_notes (invoice_id, note) VALUES ($1, $2)")
                .bind(renewal.id)
                .bind(format!("Stripe Charge ID: {charge_id}"))
                .execute(&mut *tx)
                .await
                .map_err(AppError::from)?;
        }

        tx.commit().await.map_err(AppError::from)?;

        tracing::info!(
            invoice_id = renewal.id,
            parent_invoice_id = parent.id,
            subscription_id = subscription.id,
            transaction_id = %payment.transaction_id,
            "Created renewal invoice"
        );
        Ok(renewal)
    }
}
