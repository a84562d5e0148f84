use sqlx::PgPool;

use crate::app_error::AppError;

const MAX_JSON_LOG_LEN: usize = 200;

/// Decodes a JSONB column, falling back to the empty value.
///
/// SQL NULL is treated as empty without a warning; anything that fails to
/// decode is logged against the row and replaced by `T::default()`.
pub fn parse_json_column<T: serde::de::DeserializeOwned + Default>(
    json: &serde_json::Value,
    column: &str,
    invoice_id: i64,
) -> T {
    if json.is_null() {
        return T::default();
    }

    serde_json::from_value(json.clone()).unwrap_or_else(|err| {
        let raw: String = json.to_string().chars().take(MAX_JSON_LOG_LEN).collect();
        tracing::warn!(
            column,
            invoice_id,
            raw_json = %raw,
            error = %err,
            "Unreadable JSON column, using empty value"
        );
        T::default()
    })
}

pub mod invoice;
pub mod stripe_meta;
pub mod subscription;

#[derive(Clone)]
pub struct PostgresPersistence {
    pool: PgPool,
}

impl PostgresPersistence {
    pub fn new(pool: PgPool) -> Self {
        PostgresPersistence { pool }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => AppError::NotFound,
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                AppError::InvalidInput("A record with this value already exists".into())
            }
            sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
                AppError::InvalidInput("Referenced record not found".into())
            }
            _ => {
                // Details stay in the log.
                tracing::error!(error = ?err, "Database error");
                AppError::Database("Database operation failed".into())
            }
        }
    }
}
