use thiserror::Error;

/// Infrastructure errors that can occur during application startup.
///
/// SECURITY: Display messages are sanitized and safe for logs/console output.
/// Debug output includes the full #[source] error chain which may contain
/// secrets (e.g., connection strings) - use Display (%e) not Debug (?e) in logs.
#[derive(Error, Debug)]
pub enum InfraError {
    #[error("Database connection failed. Check DATABASE_URL and ensure the database is running.")]
    DatabaseConnection(#[source] sqlx::Error),

    #[error("Database migration failed")]
    Migration(#[source] sqlx::migrate::MigrateError),

    #[error("Redis connection failed. Check REDIS_URL and credentials.")]
    RedisConnection(#[source] redis::RedisError),

    #[error("Configuration error: environment variable {var} not set")]
    ConfigMissing { var: &'static str },

    #[error("Configuration error: {var} is invalid: {message}")]
    ConfigInvalid { var: &'static str, message: String },

    #[error("HTTP client initialization failed")]
    HttpClient(#[source] reqwest::Error),

    #[error("Log file could not be created")]
    LogFile(#[source] std::io::Error),
}

impl From<sqlx::Error> for InfraError {
    fn from(e: sqlx::Error) -> Self {
        InfraError::DatabaseConnection(e)
    }
}

impl From<sqlx::migrate::MigrateError> for InfraError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        InfraError::Migration(e)
    }
}

impl From<redis::RedisError> for InfraError {
    fn from(e: redis::RedisError) -> Self {
        InfraError::RedisConnection(e)
    }
}
