use thiserror::Error;

/// Friendly replacement for Stripe's raw card-declined message.
pub const CARD_DECLINED_MESSAGE: &str = "Your card was declined. Please contact your bank for more information or try again with a different card.";

#[derive(Error, Debug)]
pub enum AppError {
    // Remote API failures, translated by the Stripe client.
    #[error("{message}")]
    CardDeclined {
        code: String,
        message: String,
        decline_code: Option<String>,
    },

    #[error("{message}")]
    RateLimited { code: String, message: String },

    #[error("{message}")]
    InvalidRequest { code: String, message: String },

    #[error("{message}")]
    AuthenticationFailed { code: String, message: String },

    #[error("{message}")]
    ConnectionFailed { code: String, message: String },

    #[error("{message}")]
    GenericApiError { code: String, message: String },

    #[error("{message}")]
    InvalidArgument { code: String, message: String },

    #[error("An unknown error occured while contacting Stripe. Please verify your details then try again.")]
    Unknown,

    // Local payment failures.
    #[error("The minimum allowed amount is {minimum} {currency}.")]
    MinAmount { minimum: String, currency: String },

    #[error("Setup intent not found.")]
    SetupIntentNotFound,

    #[error("Subscription not found.")]
    SetupIntentNoSubscription,

    #[error("Setup intent not succeeded.")]
    SetupIntentNotSucceeded,

    // Service errors.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found")]
    NotFound,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        AppError::InvalidArgument {
            code: "invalid_argument".into(),
            message: message.into(),
        }
    }

    /// Whether the failure came from talking to Stripe.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            AppError::CardDeclined { .. }
                | AppError::RateLimited { .. }
                | AppError::InvalidRequest { .. }
                | AppError::AuthenticationFailed { .. }
                | AppError::ConnectionFailed { .. }
                | AppError::GenericApiError { .. }
                | AppError::InvalidArgument { .. }
                | AppError::Unknown
        )
    }

    /// Transient failures where re-delivering the same event may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::RateLimited { .. }
                | AppError::ConnectionFailed { .. }
                | AppError::GenericApiError { .. }
                | AppError::Database(_)
        )
    }

    /// Message shown to the customer at checkout.
    ///
    /// Card declines carry the decline code as auxiliary text.
    pub fn user_message(&self) -> String {
        match self {
            AppError::CardDeclined {
                message,
                decline_code: Some(decline_code),
                ..
            } => format!("{message} (The decline code is {decline_code})"),
            other => other.to_string(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::CardDeclined { .. } => ErrorCode::CardDeclined,
            AppError::RateLimited { .. } => ErrorCode::RateLimited,
            AppError::InvalidRequest { .. } => ErrorCode::InvalidRequest,
            AppError::AuthenticationFailed { .. } => ErrorCode::AuthenticationFailed,
            AppError::ConnectionFailed { .. } => ErrorCode::ConnectionFailed,
            AppError::GenericApiError { .. } => ErrorCode::ApiError,
            AppError::InvalidArgument { .. } => ErrorCode::InvalidArgument,
            AppError::Unknown => ErrorCode::UnknownError,
            AppError::MinAmount { .. } => ErrorCode::MinAmount,
            AppError::SetupIntentNotFound => ErrorCode::SetupIntentNotFound,
            AppError::SetupIntentNoSubscription => ErrorCode::SetupIntentNoSubscription,
            AppError::SetupIntentNotSucceeded => ErrorCode::SetupIntentNotSucceeded,
            AppError::InvalidInput(_) => ErrorCode::InvalidInput,
            AppError::NotFound => ErrorCode::NotFound,
            AppError::Unauthorized => ErrorCode::Unauthorized,
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::Internal(_) => ErrorCode::InternalError,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    CardDeclined,
    RateLimited,
    InvalidRequest,
    AuthenticationFailed,
    ConnectionFailed,
    ApiError,
    InvalidArgument,
    UnknownError,
    MinAmount,
    SetupIntentNotFound,
    SetupIntentNoSubscription,
    SetupIntentNotSucceeded,
    InvalidInput,
    NotFound,
    Unauthorized,
    DatabaseError,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::CardDeclined => "CARD_DECLINED",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::AuthenticationFailed => "AUTHENTICATION_FAILED",
            ErrorCode::ConnectionFailed => "CONNECTION_FAILED",
            ErrorCode::ApiError => "API_ERROR",
            ErrorCode::InvalidArgument => "INVALID_ARGUMENT",
            ErrorCode::UnknownError => "UNKNOWN_ERROR",
            ErrorCode::MinAmount => "MIN_AMOUNT",
            ErrorCode::SetupIntentNotFound => "SETUP_INTENT_NOT_FOUND",
            ErrorCode::SetupIntentNoSubscription => "SETUP_INTENT_NO_SUBSCRIPTION",
            ErrorCode::SetupIntentNotSucceeded => "SETUP_INTENT_NOT_SUCCEEDED",
            ErrorCode::InvalidInput => "INVALID_INPUT",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::DatabaseError => "DATABASE_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
