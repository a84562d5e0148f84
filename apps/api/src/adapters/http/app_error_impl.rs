use crate::app_error::{AppError, ErrorCode};
use axum::Json;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Log the error before it gets converted into a status response.
        tracing::error!(error = ?self, retryable = self.is_retryable(), "Request failed");

        let code = self.code();
        let message = self.user_message();
        match &self {
            AppError::Database(_) | AppError::Internal(_) => {
                error_resp(StatusCode::INTERNAL_SERVER_ERROR, code, None)
            }
            AppError::NotFound => error_resp(StatusCode::NOT_FOUND, code, None),
            AppError::Unauthorized => error_resp(StatusCode::UNAUTHORIZED, code, None),
            AppError::InvalidInput(msg) => {
                error_resp(StatusCode::BAD_REQUEST, code, Some(msg.clone()))
            }
            AppError::RateLimited { .. } => {
                error_resp(StatusCode::SERVICE_UNAVAILABLE, code, Some(message))
            }
            AppError::AuthenticationFailed { .. } | AppError::ConnectionFailed { .. } => {
                error_resp(StatusCode::BAD_GATEWAY, code, Some(message))
            }
            AppError::GenericApiError { .. } | AppError::Unknown => {
                error_resp(StatusCode::BAD_GATEWAY, code, Some(message))
            }
            // Checkout errors the customer can act on.
            AppError::CardDeclined { .. }
            | AppError::InvalidRequest { .. }
            | AppError::InvalidArgument { .. }
            | AppError::MinAmount { .. }
            | AppError::SetupIntentNotFound
            | AppError::SetupIntentNoSubscription
            | AppError::SetupIntentNotSucceeded => {
                error_resp(StatusCode::UNPROCESSABLE_ENTITY, code, Some(message))
            }
        }
    }
}

fn error_resp(status: StatusCode, code: ErrorCode, message: Option<String>) -> Response {
    let body = match message {
        Some(msg) => serde_json::json!({ "code": code.as_str(), "message": msg }),
        None => serde_json::json!({ "code": code.as_str() }),
    };
    (status, Json(body)).into_response()
}
