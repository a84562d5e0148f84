use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use secrecy::ExposeSecret;

use crate::{adapters::http::app_state::AppState, app_error::AppError};

/// Guards the admin routes with the configured bearer token.
pub async fn require_admin(
    State(app_state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let presented = bearer_token(&request).ok_or(AppError::Unauthorized)?;

    if !constant_time_eq(
        presented.as_bytes(),
        app_state.config.admin_token.expose_secret().as_bytes(),
    ) {
        tracing::warn!(uri = %request.uri(), "Rejected admin request with invalid token");
        return Err(AppError::Unauthorized);
    }

    Ok(next.run(request).await)
}

fn bearer_token(req: &Request) -> Option<&str> {
    if let Some(header) = req.headers().get(AUTHORIZATION)
        && let Ok(value) = header.to_str()
        && let Some(token) = value.strip_prefix("Bearer ")
        && !token.trim().is_empty()
    {
        return Some(token.trim());
    }
    None
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
