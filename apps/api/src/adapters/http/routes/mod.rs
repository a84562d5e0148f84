mod admin;
mod checkout;
mod common;
mod stripe;

use axum::{Router, middleware};

use crate::adapters::http::{app_state::AppState, middleware::require_admin};

/// Returns the API router; admin routes are guarded by the admin bearer token.
pub fn router(app_state: AppState) -> Router<AppState> {
    let admin = admin::router().layer(middleware::from_fn_with_state(app_state, require_admin));

    Router::new()
        .nest("/stripe", stripe::router())
        .merge(checkout::router())
        .nest("/admin", admin)
}
