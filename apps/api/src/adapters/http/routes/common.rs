//! Shared imports for the route modules.

// Core framework - re-exported for use by sibling modules
pub use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Redirect},
    routing::{get, post},
};
pub use serde::{Deserialize, Serialize};

// App-level imports
pub use crate::adapters::http::app_state::AppState;
pub use crate::app_error::{AppError, AppResult};
pub use crate::domain::entities::stripe_mode::StripeMode;
