pub mod correlation_cache;
pub mod hooks;
pub mod store;
pub mod stripe_api;
