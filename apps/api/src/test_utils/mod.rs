//! Test utilities for integration testing.
//!
//! This module provides:
//! - Test data factories for creating valid test fixtures
//! - In-memory store implementations and a fake Stripe API
//! - Helper builders for constructing use case instances with test dependencies

mod app_state_builder;
mod factories;
mod fake_stripe;
mod store_mocks;

pub use app_state_builder::*;
pub use factories::*;
pub use fake_stripe::*;
pub use store_mocks::*;
