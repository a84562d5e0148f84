pub mod payment;
pub mod reconciliation;
pub mod subscription_sync;
pub mod webhook;
