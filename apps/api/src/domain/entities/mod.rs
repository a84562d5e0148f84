pub mod invoice;
pub mod stripe_event;
pub mod stripe_mode;
pub mod subscription;
