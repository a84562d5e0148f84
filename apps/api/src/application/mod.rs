pub mod app_error;
pub mod ports;
pub mod resources;
pub mod use_cases;
