//! Error handling module

pub mod types;

pub use types::{handle_panic, ApiError, ErrorResponse};
