//! API Guard library
//!
//! Token-bucket rate limiting, request correlation and the middleware
//! pipeline that composes them, usable around any axum `Router`.

// Public modules
pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod middleware;
pub mod server;
pub mod services;

// Re-export commonly used types
pub use config::Settings;
pub use error::ApiError;
pub use middleware::RequestId;
pub use server::App;
pub use services::RateLimiter;
