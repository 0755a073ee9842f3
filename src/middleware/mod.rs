//! Middleware module
//!
//! Contains the HTTP middleware pipeline: request correlation, rate limiting
//! and CORS.

pub mod cors;
pub mod rate_limit;
pub mod request_id;

// Re-export commonly used items
pub use cors::create_cors_layer;
pub use rate_limit::{client_key, rate_limit, RateLimitError, RateLimitState, EXEMPT_PATHS};
pub use request_id::{track_request, RequestId, REQUEST_ID_HEADER};
