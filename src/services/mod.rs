//! Services module
//!
//! Contains the in-memory admission logic used by the middleware.

pub mod rate_limiter;

pub use rate_limiter::{
    Decision, RateLimiter, TokenBucket, RATE_LIMIT_LIMIT_HEADER, RATE_LIMIT_REMAINING_HEADER,
};
