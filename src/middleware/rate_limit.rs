//! Rate limiting middleware
//!
//! This module enforces a per-client token bucket in front of the router.
//! Clients are keyed by IP, taking reverse proxy headers into account.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use crate::error::ApiError;
use crate::services::rate_limiter::{Decision, RateLimiter};

// ============================================================================
// Types
// ============================================================================

/// Paths that are never rate limited, so orchestrator health probes always
/// get through.
pub const EXEMPT_PATHS: [&str; 2] = ["/health", "/v1/health"];

/// Bucket key used when nothing identifies the client
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Rate limit state shared across requests
#[derive(Clone)]
pub struct RateLimitState {
    pub limiter: Arc<RateLimiter>,
}

impl RateLimitState {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

// ============================================================================
// Rate Limit Errors
// ============================================================================

/// Rejection produced when a client has no tokens left
#[derive(Debug)]
pub struct RateLimitError {
    pub decision: Decision,
}

impl IntoResponse for RateLimitError {
    fn into_response(self) -> Response {
        let mut response = ApiError::RateLimitExceeded.into_response();
        self.decision.apply_headers(response.headers_mut());
        response
    }
}

// ============================================================================
// Rate Limit Middleware
// ============================================================================

/// Middleware to enforce rate limits
///
/// This middleware:
/// 1. Lets exempt health check paths straight through
/// 2. Derives the client key (see [`client_key`])
/// 3. Runs the admission check
/// 4. Returns 429 Too Many Requests if rate limited
///
/// # Headers
/// On every checked response:
/// - `X-RateLimit-Limit`: bucket capacity
/// - `X-RateLimit-Remaining`: whole tokens left
///
/// On rejection additionally:
/// - `Retry-After`: seconds until one token is available
pub async fn rate_limit(
    State(rate_state): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Result<Response, RateLimitError> {
    if is_exempt(request.uri().path()) {
        return Ok(next.run(request).await);
    }

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let key = client_key(request.headers(), peer);

    let decision = rate_state.limiter.admit(&key);

    if !decision.allowed {
        tracing::warn!(
            client = %key,
            retry_after_seconds = decision.retry_after_seconds.unwrap_or(1),
            "Rate limit exceeded"
        );
        return Err(RateLimitError { decision });
    }

    tracing::debug!(client = %key, remaining = decision.remaining, "Request admitted");

    let mut response = next.run(request).await;
    decision.apply_headers(response.headers_mut());

    Ok(response)
}

/// Whether `path` bypasses rate limiting
pub fn is_exempt(path: &str) -> bool {
    EXEMPT_PATHS.contains(&path)
}

/// Derive the rate limit key for a request
///
/// Precedence: first `X-Forwarded-For` entry, then `X-Real-IP`, then the
/// peer address, then [`UNKNOWN_CLIENT`]. The proxy headers are trusted as
/// sent; behind a proxy that is the only way to tell clients apart.
pub fn client_key(headers: &HeaderMap, peer: Option<IpAddr>) -> String {
    if let Some(forwarded) = header_str(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return forwarded.to_string();
    }

    if let Some(real_ip) = header_str(headers, "x-real-ip")
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return real_ip.to_string();
    }

    peer.map(|ip| ip.to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

// ============================================================================
// Tests
// ============================================================================
