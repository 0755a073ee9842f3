//! Request correlation middleware
//!
//! This module assigns every inbound request a correlation id, makes it
//! available to everything that runs while the request is handled, and
//! echoes it back in the `X-Request-ID` response header.
//!
//! The id is reachable three ways:
//! - as a `RequestId` request extension,
//! - through [`RequestId::current`], backed by a task-local scope,
//! - as the `request_id` field of the `http_request` tracing span, so every
//!   log line emitted during the request carries it.

use axum::{
    extract::Request,
    http::{header, HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::future::Future;
use std::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

/// Header name for the request id
pub const REQUEST_ID_HEADER: &str = "x-request-id";

tokio::task_local! {
    static CURRENT_REQUEST_ID: RequestId;
}

/// Correlation id for a single request
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RequestId(String);

impl RequestId {
    /// Generate a new request id (UUID v4)
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Take the inbound `X-Request-ID` verbatim, or generate a fresh id when
    /// the header is absent, empty, or not valid visible ASCII.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        headers
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(|v| Self(v.to_string()))
            .unwrap_or_default()
    }

    /// Get the request id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The id of the request being handled by the current task, if any
    pub fn current() -> Option<RequestId> {
        CURRENT_REQUEST_ID.try_with(|id| id.clone()).ok()
    }

    /// Run `future` with this id as the current request id
    pub async fn scope<F: Future>(self, future: F) -> F::Output {
        CURRENT_REQUEST_ID.scope(self, future).await
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Middleware that assigns, propagates, and echoes request ids
///
/// This middleware:
/// - Extracts the id from `X-Request-ID` or generates a new one
/// - Stores it in request extensions and in the task-local scope
/// - Runs the rest of the stack inside an `http_request` span
/// - Logs the request and its outcome
/// - Adds the id to the response headers, whatever the outcome
///
/// Register it as the outermost layer so everything below can see the id.
pub async fn track_request(mut request: Request, next: Next) -> Response {
    let start = Instant::now();

    let request_id = RequestId::from_headers(request.headers());
    request.extensions_mut().insert(request_id.clone());

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let user_agent = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let span = tracing::info_span!(
        "http_request",
        request_id = %request_id,
        method = %method,
        path = %path,
    );

    let handled = async move {
        tracing::info!(
            user_agent = %user_agent.as_deref().unwrap_or("-"),
            "Incoming request"
        );

        let response = next.run(request).await;
        log_completion(&response, start);
        response
    }
    .instrument(span);

    let mut response = request_id.clone().scope(handled).await;

    if let Ok(value) = HeaderValue::from_str(request_id.as_str()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    response
}

fn log_completion(response: &Response, start: Instant) {
    let status = response.status();
    let status_code = status.as_u16();
    let duration_ms = format!("{:.2}", start.elapsed().as_secs_f64() * 1000.0);

    if status.is_server_error() {
        tracing::error!(status = status_code, duration_ms = %duration_ms, "Server error");
    } else if status.is_client_error() {
        tracing::warn!(status = status_code, duration_ms = %duration_ms, "Client error");
    } else {
        tracing::info!(status = status_code, duration_ms = %duration_ms, "Request completed");
    }
}
