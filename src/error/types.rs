//! API error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::any::Any;
use thiserror::Error;

use crate::middleware::request_id::RequestId;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Too many requests. Please retry later.")]
    RateLimitExceeded,

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    /// Error kind reported in the `error` field of the response body
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "NotFoundError",
            ApiError::RateLimitExceeded => "RateLimitExceededError",
            ApiError::Internal(_) => "InternalServerError",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let detail = match &self {
            ApiError::NotFound(msg) => msg.clone(),
            ApiError::RateLimitExceeded => self.to_string(),
            ApiError::Internal(err) => {
                tracing::error!(error = %err, "Unhandled internal error");
                "An unexpected error occurred".to_string()
            }
        };

        let body = ErrorResponse {
            error: self.kind().to_string(),
            detail,
            request_id: RequestId::current().map(|id| id.to_string()),
        };

        (self.status_code(), Json(body)).into_response()
    }
}

/// JSON error body shared by every error response
///
/// `request_id` is always present, `null` when the request has no id.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub detail: String,
    pub request_id: Option<String>,
}

/// Convert a caught handler panic into a 500 response
///
/// Used with `tower_http::catch_panic::CatchPanicLayer::custom`. It runs
/// inside the request-id scope, so the body still carries the id.
pub fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let message = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic payload".to_string()
    };

    ApiError::Internal(anyhow::anyhow!("handler panicked: {}", message)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            ApiError::NotFound("x".into()).into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::RateLimitExceeded.into_response().status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ApiError::Internal(anyhow::anyhow!("boom")).into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(ApiError::RateLimitExceeded.kind(), "RateLimitExceededError");
        assert_eq!(ApiError::NotFound("x".into()).kind(), "NotFoundError");
        assert_eq!(
            ApiError::Internal(anyhow::anyhow!("boom")).kind(),
            "InternalServerError"
        );
    }

    #[test]
    fn test_rate_limit_detail() {
        assert_eq!(
            ApiError::RateLimitExceeded.to_string(),
            "Too many requests. Please retry later."
        );
    }

    #[tokio::test]
    async fn test_body_carries_current_request_id() {
        let response = RequestId::from_headers(&Default::default())
            .scope(async { ApiError::NotFound("no such user".into()).into_response() })
            .await;

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: ErrorResponse = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(body.error, "NotFoundError");
        assert_eq!(body.detail, "no such user");
        assert!(body.request_id.is_some());
    }

    #[tokio::test]
    async fn test_body_request_id_is_null_outside_scope() {
        let response = ApiError::RateLimitExceeded.into_response();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(body["request_id"], serde_json::Value::Null);
    }

    #[test]
    fn test_handle_panic_is_internal_error() {
        let response = handle_panic(Box::new("exploded"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
