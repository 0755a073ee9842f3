//! Application routing
//!
//! This module defines all HTTP routes and the middleware pipeline.

use axum::{middleware, routing::get, Router};
use tower_http::catch_panic::CatchPanicLayer;

use crate::api::{health, whoami};
use crate::error::{handle_panic, ApiError};
use crate::middleware::{
    cors::create_cors_layer,
    rate_limit::{rate_limit, RateLimitState},
    request_id::track_request,
};
use crate::server::state::AppState;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    let router = Router::new()
        // Health checks (never rate limited)
        .route("/health", get(health::health_check))
        .route("/v1/health", get(health::v1_health))
        .route("/v1/whoami", get(whoami::whoami))
        .fallback(not_found)
        .with_state(state.clone());

    apply_middleware(router, &state)
}

/// Wrap `router` in the middleware pipeline
///
/// Request path, outermost first:
/// 1. request id (and access logging)
/// 2. panic recovery
/// 3. rate limiting, skipped entirely when disabled
/// 4. CORS
///
/// Axum runs the layer added last first, so they are added in reverse.
pub fn apply_middleware(router: Router, state: &AppState) -> Router {
    let mut router = router.layer(create_cors_layer(&state.settings.cors));

    if let Some(limiter) = &state.rate_limiter {
        router = router.layer(middleware::from_fn_with_state(
            RateLimitState::new(limiter.clone()),
            rate_limit,
        ));
    }

    router
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(middleware::from_fn(track_request))
}

async fn not_found() -> ApiError {
    ApiError::NotFound("Resource not found".to_string())
}
