//! Health check endpoints
//!
//! This module provides health check endpoints for monitoring
//! and container orchestration (Kubernetes, ECS, etc.). Both paths are
//! exempt from rate limiting.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::server::state::AppState;

/// Response for the main health check endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub environment: String,
    pub uptime_seconds: u64,
    pub rate_limiting: bool,
}

/// Response for the versioned health probe
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

/// Main health check endpoint
///
/// Returns overall service health status with version and uptime information.
///
/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: state.settings.app_version.clone(),
        environment: state.settings.environment.to_string(),
        uptime_seconds: state.uptime_seconds(),
        rate_limiting: state.is_rate_limited(),
    })
}

/// Versioned health probe
///
/// GET /v1/health
pub async fn v1_health() -> Json<StatusResponse> {
    // If we can respond, we're healthy
    Json(StatusResponse {
        status: "healthy".to_string(),
    })
}
