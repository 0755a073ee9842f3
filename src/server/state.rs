//! Application state container
//!
//! This module defines the shared application state that is passed
//! to all request handlers via Axum's state extraction.

use crate::config::Settings;
use crate::services::RateLimiter;
use std::sync::Arc;
use std::time::Instant;

/// Shared application state
///
/// Cheaply cloneable; everything shared sits behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Application settings
    pub settings: Arc<Settings>,

    /// Process-wide rate limiter, `None` when rate limiting is disabled
    pub rate_limiter: Option<Arc<RateLimiter>>,

    /// Application start time (for uptime calculation)
    pub start_time: Instant,
}

impl AppState {
    /// Create a new application state
    pub fn new(settings: Settings) -> Self {
        let rate_limiter = if settings.rate_limit.enabled {
            tracing::info!(
                requests_per_minute = settings.rate_limit.requests_per_minute,
                burst_size = settings.rate_limit.burst_size,
                max_tracked_clients = settings.rate_limit.max_tracked_clients,
                "Rate limiting enabled"
            );
            Some(Arc::new(RateLimiter::from_config(&settings.rate_limit)))
        } else {
            tracing::info!("Rate limiting disabled");
            None
        };

        Self {
            settings: Arc::new(settings),
            rate_limiter,
            start_time: Instant::now(),
        }
    }

    /// Get the application uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Check if rate limiting is active
    pub fn is_rate_limited(&self) -> bool {
        self.rate_limiter.is_some()
    }
}
