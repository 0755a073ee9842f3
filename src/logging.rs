//! Logging setup
//!
//! Installs the global `tracing` subscriber. JSON output includes the
//! current span, so lines emitted while a request is in flight carry its
//! `request_id`.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LogFormat;

/// Build the log filter: `RUST_LOG` when set, otherwise `log_level`
pub fn build_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level))
}

/// Initialize the tracing subscriber
///
/// Returns an error if a global subscriber is already installed.
pub fn init_tracing(log_level: &str, format: LogFormat) -> anyhow::Result<()> {
    let output = match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .boxed(),
        LogFormat::Pretty => fmt::layer().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(output.with_filter(build_filter(log_level)))
        .try_init()?;

    Ok(())
}
