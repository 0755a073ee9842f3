//! API Guard
//!
//! HTTP edge service with per-client token-bucket rate limiting and
//! request correlation.

use anyhow::Result;
use api_guard::{
    config::{Environment, LogFormat, Settings},
    logging::init_tracing,
    server::App,
};
use clap::Parser;

/// API Guard
///
/// HTTP edge service with rate limiting and request correlation.
#[derive(Parser, Debug)]
#[command(name = "api-guard")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on (overrides PORT env var)
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to (overrides HOST env var)
    #[arg(long)]
    host: Option<String>,

    /// Log level: trace, debug, info, warn, error (overrides LOG_LEVEL env var)
    #[arg(long)]
    log_level: Option<String>,

    /// Log format: json or pretty (overrides LOG_FORMAT env var)
    #[arg(long)]
    log_format: Option<LogFormat>,

    /// Environment: dev, staging, prod (overrides ENVIRONMENT env var)
    #[arg(short, long)]
    env: Option<Environment>,

    /// Requests per minute per client (overrides RATE_LIMIT_REQUESTS_PER_MINUTE)
    #[arg(long)]
    requests_per_minute: Option<u32>,

    /// Burst size per client (overrides RATE_LIMIT_BURST_SIZE)
    #[arg(long)]
    burst_size: Option<u32>,

    /// Disable rate limiting
    #[arg(long)]
    no_rate_limit: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration first (before logging, so we can use log_level)
    let mut settings = Settings::load()?;

    // Override settings with CLI arguments
    if let Some(port) = args.port {
        settings.port = port;
    }
    if let Some(host) = args.host {
        settings.host = host;
    }
    if let Some(log_level) = args.log_level {
        settings.log_level = log_level;
    }
    if let Some(log_format) = args.log_format {
        settings.log_format = log_format;
    }
    if let Some(env) = args.env {
        settings.environment = env;
    }
    if let Some(rpm) = args.requests_per_minute {
        settings.rate_limit.requests_per_minute = rpm;
    }
    if let Some(burst) = args.burst_size {
        settings.rate_limit.burst_size = burst;
    }
    if args.no_rate_limit {
        settings.rate_limit.enabled = false;
    }

    // CLI overrides bypass the validation done in load()
    settings.validate()?;

    init_tracing(&settings.log_level, settings.log_format)?;

    tracing::info!(
        app_name = %settings.app_name,
        version = %settings.app_version,
        environment = %settings.environment,
        host = %settings.host,
        port = %settings.port,
        "Starting application"
    );

    let app = App::new(settings);

    // Run the server with graceful shutdown
    app.run_with_graceful_shutdown().await?;

    tracing::info!("Application shutdown complete");

    Ok(())
}
