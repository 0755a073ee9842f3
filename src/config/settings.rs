//! Application settings and configuration
//!
//! This module provides configuration management for the application,
//! loading settings from environment variables with sensible defaults.

use anyhow::{Context, Result};
use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;

/// Application environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[value(alias = "dev")]
    Development,
    #[value(alias = "stage")]
    Staging,
    #[value(alias = "prod")]
    Production,
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Staging => write!(f, "staging"),
            Environment::Production => write!(f, "production"),
        }
    }
}

impl Default for Environment {
    fn default() -> Self {
        Environment::Development
    }
}

impl std::str::FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "staging" | "stage" => Ok(Environment::Staging),
            "production" | "prod" => Ok(Environment::Production),
            _ => anyhow::bail!("Invalid environment: {}. Expected: development, staging, or production", s),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

impl Default for LogFormat {
    fn default() -> Self {
        LogFormat::Json
    }
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" | "text" => Ok(LogFormat::Pretty),
            _ => anyhow::bail!("Invalid log format: {}. Expected: json or pretty", s),
        }
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Long-run average admitted per client
    pub requests_per_minute: u32,
    /// Bucket capacity, the largest burst admitted without delay
    pub burst_size: u32,
    /// Upper bound on tracked client keys
    pub max_tracked_clients: u64,
    /// Buckets idle for this long are dropped
    pub idle_timeout_seconds: u64,
}

impl RateLimitConfig {
    /// Seconds a fully drained bucket needs to refill to capacity
    pub fn full_refill_seconds(&self) -> u64 {
        full_refill_seconds(self.requests_per_minute, self.burst_size)
    }
}

/// Seconds a drained bucket of `burst_size` needs to refill at
/// `requests_per_minute`; `u64::MAX` when nothing refills
pub fn full_refill_seconds(requests_per_minute: u32, burst_size: u32) -> u64 {
    if requests_per_minute == 0 {
        return u64::MAX;
    }
    (u64::from(burst_size) * 60).div_ceil(u64::from(requests_per_minute))
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_minute: 60,
            burst_size: 10,
            max_tracked_clients: 100_000,
            idle_timeout_seconds: 600,
        }
    }
}

/// Origin pattern accepted by default: any http or https origin
pub const DEFAULT_ALLOW_ORIGIN_REGEX: &str = r"^https?://.*$";

/// CORS configuration
///
/// A `*` entry in any list means "anything". When credentials are allowed
/// the wildcard mirrors the request instead, since browsers reject `*`
/// together with credentials.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CorsConfig {
    pub allow_origins: Vec<String>,
    /// Origins matching this pattern (whole value) are allowed in addition
    /// to `allow_origins`
    pub allow_origin_regex: Option<String>,
    pub allow_credentials: bool,
    pub allow_methods: Vec<String>,
    pub allow_headers: Vec<String>,
    /// Exposed in addition to the request-id and rate limit headers
    pub expose_headers: Vec<String>,
    pub max_age_seconds: u64,
}

impl CorsConfig {
    /// Compile `allow_origin_regex`, anchored so it must match the whole origin
    pub fn origin_regex(&self) -> Result<Option<Regex>, regex::Error> {
        self.allow_origin_regex
            .as_deref()
            .map(|pattern| Regex::new(&format!("^(?:{})$", pattern)))
            .transpose()
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allow_origins: vec!["*".to_string()],
            allow_origin_regex: Some(DEFAULT_ALLOW_ORIGIN_REGEX.to_string()),
            allow_credentials: true,
            allow_methods: vec!["*".to_string()],
            allow_headers: vec!["*".to_string()],
            expose_headers: Vec::new(),
            max_age_seconds: 600,
        }
    }
}

/// Main application settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    // App settings
    pub app_name: String,
    pub app_version: String,
    pub environment: Environment,
    pub log_level: String,
    pub log_format: LogFormat,

    // Server settings
    pub host: String,
    pub port: u16,

    // Rate limiting
    pub rate_limit: RateLimitConfig,

    // Cross-origin requests
    pub cors: CorsConfig,
}

impl Settings {
    /// Load settings from environment variables with defaults
    pub fn load() -> Result<Self> {
        // Load .env file if it exists (ignored in production typically)
        dotenvy::dotenv().ok();

        let defaults = RateLimitConfig::default();
        let cors_defaults = CorsConfig::default();

        let settings = Self {
            // App settings
            app_name: env_or_default("APP_NAME", "api-guard"),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: env_or_default("ENVIRONMENT", "development")
                .parse()
                .unwrap_or_default(),
            log_level: env_or_default("LOG_LEVEL", "info"),
            log_format: env_or_default("LOG_FORMAT", "json")
                .parse()
                .unwrap_or_default(),

            // Server settings
            host: env_or_default("HOST", "0.0.0.0"),
            port: env_or_default("PORT", "8000")
                .parse()
                .context("Invalid PORT value")?,

            // Rate limiting
            rate_limit: RateLimitConfig {
                enabled: env_or_default("RATE_LIMIT_ENABLED", "true")
                    .parse()
                    .unwrap_or(defaults.enabled),
                requests_per_minute: env_or_default("RATE_LIMIT_REQUESTS_PER_MINUTE", "60")
                    .parse()
                    .context("Invalid RATE_LIMIT_REQUESTS_PER_MINUTE value")?,
                burst_size: env_or_default("RATE_LIMIT_BURST_SIZE", "10")
                    .parse()
                    .context("Invalid RATE_LIMIT_BURST_SIZE value")?,
                max_tracked_clients: env_or_default("RATE_LIMIT_MAX_TRACKED_CLIENTS", "100000")
                    .parse()
                    .unwrap_or(defaults.max_tracked_clients),
                idle_timeout_seconds: env_or_default("RATE_LIMIT_IDLE_TIMEOUT_SECONDS", "600")
                    .parse()
                    .unwrap_or(defaults.idle_timeout_seconds),
            },

            // CORS
            cors: CorsConfig {
                allow_origins: env_list("CORS_ALLOW_ORIGINS", "*"),
                allow_origin_regex: Some(env_or_default(
                    "CORS_ALLOW_ORIGIN_REGEX",
                    DEFAULT_ALLOW_ORIGIN_REGEX,
                ))
                .filter(|pattern| !pattern.trim().is_empty()),
                allow_credentials: env_or_default("CORS_ALLOW_CREDENTIALS", "true")
                    .parse()
                    .unwrap_or(cors_defaults.allow_credentials),
                allow_methods: env_list("CORS_ALLOW_METHODS", "*"),
                allow_headers: env_list("CORS_ALLOW_HEADERS", "*"),
                expose_headers: env_list("CORS_EXPOSE_HEADERS", ""),
                max_age_seconds: env_or_default("CORS_MAX_AGE_SECONDS", "600")
                    .parse()
                    .unwrap_or(cors_defaults.max_age_seconds),
            },
        };

        // Validate settings
        settings.validate()?;

        Ok(settings)
    }

    /// Validate settings
    pub fn validate(&self) -> Result<()> {
        // Validate port range
        if self.port == 0 {
            anyhow::bail!("Port cannot be 0");
        }

        // Validate rate limit settings
        let rate_limit = &self.rate_limit;
        if rate_limit.enabled {
            if rate_limit.requests_per_minute == 0 {
                anyhow::bail!("Rate limit requests_per_minute must be > 0");
            }
            if rate_limit.burst_size == 0 {
                anyhow::bail!("Rate limit burst_size must be > 0");
            }
            if rate_limit.max_tracked_clients == 0 {
                anyhow::bail!("Rate limit max_tracked_clients must be > 0");
            }
            // An evicted bucket must already have been full again
            if rate_limit.idle_timeout_seconds < rate_limit.full_refill_seconds() {
                anyhow::bail!(
                    "Rate limit idle_timeout_seconds ({}) must be >= {} (time to refill a drained bucket)",
                    rate_limit.idle_timeout_seconds,
                    rate_limit.full_refill_seconds()
                );
            }
        }

        self.cors
            .origin_regex()
            .context("Invalid CORS_ALLOW_ORIGIN_REGEX value")?;

        if self.environment == Environment::Production && !rate_limit.enabled {
            tracing::warn!("Running in production without rate limiting!");
        }

        Ok(())
    }

    /// Get the server address string
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_name: "api-guard".to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: Environment::Development,
            log_level: "info".to_string(),
            log_format: LogFormat::Json,
            host: "0.0.0.0".to_string(),
            port: 8000,
            rate_limit: RateLimitConfig::default(),
            cors: CorsConfig::default(),
        }
    }
}

/// Helper function to get environment variable with default
fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Comma-separated environment variable, trimmed, empty entries dropped
fn env_list(key: &str, default: &str) -> Vec<String> {
    parse_list(&env_or_default(key, default))
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.app_name, "api-guard");
        assert_eq!(settings.port, 8000);
        assert!(settings.rate_limit.enabled);
        assert_eq!(settings.rate_limit.requests_per_minute, 60);
        assert_eq!(settings.rate_limit.burst_size, 10);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_environment_parsing() {
        assert_eq!("development".parse::<Environment>().unwrap(), Environment::Development);
        assert_eq!("dev".parse::<Environment>().unwrap(), Environment::Development);
        assert_eq!("production".parse::<Environment>().unwrap(), Environment::Production);
        assert_eq!("prod".parse::<Environment>().unwrap(), Environment::Production);
        assert!("qa".parse::<Environment>().is_err());
    }

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_server_addr() {
        let settings = Settings::default();
        assert_eq!(settings.server_addr(), "0.0.0.0:8000");
    }

    #[test]
    fn test_full_refill_seconds() {
        let mut config = RateLimitConfig::default();
        assert_eq!(config.full_refill_seconds(), 10);

        config.requests_per_minute = 7;
        config.burst_size = 3;
        assert_eq!(config.full_refill_seconds(), 26);
    }

    #[test]
    fn test_validate_rejects_bad_rate_limits() {
        let mut settings = Settings::default();
        settings.rate_limit.requests_per_minute = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.rate_limit.burst_size = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.rate_limit.idle_timeout_seconds = 5;
        assert!(settings.validate().is_err());

        // Disabled limiter is not validated
        let mut settings = Settings::default();
        settings.rate_limit.enabled = false;
        settings.rate_limit.burst_size = 0;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_origin_regex_matches_whole_origin() {
        let config = CorsConfig {
            allow_origin_regex: Some(r"https://[a-z]+\.example\.org".to_string()),
            ..CorsConfig::default()
        };

        let regex = config.origin_regex().unwrap().unwrap();
        assert!(regex.is_match("https://app.example.org"));
        assert!(!regex.is_match("https://app.example.org.evil.net"));
        assert!(!regex.is_match("http://app.example.org"));

        let config = CorsConfig {
            allow_origin_regex: None,
            ..CorsConfig::default()
        };
        assert!(config.origin_regex().unwrap().is_none());
    }

    #[test]
    fn test_validate_rejects_bad_origin_regex() {
        let mut settings = Settings::default();
        settings.cors.allow_origin_regex = Some("https://(".to_string());
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_parse_list() {
        assert_eq!(parse_list("*"), vec!["*"]);
        assert_eq!(
            parse_list(" https://a.example , https://b.example,,"),
            vec!["https://a.example", "https://b.example"]
        );
        assert!(parse_list("").is_empty());
    }
}
