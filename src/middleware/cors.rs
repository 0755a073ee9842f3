//! CORS layer construction
//!
//! Builds the `tower-http` CORS layer from [`CorsConfig`]. The request-id and
//! rate limit headers are always exposed to browsers. An origin is allowed
//! when it is listed or when it matches the configured origin pattern.

use axum::http::{header, request::Parts, HeaderName, HeaderValue, Method};
use std::time::Duration;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer, ExposeHeaders};

use crate::config::CorsConfig;
use crate::middleware::request_id::REQUEST_ID_HEADER;
use crate::services::rate_limiter::{RATE_LIMIT_LIMIT_HEADER, RATE_LIMIT_REMAINING_HEADER};

const WILDCARD: &str = "*";

/// Create the CORS layer from configuration
pub fn create_cors_layer(config: &CorsConfig) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(allow_origin(config))
        .allow_methods(allow_methods(config))
        .allow_headers(allow_headers(config))
        .allow_credentials(config.allow_credentials)
        .expose_headers(expose_headers(config))
        .max_age(Duration::from_secs(config.max_age_seconds))
}

fn is_wildcard(values: &[String]) -> bool {
    values.iter().any(|v| v == WILDCARD)
}

fn allow_origin(config: &CorsConfig) -> AllowOrigin {
    if is_wildcard(&config.allow_origins) {
        return if config.allow_credentials {
            AllowOrigin::mirror_request()
        } else {
            AllowOrigin::any()
        };
    }

    let origins = parse_each(&config.allow_origins, "origin", |v| {
        HeaderValue::from_str(v).ok()
    });

    let regex = match config.origin_regex() {
        Ok(regex) => regex,
        Err(e) => {
            tracing::warn!(error = %e, "Ignoring invalid CORS origin pattern");
            None
        }
    };

    match regex {
        Some(regex) => AllowOrigin::predicate(move |origin: &HeaderValue, _: &Parts| {
            origins.contains(origin)
                || origin.to_str().map(|o| regex.is_match(o)).unwrap_or(false)
        }),
        None => AllowOrigin::list(origins),
    }
}

fn allow_methods(config: &CorsConfig) -> AllowMethods {
    if is_wildcard(&config.allow_methods) {
        return if config.allow_credentials {
            AllowMethods::mirror_request()
        } else {
            AllowMethods::any()
        };
    }

    AllowMethods::list(parse_each(&config.allow_methods, "method", |v| {
        Method::from_bytes(v.to_uppercase().as_bytes()).ok()
    }))
}

fn allow_headers(config: &CorsConfig) -> AllowHeaders {
    if is_wildcard(&config.allow_headers) {
        return if config.allow_credentials {
            AllowHeaders::mirror_request()
        } else {
            AllowHeaders::any()
        };
    }

    AllowHeaders::list(parse_each(&config.allow_headers, "header", |v| {
        v.parse::<HeaderName>().ok()
    }))
}

fn expose_headers(config: &CorsConfig) -> ExposeHeaders {
    let mut headers = vec![
        HeaderName::from_static(REQUEST_ID_HEADER),
        HeaderName::from_static(RATE_LIMIT_LIMIT_HEADER),
        HeaderName::from_static(RATE_LIMIT_REMAINING_HEADER),
        header::RETRY_AFTER,
    ];

    for name in parse_each(&config.expose_headers, "expose header", |v| {
        v.parse::<HeaderName>().ok()
    }) {
        if !headers.contains(&name) {
            headers.push(name);
        }
    }

    ExposeHeaders::list(headers)
}

/// Parse every configured value, skipping (and logging) the invalid ones
fn parse_each<T>(values: &[String], what: &str, parse: impl Fn(&str) -> Option<T>) -> Vec<T> {
    values
        .iter()
        .filter_map(|v| {
            let parsed = parse(v);
            if parsed.is_none() {
                tracing::warn!(value = %v, "Ignoring invalid CORS {}", what);
            }
            parsed
        })
        .collect()
}
