//! Client identity endpoint
//!
//! Echoes back how the service sees the caller: the correlation id assigned
//! to this request and the key the rate limiter buckets it under.

use axum::{extract::ConnectInfo, http::HeaderMap, Json};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use crate::middleware::{rate_limit::client_key, request_id::RequestId};

/// Response for the whoami endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct WhoAmIResponse {
    /// Correlation id of this request
    pub request_id: Option<String>,
    /// Rate limit key derived for this client
    pub client: String,
}

/// GET /v1/whoami
pub async fn whoami(
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
) -> Json<WhoAmIResponse> {
    // Task-local, set by the request-id middleware
    let request_id = RequestId::current();
    let client = client_key(&headers, connect_info.map(|ConnectInfo(addr)| addr.ip()));

    tracing::debug!(client = %client, "Identity requested");

    Json(WhoAmIResponse {
        request_id: request_id.map(|id| id.to_string()),
        client,
    })
}
