use axum::extract::{ConnectInfo, FromRequestParts};
use bytes::Bytes;
use http::{HeaderMap, Method, Uri, request::Parts};
use std::{
    convert::Infallible,
    net::{IpAddr, SocketAddr},
    time::Instant,
};

use crate::ratelimit::RateLimitDecision;

const UNKNOWN_CLIENT: &str = "unknown";

/// Identity used for both rate limiting and quota accounting. Inserted into
/// request extensions before the route handlers run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientKey(pub String);

impl ClientKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<S> FromRequestParts<S> for ClientKey
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(key) = parts.extensions.get::<ClientKey>() {
            return Ok(key.clone());
        }

        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        Ok(Self(resolve_client_key(&parts.headers, peer)))
    }
}

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub client_ip: Option<IpAddr>,
    pub client_key: String,
    pub started_at: Instant,
    /// Set by the rate-limit stage; `None` for exempt paths or when disabled.
    pub rate_limit: Option<RateLimitDecision>,
}

impl RequestContext {
    pub fn new(
        request_id: String,
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        body: Bytes,
        client_ip: Option<IpAddr>,
    ) -> Self {
        let client_key = resolve_client_key(&headers, client_ip);
        Self {
            request_id,
            method,
            uri,
            headers,
            body,
            client_ip,
            client_key,
            started_at: Instant::now(),
            rate_limit: None,
        }
    }
}

/// First `X-Forwarded-For` hop, then the peer address, then `"unknown"`.
pub fn resolve_client_key(headers: &HeaderMap, client_ip: Option<IpAddr>) -> String {
    if let Some(hop) = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return hop.to_string();
    }

    client_ip
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}
