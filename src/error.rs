//! Request-level error taxonomy.
//!
//! Every I/O boundary produces its own error type (`CacheError`,
//! `FetchError`, `ProviderError`); this enum is the single shape handlers
//! convert to an HTTP status. Cache failures never reach it — the cache
//! tier fails open and only marks the response as a bypass.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::upstream::FetchError;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("upstream timed out")]
    UpstreamTimeout,

    #[error("upstream returned client error {0}")]
    UpstreamClient(u16),

    #[error("upstream returned server error {0}")]
    UpstreamServer(u16),

    #[error("cache unavailable")]
    CacheUnavailable,

    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("rate limit exceeded")]
    RateLimited {
        limit: u32,
        remaining: u32,
        retry_after_secs: u64,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<FetchError> for ProxyError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Timeout => ProxyError::UpstreamTimeout,
            FetchError::Client(code) => ProxyError::UpstreamClient(code),
            FetchError::Server(code) => ProxyError::UpstreamServer(code),
            // Network-level failures are indistinguishable from a dead
            // upstream as far as the client is concerned.
            FetchError::Network(_) => ProxyError::UpstreamServer(502),
        }
    }
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::ConfigInvalid(_) => StatusCode::BAD_REQUEST,
            ProxyError::UpstreamClient(_) => StatusCode::BAD_REQUEST,
            ProxyError::UpstreamTimeout | ProxyError::UpstreamServer(_) => StatusCode::BAD_GATEWAY,
            ProxyError::CacheUnavailable | ProxyError::ProviderUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ProxyError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = json!({
            "error": self.to_string(),
        });

        let mut response = (status, Json(body)).into_response();

        if let ProxyError::RateLimited {
            limit,
            remaining,
            retry_after_secs,
        } = self
        {
            let headers = response.headers_mut();
            if let Ok(v) = limit.to_string().parse() {
                headers.insert("X-RateLimit-Limit", v);
            }
            if let Ok(v) = remaining.to_string().parse() {
                headers.insert("X-RateLimit-Remaining", v);
            }
            if let Ok(v) = retry_after_secs.to_string().parse() {
                headers.insert("X-RateLimit-Reset", v);
            }
            if let Ok(v) = retry_after_secs.to_string().parse() {
                headers.insert("Retry-After", v);
            }
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_errors_map_to_upstream_kinds() {
        assert!(matches!(
            ProxyError::from(FetchError::Timeout),
            ProxyError::UpstreamTimeout
        ));
        assert!(matches!(
            ProxyError::from(FetchError::Client(404)),
            ProxyError::UpstreamClient(404)
        ));
        assert!(matches!(
            ProxyError::from(FetchError::Server(503)),
            ProxyError::UpstreamServer(503)
        ));
    }

    #[test]
    fn rate_limited_maps_to_429() {
        let err = ProxyError::RateLimited {
            limit: 10,
            remaining: 0,
            retry_after_secs: 2,
        };
        assert_eq!(err.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn timeout_is_treated_as_server_error() {
        assert_eq!(ProxyError::UpstreamTimeout.status(), StatusCode::BAD_GATEWAY);
    }
}
