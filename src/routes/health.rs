//! Health and metrics endpoints.

use axum::{Json, extract::State, response::IntoResponse};
use http::StatusCode;
use serde::Serialize;

use crate::AppState;
#[cfg(feature = "prometheus")]
use crate::observability::metrics::get_prometheus_handle;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    /// "healthy" or "unhealthy".
    pub status: String,
    pub checks: HealthChecks,
    pub duration_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct HealthChecks {
    pub cache: ComponentStatus,
    pub provider: ComponentStatus,
}

#[derive(Debug, Serialize)]
pub struct ComponentStatus {
    /// "up", "down", or "disabled".
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

/// `GET /healthz`. Returns 200 when every enabled check is up, 503
/// otherwise. A deliberately disabled cache tier does not fail the
/// service; the proxy is built to run without it.
pub async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    let started = std::time::Instant::now();
    let mut healthy = true;

    let cache = if state.cache.is_active() {
        let (up, latency_ms) = state.cache.health().await;
        if !up {
            healthy = false;
        }
        ComponentStatus {
            status: if up { "up" } else { "down" }.to_string(),
            latency_ms: Some(latency_ms),
        }
    } else {
        ComponentStatus {
            status: "disabled".to_string(),
            latency_ms: None,
        }
    };

    let (provider_up, provider_latency) = state.providers.ratings.health().await;
    if !provider_up {
        healthy = false;
    }
    let provider = ComponentStatus {
        status: if provider_up { "up" } else { "down" }.to_string(),
        latency_ms: Some(provider_latency),
    };

    let body = HealthStatus {
        status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
        checks: HealthChecks { cache, provider },
        duration_ms: started.elapsed().as_millis() as u64,
    };

    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(body))
}

/// `GET /metrics` — Prometheus text exposition.
pub async fn metrics() -> impl IntoResponse {
    #[cfg(feature = "prometheus")]
    {
        return match get_prometheus_handle() {
            Some(handle) => (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            ),
            None => (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            ),
        };
    }
    #[cfg(not(feature = "prometheus"))]
    (
        StatusCode::NOT_FOUND,
        [("content-type", "text/plain")],
        "Prometheus metrics not enabled".to_string(),
    )
}
