//! Prometheus metrics for the proxy.
//!
//! Counters and histograms for HTTP traffic, cache tier operations,
//! rate-limit outcomes, upstream fetches, provider lookups, and
//! enrichment batches. Recording functions are no-ops when the
//! `prometheus` feature is off, so call sites stay unconditional.

#[cfg(feature = "prometheus")]
use std::sync::OnceLock;

use metrics::{counter, histogram};
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("metrics setup failed: {0}")]
    Setup(String),
}

/// Global Prometheus handle for the /metrics endpoint.
#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

#[cfg(feature = "prometheus")]
pub fn init_metrics() -> Result<(), MetricsError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| MetricsError::Setup(e.to_string()))?;

    PROMETHEUS_HANDLE
        .set(handle)
        .map_err(|_| MetricsError::Setup("metrics already initialized".to_string()))?;

    Ok(())
}

#[cfg(not(feature = "prometheus"))]
pub fn init_metrics() -> Result<(), MetricsError> {
    Ok(())
}

#[cfg(feature = "prometheus")]
pub fn get_prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ─────────────────────────────────────────────────────────────────────────────
// Metric Recording Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Record an HTTP request against the data surface.
pub fn record_http_request(method: &str, route: &str, status: u16, duration_secs: f64) {
    let status_class = format!("{}xx", status / 100);
    counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "route" => route.to_string(),
        "status" => status.to_string(),
        "status_class" => status_class.clone()
    )
    .increment(1);
    histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "route" => route.to_string(),
        "status_class" => status_class
    )
    .record(duration_secs);
}

/// Record a cache tier operation: `outcome` is hit/miss/error/success.
pub fn record_cache_operation(tier: &str, op: &str, outcome: &str) {
    counter!(
        "cache_operations_total",
        "tier" => tier.to_string(),
        "op" => op.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record the X-Cache disposition of a data response.
pub fn record_cache_disposition(route: &str, disposition: &str) {
    counter!(
        "cache_responses_total",
        "route" => route.to_string(),
        "disposition" => disposition.to_string()
    )
    .increment(1);
}

/// Record a rate limit decision: allowed/limited/bypass/error.
pub fn record_rate_limit(tier: &str, outcome: &str) {
    counter!(
        "rate_limit_checks_total",
        "tier" => tier.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record an upstream fetch with its total duration including retries.
pub fn record_upstream_fetch(outcome: &str, duration_secs: f64) {
    counter!("upstream_fetches_total", "outcome" => outcome.to_string()).increment(1);
    histogram!("upstream_fetch_duration_seconds", "outcome" => outcome.to_string())
        .record(duration_secs);
}

/// Record one provider lookup and how it was satisfied.
pub fn record_provider_lookup(source: &str, outcome: &str) {
    counter!(
        "provider_lookups_total",
        "source" => source.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a consolidation outcome: computed/empty.
pub fn record_consolidation(outcome: &str) {
    counter!("consolidations_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record an enrichment pass over a document.
pub fn record_enrichment(kind: &str, items: usize, duration_secs: f64) {
    counter!("enrichment_items_total", "kind" => kind.to_string()).increment(items as u64);
    histogram!("enrichment_duration_seconds", "kind" => kind.to_string()).record(duration_secs);
}
