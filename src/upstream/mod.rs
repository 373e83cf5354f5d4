//! Bounded HTTP fetcher for wrapped upstream addons.
//!
//! Every fetch carries a timeout and a fixed attempt budget with linear
//! backoff (`attempt × 1 s`). 4xx responses short-circuit: they will not
//! succeed on retry, so they are surfaced immediately. The shared
//! `reqwest` client pins a stable User-Agent and carries no cookies.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::observability::metrics;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,

    #[error("client error {0}")]
    Client(u16),

    #[error("server error {0}")]
    Server(u16),

    #[error("network error: {0}")]
    Network(String),
}

impl FetchError {
    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Network(err.to_string())
        }
    }

    /// 4xx responses are final; everything else may be transient.
    fn is_retryable(&self) -> bool {
        !matches!(self, FetchError::Client(_))
    }
}

pub struct UpstreamFetcher {
    client: reqwest::Client,
    timeout: Duration,
    attempts: u32,
}

impl UpstreamFetcher {
    pub fn new(client: reqwest::Client, timeout_secs: u64, attempts: u32) -> Self {
        Self {
            client,
            timeout: Duration::from_secs(timeout_secs),
            attempts: attempts.max(1),
        }
    }

    /// Fetch a JSON document with bounded retries.
    pub async fn fetch_json(&self, url: &str) -> Result<Value, FetchError> {
        let started = std::time::Instant::now();
        let mut last_error = FetchError::Network("no attempts made".to_string());

        for attempt in 0..self.attempts {
            if attempt > 0 {
                // Linear backoff: 1s, 2s, ...
                tokio::time::sleep(Duration::from_secs(attempt as u64)).await;
            }

            match self.attempt(url).await {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::debug!(url = %url, attempt = attempt + 1, "upstream fetch succeeded after retry");
                    }
                    metrics::record_upstream_fetch("success", started.elapsed().as_secs_f64());
                    return Ok(value);
                }
                Err(error) => {
                    if !error.is_retryable() || attempt + 1 == self.attempts {
                        tracing::warn!(
                            url = %url,
                            error = %error,
                            attempts = attempt + 1,
                            "upstream fetch failed"
                        );
                        metrics::record_upstream_fetch("error", started.elapsed().as_secs_f64());
                        return Err(error);
                    }
                    tracing::debug!(
                        url = %url,
                        error = %error,
                        attempt = attempt + 1,
                        "retryable upstream error"
                    );
                    last_error = error;
                }
            }
        }

        metrics::record_upstream_fetch("error", started.elapsed().as_secs_f64());
        Err(last_error)
    }

    async fn attempt(&self, url: &str) -> Result<Value, FetchError> {
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(FetchError::from_reqwest)?;

        let status = response.status();
        if status.is_client_error() {
            return Err(FetchError::Client(status.as_u16()));
        }
        if status.is_server_error() {
            return Err(FetchError::Server(status.as_u16()));
        }

        response
            .json::<Value>()
            .await
            .map_err(FetchError::from_reqwest)
    }
}
