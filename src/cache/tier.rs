//! Fail-open compressed cache layer.
//!
//! Wraps the raw store behind gzip + JSON codecs and swallows every
//! infrastructure failure: a read error is a miss, a write error is a
//! no-op, and callers never see a `CacheError`. A global switch disables
//! the tier entirely, in which case every read misses, every write is
//! dropped, and responses are marked as bypassing the cache.

use std::{
    io::{Read, Write},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use flate2::{Compression, read::GzDecoder, write::GzEncoder};
use serde::{Serialize, de::DeserializeOwned};

use super::{error::CacheError, traits::Cache};
use crate::observability::metrics;

#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub writes: AtomicU64,
    pub errors: AtomicU64,
    pub bypasses: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStatsSnapshot {
    pub enabled: bool,
    pub backend: Option<&'static str>,
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub errors: u64,
    pub bypasses: u64,
}

pub struct CacheTier {
    store: Option<Arc<dyn Cache>>,
    enabled: AtomicBool,
    stats: CacheStats,
}

impl CacheTier {
    pub fn new(store: Option<Arc<dyn Cache>>) -> Self {
        let enabled = store.is_some();
        Self {
            store,
            enabled: AtomicBool::new(enabled),
            stats: CacheStats::default(),
        }
    }

    /// A tier with no backing store: all reads miss, all writes drop.
    pub fn disabled() -> Self {
        Self::new(None)
    }

    /// Whether reads and writes currently reach a store.
    pub fn is_active(&self) -> bool {
        self.store.is_some() && self.enabled.load(Ordering::Relaxed)
    }

    /// Global kill switch; used by tests and operational tooling.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Raw store access for the components that layer their own key
    /// schema on sorted sets (rate limiter, hot-key tracker). Returns
    /// `None` when the tier is disabled so those components fail open the
    /// same way reads do.
    pub fn store(&self) -> Option<&Arc<dyn Cache>> {
        if self.is_active() {
            self.store.as_ref()
        } else {
            None
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let store = match self.store() {
            Some(store) => store,
            None => {
                self.stats.bypasses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        match store.get_bytes(key).await {
            Ok(Some(compressed)) => match decode_entry(&compressed) {
                Ok(value) => {
                    self.stats.hits.fetch_add(1, Ordering::Relaxed);
                    metrics::record_cache_operation("tier", "get", "hit");
                    Some(value)
                }
                Err(e) => {
                    self.stats.errors.fetch_add(1, Ordering::Relaxed);
                    metrics::record_cache_operation("tier", "get", "error");
                    tracing::warn!(key = %key, error = %e, "corrupt cache entry, treating as miss");
                    None
                }
            },
            Ok(None) => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_operation("tier", "get", "miss");
                None
            }
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_operation("tier", "get", "error");
                tracing::warn!(key = %key, error = %e, "cache read failed, treating as miss");
                None
            }
        }
    }

    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let store = match self.store() {
            Some(store) => store,
            None => return,
        };

        let compressed = match encode_entry(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(key = %key, error = %e, "failed to encode cache entry");
                return;
            }
        };

        match store.set_bytes(key, &compressed, ttl).await {
            Ok(()) => {
                self.stats.writes.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_operation("tier", "set", "success");
            }
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_operation("tier", "set", "error");
                tracing::warn!(key = %key, error = %e, "cache write failed");
            }
        }
    }

    /// Write-behind: the response is never blocked on the store. The
    /// value is serialized on the spawned task.
    pub fn spawn_set_json<T>(self: &Arc<Self>, key: String, value: T, ttl: Duration)
    where
        T: Serialize + Send + Sync + 'static,
    {
        let tier = Arc::clone(self);
        tokio::spawn(async move {
            tier.set_json(&key, &value, ttl).await;
        });
    }

    pub async fn delete(&self, key: &str) {
        let store = match self.store() {
            Some(store) => store,
            None => return,
        };
        if let Err(e) = store.delete(key).await {
            self.stats.errors.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(key = %key, error = %e, "cache delete failed");
        }
    }

    pub async fn exists(&self, key: &str) -> bool {
        let store = match self.store() {
            Some(store) => store,
            None => return false,
        };
        match store.exists(key).await {
            Ok(exists) => exists,
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(key = %key, error = %e, "cache exists check failed");
                false
            }
        }
    }

    /// Probe the store for health reporting. Returns status and observed
    /// latency; a disabled tier reports as down without touching I/O.
    pub async fn health(&self) -> (bool, u64) {
        let store = match self.store() {
            Some(store) => store,
            None => return (false, 0),
        };
        let start = Instant::now();
        let healthy = store.get_bytes("__health_check__").await.is_ok();
        (healthy, start.elapsed().as_millis() as u64)
    }

    pub fn stats_snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            enabled: self.is_active(),
            backend: self.store.as_ref().map(|s| s.backend_name()),
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            writes: self.stats.writes.load(Ordering::Relaxed),
            errors: self.stats.errors.load(Ordering::Relaxed),
            bypasses: self.stats.bypasses.load(Ordering::Relaxed),
        }
    }
}

fn encode_entry<T: Serialize>(value: &T) -> Result<Vec<u8>, CacheError> {
    let json = serde_json::to_vec(value).map_err(|e| CacheError::Serialization(e.to_string()))?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
    encoder
        .write_all(&json)
        .and_then(|_| encoder.finish())
        .map_err(|e| CacheError::Compression(e.to_string()))
}

fn decode_entry<T: DeserializeOwned>(compressed: &[u8]) -> Result<T, CacheError> {
    let mut decoder = GzDecoder::new(compressed);
    let mut json = Vec::new();
    decoder
        .read_to_end(&mut json)
        .map_err(|e| CacheError::Compression(e.to_string()))?;
    serde_json::from_slice(&json).map_err(|e| CacheError::Deserialization(e.to_string()))
}
