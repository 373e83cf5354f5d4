//! Windowed top-N accounting of accessed cache keys.
//!
//! Each access increments the key's score in the current minute bucket; a
//! report merges the last N buckets and returns the heaviest keys.
//! Tracking is fire-and-forget and increments are eventually consistent;
//! buckets expire naturally via store TTL.

use std::{collections::HashMap, sync::Arc, time::Duration};

use serde::Serialize;

use super::{keys::CacheKeys, tier::CacheTier};

/// Buckets outlive the largest supported report window by a wide margin.
const BUCKET_TTL: Duration = Duration::from_secs(2 * 60 * 60);

pub const DEFAULT_WINDOW_MINUTES: u32 = 10;
pub const DEFAULT_LIMIT: usize = 20;
pub const MAX_WINDOW_MINUTES: u32 = 60;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HotKey {
    pub key: String,
    pub count: u64,
}

pub struct HotKeyTracker {
    tier: Arc<CacheTier>,
}

impl HotKeyTracker {
    pub fn new(tier: Arc<CacheTier>) -> Self {
        Self { tier }
    }

    fn minute_bucket() -> i64 {
        chrono::Utc::now().timestamp() / 60
    }

    /// Record one access of `key`. Never blocks the caller and never
    /// fails: the increment happens on a detached task and errors are
    /// logged at debug level only.
    pub fn track(&self, key: &str) {
        let store = match self.tier.store() {
            Some(store) => Arc::clone(store),
            None => return,
        };

        let bucket = CacheKeys::hot_keys_bucket(Self::minute_bucket());
        let key = key.to_string();
        tokio::spawn(async move {
            if let Err(e) = store.zset_incr_by(&bucket, &key, 1.0, Some(BUCKET_TTL)).await {
                tracing::debug!(bucket = %bucket, error = %e, "hot-key increment failed");
            }
        });
    }

    /// Merge the last `window_minutes` buckets and return the top `limit`
    /// keys by access count, heaviest first.
    pub async fn get_hot(&self, window_minutes: u32, limit: usize) -> Vec<HotKey> {
        let store = match self.tier.store() {
            Some(store) => store,
            None => return Vec::new(),
        };

        let window = window_minutes.clamp(1, MAX_WINDOW_MINUTES) as i64;
        let current = Self::minute_bucket();

        let mut merged: HashMap<String, u64> = HashMap::new();
        for bucket in (current - window + 1)..=current {
            let bucket_key = CacheKeys::hot_keys_bucket(bucket);
            match store.zset_range_with_scores(&bucket_key, 0, -1).await {
                Ok(entries) => {
                    for (key, count) in entries {
                        *merged.entry(key).or_default() += count as u64;
                    }
                }
                Err(e) => {
                    tracing::debug!(bucket = %bucket_key, error = %e, "hot-key bucket read failed");
                }
            }
        }

        let mut ranked: Vec<HotKey> = merged
            .into_iter()
            .map(|(key, count)| HotKey { key, count })
            .collect();
        ranked.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));
        ranked.truncate(limit);
        ranked
    }
}
