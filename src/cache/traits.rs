use std::time::Duration;

use async_trait::async_trait;

use super::error::CacheResult;

/// Backend contract for the cache tier.
///
/// Byte operations back the response/raw/provider entries; sorted-set
/// operations back the sliding rate-limit windows and the hot-key
/// counters. Backends must be safe to share across tasks behind an `Arc`.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Get raw bytes from cache.
    async fn get_bytes(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Set raw bytes in cache with TTL.
    async fn set_bytes(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()>;

    /// Delete a value from cache.
    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Check whether a key exists without fetching its value.
    async fn exists(&self, key: &str) -> CacheResult<bool>;

    // ─────────────────────────────────────────────────────────────────────
    // Sorted-set operations (rate-limit windows, hot-key counters)
    // ─────────────────────────────────────────────────────────────────────

    /// Add a member to a sorted set with a score. Returns true if the
    /// member was newly added. If TTL is provided and the key has no
    /// expiry, sets the expiration.
    async fn zset_add(
        &self,
        key: &str,
        score: f64,
        member: &str,
        ttl: Option<Duration>,
    ) -> CacheResult<bool>;

    /// Increment the score of a member in a sorted set, returning the new
    /// score. Creates the member at `delta` if absent.
    async fn zset_incr_by(
        &self,
        key: &str,
        member: &str,
        delta: f64,
        ttl: Option<Duration>,
    ) -> CacheResult<f64>;

    /// Remove members within a score range. Returns the number removed.
    async fn zset_remove_by_score(&self, key: &str, min: f64, max: f64) -> CacheResult<u64>;

    /// Number of members in a sorted set.
    async fn zset_cardinality(&self, key: &str) -> CacheResult<usize>;

    /// Members with scores, ordered by score ascending, over the index
    /// range `[start, stop]` (negative indices count from the end, Redis
    /// semantics).
    async fn zset_range_with_scores(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> CacheResult<Vec<(String, f64)>>;

    /// Set or update the expiration of a key. Returns true if the TTL was
    /// applied, false if the key doesn't exist.
    async fn set_expire(&self, key: &str, ttl: Duration) -> CacheResult<bool>;

    /// Human-readable backend name for health reporting.
    fn backend_name(&self) -> &'static str;
}
