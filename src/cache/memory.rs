use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use dashmap::DashMap;

use super::{error::CacheResult, traits::Cache};

struct CacheEntry {
    data: Vec<u8>,
    expires_at: Option<Instant>,
    last_accessed: Instant,
}

impl CacheEntry {
    fn new(data: Vec<u8>, expires_at: Option<Instant>) -> Self {
        Self {
            data,
            expires_at,
            last_accessed: Instant::now(),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| Instant::now() > exp)
    }

    fn touch(&mut self) {
        self.last_accessed = Instant::now();
    }
}

/// Entry for sorted-set storage with expiration.
struct ZSetEntry {
    members: HashMap<String, f64>,
    expires_at: Option<Instant>,
}

impl ZSetEntry {
    fn new(expires_at: Option<Instant>) -> Self {
        Self {
            members: HashMap::new(),
            expires_at,
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| Instant::now() > exp)
    }

    /// Members sorted by score ascending; ties resolved by member name so
    /// iteration order is deterministic.
    fn sorted(&self) -> Vec<(String, f64)> {
        let mut items: Vec<(String, f64)> =
            self.members.iter().map(|(k, v)| (k.clone(), *v)).collect();
        items.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        items
    }
}

/// In-memory cache store backed by `DashMap`.
///
/// Suitable for single-node deployments and tests. Each node keeps its
/// own state, so rate limiting and hot-key accounting are per-node; use
/// the Redis backend when running more than one instance.
pub struct MemoryCache {
    data: DashMap<String, CacheEntry>,
    zsets: DashMap<String, ZSetEntry>,
    max_entries: usize,
    eviction_batch_size: usize,
}

impl MemoryCache {
    pub fn new(max_entries: usize, eviction_batch_size: usize) -> Self {
        Self {
            data: DashMap::new(),
            zsets: DashMap::new(),
            max_entries,
            eviction_batch_size: eviction_batch_size.max(1),
        }
    }

    fn evict_if_needed(&self) {
        if self.data.len() < self.max_entries {
            return;
        }

        // First pass: drop everything already expired.
        self.data.retain(|_, entry| !entry.is_expired());

        let current_len = self.data.len();
        if current_len < self.max_entries {
            return;
        }

        let target_size = self.max_entries.saturating_sub(self.eviction_batch_size);
        let to_evict = current_len.saturating_sub(target_size);
        if to_evict == 0 {
            return;
        }

        // Evict least recently used entries.
        let mut entries: Vec<_> = self
            .data
            .iter()
            .map(|entry| (entry.key().clone(), entry.last_accessed))
            .collect();
        entries.sort_by_key(|(_, last_accessed)| *last_accessed);

        for (key, _) in entries.into_iter().take(to_evict) {
            self.data.remove(&key);
        }
    }

    fn expires_at(ttl: Option<Duration>) -> Option<Instant> {
        ttl.filter(|t| !t.is_zero()).map(|t| Instant::now() + t)
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(100_000, 100)
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get_bytes(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        if let Some(mut entry) = self.data.get_mut(key) {
            if entry.is_expired() {
                drop(entry);
                self.data.remove(key);
                return Ok(None);
            }

            entry.touch();
            Ok(Some(entry.data.clone()))
        } else {
            Ok(None)
        }
    }

    async fn set_bytes(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()> {
        self.evict_if_needed();

        let expires_at = Self::expires_at(Some(ttl));
        self.data
            .insert(key.to_string(), CacheEntry::new(value.to_vec(), expires_at));

        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.data.remove(key);
        self.zsets.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        if let Some(entry) = self.data.get(key) {
            return Ok(!entry.is_expired());
        }
        if let Some(zset) = self.zsets.get(key) {
            return Ok(!zset.is_expired());
        }
        Ok(false)
    }

    async fn zset_add(
        &self,
        key: &str,
        score: f64,
        member: &str,
        ttl: Option<Duration>,
    ) -> CacheResult<bool> {
        use dashmap::mapref::entry::Entry;

        match self.zsets.entry(key.to_string()) {
            Entry::Occupied(mut e) => {
                let entry = e.get_mut();
                if entry.is_expired() {
                    let mut fresh = ZSetEntry::new(Self::expires_at(ttl));
                    fresh.members.insert(member.to_string(), score);
                    *entry = fresh;
                    Ok(true)
                } else {
                    Ok(entry.members.insert(member.to_string(), score).is_none())
                }
            }
            Entry::Vacant(e) => {
                let mut entry = ZSetEntry::new(Self::expires_at(ttl));
                entry.members.insert(member.to_string(), score);
                e.insert(entry);
                Ok(true)
            }
        }
    }

    async fn zset_incr_by(
        &self,
        key: &str,
        member: &str,
        delta: f64,
        ttl: Option<Duration>,
    ) -> CacheResult<f64> {
        use dashmap::mapref::entry::Entry;

        match self.zsets.entry(key.to_string()) {
            Entry::Occupied(mut e) => {
                let entry = e.get_mut();
                if entry.is_expired() {
                    let mut fresh = ZSetEntry::new(Self::expires_at(ttl));
                    fresh.members.insert(member.to_string(), delta);
                    *entry = fresh;
                    Ok(delta)
                } else {
                    let score = entry.members.entry(member.to_string()).or_insert(0.0);
                    *score += delta;
                    Ok(*score)
                }
            }
            Entry::Vacant(e) => {
                let mut entry = ZSetEntry::new(Self::expires_at(ttl));
                entry.members.insert(member.to_string(), delta);
                e.insert(entry);
                Ok(delta)
            }
        }
    }

    async fn zset_remove_by_score(&self, key: &str, min: f64, max: f64) -> CacheResult<u64> {
        let mut removed = 0;
        if let Some(mut entry) = self.zsets.get_mut(key) {
            if entry.is_expired() {
                drop(entry);
                self.zsets.remove(key);
                return Ok(0);
            }
            let before = entry.members.len();
            entry.members.retain(|_, score| *score < min || *score > max);
            removed = (before - entry.members.len()) as u64;
        }
        Ok(removed)
    }

    async fn zset_cardinality(&self, key: &str) -> CacheResult<usize> {
        match self.zsets.get(key) {
            Some(entry) if !entry.is_expired() => Ok(entry.members.len()),
            _ => Ok(0),
        }
    }

    async fn zset_range_with_scores(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> CacheResult<Vec<(String, f64)>> {
        let entry = match self.zsets.get(key) {
            Some(entry) if !entry.is_expired() => entry,
            _ => return Ok(Vec::new()),
        };

        let sorted = entry.sorted();
        let len = sorted.len() as isize;

        // Redis index semantics: negative counts from the end, range is
        // inclusive, out-of-bounds clamps to the set.
        let resolve = |idx: isize| -> isize {
            if idx < 0 { len + idx } else { idx }
        };
        let from = resolve(start).max(0);
        let to = resolve(stop).min(len - 1);

        if from > to || len == 0 {
            return Ok(Vec::new());
        }

        Ok(sorted[from as usize..=to as usize].to_vec())
    }

    async fn set_expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        if let Some(mut entry) = self.data.get_mut(key) {
            entry.expires_at = Self::expires_at(Some(ttl));
            return Ok(true);
        }
        if let Some(mut entry) = self.zsets.get_mut(key) {
            entry.expires_at = Self::expires_at(Some(ttl));
            return Ok(true);
        }
        Ok(false)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_set_roundtrip() {
        let cache = MemoryCache::default();
        cache
            .set_bytes("k", b"value", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get_bytes("k").await.unwrap(), Some(b"value".to_vec()));
        assert!(cache.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn expired_entries_read_as_miss() {
        let cache = MemoryCache::default();
        cache
            .set_bytes("k", b"value", Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get_bytes("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn eviction_keeps_map_bounded() {
        let cache = MemoryCache::new(10, 5);
        for i in 0..30 {
            cache
                .set_bytes(&format!("k{i}"), b"v", Duration::from_secs(60))
                .await
                .unwrap();
        }
        assert!(cache.data.len() <= 11);
    }

    #[tokio::test]
    async fn zset_range_follows_redis_index_semantics() {
        let cache = MemoryCache::default();
        for (member, score) in [("a", 1.0), ("b", 2.0), ("c", 3.0)] {
            cache.zset_add("z", score, member, None).await.unwrap();
        }

        let all = cache.zset_range_with_scores("z", 0, -1).await.unwrap();
        assert_eq!(
            all,
            vec![
                ("a".to_string(), 1.0),
                ("b".to_string(), 2.0),
                ("c".to_string(), 3.0)
            ]
        );

        let first = cache.zset_range_with_scores("z", 0, 0).await.unwrap();
        assert_eq!(first, vec![("a".to_string(), 1.0)]);
    }

    #[tokio::test]
    async fn zset_remove_by_score_drops_window() {
        let cache = MemoryCache::default();
        for (member, score) in [("old", 1.0), ("mid", 5.0), ("new", 9.0)] {
            cache.zset_add("w", score, member, None).await.unwrap();
        }
        let removed = cache.zset_remove_by_score("w", 0.0, 5.0).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(cache.zset_cardinality("w").await.unwrap(), 1);
    }
}
