//! Bounded in-process TTL map.
//!
//! Providers keep a small positive cache for fast repeat hits and a
//! scoped negative-result memo so long-missing items are not queried
//! repeatedly. Both need a hard size cap: at the threshold, expired
//! entries are swept first, then the entries closest to expiry are
//! evicted in a batch.

use std::time::{Duration, Instant};

use dashmap::DashMap;

pub struct BoundedTtlMap<V> {
    entries: DashMap<String, (V, Instant)>,
    max_entries: usize,
    ttl: Duration,
}

impl<V: Clone> BoundedTtlMap<V> {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: max_entries.max(1),
            ttl,
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let entry = self.entries.get(key)?;
        let (value, expires_at) = entry.value();
        if Instant::now() > *expires_at {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        Some(value.clone())
    }

    pub fn insert(&self, key: &str, value: V) {
        self.sweep_if_needed();
        self.entries
            .insert(key.to_string(), (value, Instant::now() + self.ttl));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn sweep_if_needed(&self) {
        if self.entries.len() < self.max_entries {
            return;
        }

        let now = Instant::now();
        self.entries.retain(|_, (_, expires_at)| *expires_at > now);

        if self.entries.len() < self.max_entries {
            return;
        }

        // Still full of live entries: drop the tenth closest to expiry.
        let batch = (self.max_entries / 10).max(1);
        let mut by_expiry: Vec<(String, Instant)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().1))
            .collect();
        by_expiry.sort_by_key(|(_, expires_at)| *expires_at);
        for (key, _) in by_expiry.into_iter().take(batch) {
            self.entries.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_and_expiry() {
        let map = BoundedTtlMap::new(10, Duration::from_millis(20));
        map.insert("k", 1u32);
        assert_eq!(map.get("k"), Some(1));
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(map.get("k"), None);
    }

    #[test]
    fn stays_bounded_under_pressure() {
        let map = BoundedTtlMap::new(100, Duration::from_secs(60));
        for i in 0..500 {
            map.insert(&format!("k{i}"), i);
        }
        assert!(map.len() <= 101);
    }

    #[test]
    fn memoizes_negative_results() {
        let map: BoundedTtlMap<Option<u32>> = BoundedTtlMap::new(10, Duration::from_secs(60));
        map.insert("missing", None);
        // A memoized None is distinguishable from an absent entry.
        assert_eq!(map.get("missing"), Some(None));
        assert_eq!(map.get("never-seen"), None);
    }
}
