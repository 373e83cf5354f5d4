use std::time::Duration;

use async_trait::async_trait;
use redis::{Value, aio::MultiplexedConnection};

use super::{error::CacheResult, traits::Cache};
use crate::config::CacheStoreConfig;

/// Redis-backed cache store.
///
/// A single multiplexed connection is fetched per operation; redis-rs
/// pipelines commands on it internally, so the store behaves as
/// single-threaded per connection from the client's point of view.
pub struct RedisCache {
    client: redis::Client,
    key_prefix: String,
}

impl RedisCache {
    pub async fn from_config(config: &CacheStoreConfig) -> CacheResult<Self> {
        let client = redis::Client::open(config.url.as_str())?;
        let cache = Self {
            client,
            key_prefix: config.key_prefix.clone(),
        };

        // Verify connectivity up front rather than on the first request.
        let mut conn = cache.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;

        cache.warn_if_noeviction(&mut conn).await;

        Ok(cache)
    }

    fn prefixed_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    async fn connection(&self) -> CacheResult<MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    /// The tier is designed to coexist with LFU/LRU eviction at the
    /// store. `noeviction` turns cache pressure into write errors, which
    /// the fail-open layer would silently swallow on every set.
    async fn warn_if_noeviction(&self, conn: &mut MultiplexedConnection) {
        let reply: Result<Vec<String>, redis::RedisError> = redis::cmd("CONFIG")
            .arg("GET")
            .arg("maxmemory-policy")
            .query_async(conn)
            .await;

        match reply {
            Ok(pair) => {
                if let Some(policy) = pair.get(1)
                    && policy == "noeviction"
                {
                    tracing::warn!(
                        policy = %policy,
                        "cache store reports maxmemory-policy=noeviction; \
                         configure an LRU or LFU policy (e.g. allkeys-lru)"
                    );
                }
            }
            Err(e) => {
                // CONFIG may be disabled on managed Redis; not fatal.
                tracing::debug!(error = %e, "could not read maxmemory-policy");
            }
        }
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get_bytes(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut conn = self.connection().await?;
        let full_key = self.prefixed_key(key);

        let data: Option<Vec<u8>> = redis::cmd("GET")
            .arg(&full_key)
            .query_async(&mut conn)
            .await?;

        Ok(data)
    }

    async fn set_bytes(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()> {
        let mut conn = self.connection().await?;
        let full_key = self.prefixed_key(key);

        if ttl.as_secs() > 0 {
            let _: () = redis::cmd("SETEX")
                .arg(&full_key)
                .arg(ttl.as_secs())
                .arg(value)
                .query_async(&mut conn)
                .await?;
        } else {
            let _: () = redis::cmd("SET")
                .arg(&full_key)
                .arg(value)
                .query_async(&mut conn)
                .await?;
        }

        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.connection().await?;
        let full_key = self.prefixed_key(key);

        let _: () = redis::cmd("DEL")
            .arg(&full_key)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.connection().await?;
        let full_key = self.prefixed_key(key);

        let exists: i64 = redis::cmd("EXISTS")
            .arg(&full_key)
            .query_async(&mut conn)
            .await?;
        Ok(exists == 1)
    }

    async fn zset_add(
        &self,
        key: &str,
        score: f64,
        member: &str,
        ttl: Option<Duration>,
    ) -> CacheResult<bool> {
        let mut conn = self.connection().await?;
        let full_key = self.prefixed_key(key);

        // ZADD returns the number of elements added (0 if updated).
        let added: i64 = redis::cmd("ZADD")
            .arg(&full_key)
            .arg(score)
            .arg(member)
            .query_async(&mut conn)
            .await?;

        // Only set TTL when the key has no existing expiry, so windows
        // are not extended by every insertion.
        if let Some(ttl) = ttl
            && ttl.as_secs() > 0
        {
            let current_ttl: i64 = redis::cmd("TTL")
                .arg(&full_key)
                .query_async(&mut conn)
                .await?;
            if current_ttl < 0 {
                let _: () = redis::cmd("EXPIRE")
                    .arg(&full_key)
                    .arg(ttl.as_secs())
                    .query_async(&mut conn)
                    .await?;
            }
        }

        Ok(added > 0)
    }

    async fn zset_incr_by(
        &self,
        key: &str,
        member: &str,
        delta: f64,
        ttl: Option<Duration>,
    ) -> CacheResult<f64> {
        let mut conn = self.connection().await?;
        let full_key = self.prefixed_key(key);

        let score: f64 = redis::cmd("ZINCRBY")
            .arg(&full_key)
            .arg(delta)
            .arg(member)
            .query_async(&mut conn)
            .await?;

        if let Some(ttl) = ttl
            && ttl.as_secs() > 0
        {
            let current_ttl: i64 = redis::cmd("TTL")
                .arg(&full_key)
                .query_async(&mut conn)
                .await?;
            if current_ttl < 0 {
                let _: () = redis::cmd("EXPIRE")
                    .arg(&full_key)
                    .arg(ttl.as_secs())
                    .query_async(&mut conn)
                    .await?;
            }
        }

        Ok(score)
    }

    async fn zset_remove_by_score(&self, key: &str, min: f64, max: f64) -> CacheResult<u64> {
        let mut conn = self.connection().await?;
        let full_key = self.prefixed_key(key);

        let removed: u64 = redis::cmd("ZREMRANGEBYSCORE")
            .arg(&full_key)
            .arg(min)
            .arg(max)
            .query_async(&mut conn)
            .await?;

        Ok(removed)
    }

    async fn zset_cardinality(&self, key: &str) -> CacheResult<usize> {
        let mut conn = self.connection().await?;
        let full_key = self.prefixed_key(key);

        let count: i64 = redis::cmd("ZCARD")
            .arg(&full_key)
            .query_async(&mut conn)
            .await?;

        Ok(count as usize)
    }

    async fn zset_range_with_scores(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> CacheResult<Vec<(String, f64)>> {
        let mut conn = self.connection().await?;
        let full_key = self.prefixed_key(key);

        let value: Value = redis::cmd("ZRANGE")
            .arg(&full_key)
            .arg(start)
            .arg(stop)
            .arg("WITHSCORES")
            .query_async(&mut conn)
            .await?;

        // Response: [member1, score1, member2, score2, ...]
        let mut results = Vec::new();
        if let Value::Array(arr) = value {
            let mut iter = arr.into_iter();
            while let (Some(member_val), Some(score_val)) = (iter.next(), iter.next()) {
                let member = match member_val {
                    Value::BulkString(bytes) => String::from_utf8_lossy(&bytes).to_string(),
                    _ => continue,
                };
                let score = match score_val {
                    Value::BulkString(bytes) => {
                        String::from_utf8_lossy(&bytes).parse().unwrap_or(0.0)
                    }
                    Value::Double(f) => f,
                    _ => continue,
                };
                results.push((member, score));
            }
        }

        Ok(results)
    }

    async fn set_expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        let mut conn = self.connection().await?;
        let full_key = self.prefixed_key(key);

        let result: i64 = redis::cmd("EXPIRE")
            .arg(&full_key)
            .arg(ttl.as_secs())
            .query_async(&mut conn)
            .await?;

        Ok(result == 1)
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
