//! Sliding-window rate limiter over the store's sorted sets.
//!
//! Each admitted request appends a `(timestamp, nonce)` member scored by
//! its microsecond timestamp to the identity's window set. A check drops
//! members older than one second, counts the remainder, and admits while
//! the count is under the tier's burst. The set expires after two
//! windows so idle identities cost nothing. Store failures admit the
//! request (fail-open), mirroring the cache tier.
//!
//! The limiter runs on the cache-miss path only: cache hits and
//! coalesced single-flight waiters never consume budget, so one compute
//! can serve arbitrarily many limited callers.

mod identity;

use std::sync::Arc;

pub use identity::{ClientIdentity, RateTier, is_search_route};
use uuid::Uuid;

use crate::{
    cache::{CacheKeys, CacheTier, CacheVersion},
    config::RateLimitSettings,
    observability::metrics,
};

/// One-second window, scored in microseconds.
const WINDOW_MICROS: i64 = 1_000_000;

#[derive(Debug, Clone, Copy)]
pub struct Decision {
    pub allowed: bool,
    /// Burst ceiling for the tier.
    pub limit: u32,
    /// Admissions left in the current window.
    pub remaining: u32,
    /// Seconds until the oldest in-window entry expires.
    pub retry_after_secs: u64,
}

impl Decision {
    fn admit(limit: u32, in_window: usize) -> Self {
        Self {
            allowed: true,
            limit,
            remaining: (limit as i64 - in_window as i64 - 1).max(0) as u32,
            retry_after_secs: 1,
        }
    }

    fn fail_open(limit: u32) -> Self {
        Self {
            allowed: true,
            limit,
            remaining: limit,
            retry_after_secs: 1,
        }
    }
}

pub struct RateLimiter {
    tier: Arc<CacheTier>,
    version: Arc<CacheVersion>,
    settings: RateLimitSettings,
}

impl RateLimiter {
    pub fn new(
        tier: Arc<CacheTier>,
        version: Arc<CacheVersion>,
        settings: RateLimitSettings,
    ) -> Self {
        Self {
            tier,
            version,
            settings,
        }
    }

    /// Check and record one admission for `identity` on `rate_tier`.
    pub async fn check(&self, identity: &ClientIdentity, rate_tier: RateTier) -> Decision {
        let limits = rate_tier.limits(&self.settings);

        if !self.settings.enabled {
            return Decision::fail_open(limits.burst);
        }

        let store = match self.tier.store() {
            Some(store) => store,
            None => {
                metrics::record_rate_limit(rate_tier.as_str(), "bypass");
                return Decision::fail_open(limits.burst);
            }
        };

        let key = CacheKeys::rate_limit(&self.version.current(), rate_tier.as_str(), &identity.key());
        let now = chrono::Utc::now().timestamp_micros();
        let window_start = now - WINDOW_MICROS;

        let decision = async {
            // 1. Drop entries that fell out of the window.
            store
                .zset_remove_by_score(&key, 0.0, window_start as f64)
                .await?;

            // 2. Count what remains.
            let in_window = store.zset_cardinality(&key).await?;

            // 3. Admit iff under burst.
            if in_window < limits.burst as usize {
                // 4. Record this admission; ties at the same microsecond
                // are disambiguated by the nonce.
                let member = format!("{now}-{}", Uuid::new_v4().simple());
                store
                    .zset_add(&key, now as f64, &member, None)
                    .await?;
                // 5. Two windows of retention, refreshed on every admit.
                store
                    .set_expire(&key, std::time::Duration::from_secs(2))
                    .await?;
                return Ok::<_, crate::cache::CacheError>(Decision::admit(limits.burst, in_window));
            }

            // Rejected: report when the oldest in-window entry expires.
            let retry_after_secs = match store.zset_range_with_scores(&key, 0, 0).await?.first() {
                Some((_, oldest)) => {
                    let remaining_micros = (*oldest as i64 + WINDOW_MICROS - now).max(0);
                    // Ceiling in whole seconds, at least one.
                    ((remaining_micros + WINDOW_MICROS - 1) / WINDOW_MICROS).max(1) as u64
                }
                None => 1,
            };

            Ok(Decision {
                allowed: false,
                limit: limits.burst,
                remaining: 0,
                retry_after_secs,
            })
        }
        .await;

        match decision {
            Ok(decision) => {
                let outcome = if decision.allowed { "allowed" } else { "limited" };
                metrics::record_rate_limit(rate_tier.as_str(), outcome);
                if !decision.allowed {
                    tracing::debug!(
                        identity = %identity.key(),
                        tier = rate_tier.as_str(),
                        retry_after = decision.retry_after_secs,
                        "rate limit exceeded"
                    );
                }
                decision
            }
            Err(e) => {
                // Store trouble must not reject traffic.
                metrics::record_rate_limit(rate_tier.as_str(), "error");
                tracing::warn!(key = %key, error = %e, "rate limit check failed, admitting");
                Decision::fail_open(limits.burst)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::config::TierLimit;

    fn limiter(burst: u32) -> RateLimiter {
        let settings = RateLimitSettings {
            enabled: true,
            anonymous: TierLimit { rps: burst / 2, burst },
            authenticated: TierLimit { rps: burst / 2, burst },
            anonymous_search: TierLimit { rps: 1, burst: 2 },
            authenticated_search: TierLimit { rps: 1, burst: 2 },
        };
        RateLimiter::new(
            Arc::new(CacheTier::new(Some(Arc::new(MemoryCache::default())))),
            Arc::new(CacheVersion::new("1")),
            settings,
        )
    }

    #[tokio::test]
    async fn burst_admits_then_rejects() {
        let limiter = limiter(10);
        let identity = ClientIdentity::Anonymous("1.2.3.4".into());

        for i in 0..10 {
            let decision = limiter.check(&identity, RateTier::Anonymous).await;
            assert!(decision.allowed, "request {i} should be admitted");
        }

        let decision = limiter.check(&identity, RateTier::Anonymous).await;
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert!((1..=2).contains(&decision.retry_after_secs));
    }

    #[tokio::test]
    async fn window_slides_after_a_second() {
        let limiter = limiter(3);
        let identity = ClientIdentity::Anonymous("1.2.3.4".into());

        for _ in 0..3 {
            assert!(limiter.check(&identity, RateTier::Anonymous).await.allowed);
        }
        assert!(!limiter.check(&identity, RateTier::Anonymous).await.allowed);

        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        assert!(limiter.check(&identity, RateTier::Anonymous).await.allowed);
    }

    #[tokio::test]
    async fn identities_have_independent_windows() {
        let limiter = limiter(2);
        let a = ClientIdentity::Anonymous("1.1.1.1".into());
        let b = ClientIdentity::Anonymous("2.2.2.2".into());

        assert!(limiter.check(&a, RateTier::Anonymous).await.allowed);
        assert!(limiter.check(&a, RateTier::Anonymous).await.allowed);
        assert!(!limiter.check(&a, RateTier::Anonymous).await.allowed);
        assert!(limiter.check(&b, RateTier::Anonymous).await.allowed);
    }

    #[tokio::test]
    async fn disabled_store_fails_open() {
        let limiter = RateLimiter::new(
            Arc::new(CacheTier::disabled()),
            Arc::new(CacheVersion::new("1")),
            RateLimitSettings::default(),
        );
        let identity = ClientIdentity::Anonymous("1.2.3.4".into());
        for _ in 0..100 {
            assert!(limiter.check(&identity, RateTier::Anonymous).await.allowed);
        }
    }

    #[tokio::test]
    async fn remaining_counts_down() {
        let limiter = limiter(3);
        let identity = ClientIdentity::Anonymous("1.2.3.4".into());

        let first = limiter.check(&identity, RateTier::Anonymous).await;
        assert_eq!(first.remaining, 2);
        let second = limiter.check(&identity, RateTier::Anonymous).await;
        assert_eq!(second.remaining, 1);
    }
}
