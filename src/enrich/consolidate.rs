//! Consolidated rating across independent sources.
//!
//! Up to four sources contribute per item: the primary ratings service
//! and the anime-list source on a 0–10 scale, Metacritic and Rotten
//! Tomatoes on 0–100 (divided by ten). The consolidated score is the
//! arithmetic mean of the sources that answered, rounded to one decimal,
//! and carries a color band for display. Items with zero sources are
//! memoized so dead ids stop fanning out.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    cache::{CacheKeys, CacheTier, CacheVersion},
    observability::metrics,
    providers::{BoundedTtlMap, ProviderRegistry},
};

/// Inter-wave pacing for batch consolidation. The first gap is larger:
/// wave one lands on entirely cold provider caches and the extra
/// breathing room keeps the initial burst off the upstreams.
const FIRST_WAVE_DELAY: Duration = Duration::from_millis(150);
const WAVE_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Band {
    Excellent,
    Great,
    Good,
    Okay,
    Mediocre,
    Poor,
}

impl Band {
    pub fn from_score(score: f64) -> Self {
        if score >= 9.0 {
            Band::Excellent
        } else if score >= 8.0 {
            Band::Great
        } else if score >= 7.0 {
            Band::Good
        } else if score >= 6.0 {
            Band::Okay
        } else if score >= 5.0 {
            Band::Mediocre
        } else {
            Band::Poor
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsolidatedRating {
    /// Mean of the normalized sources, one decimal, in [0, 10].
    pub score: f64,
    pub source_count: u32,
    /// Normalized per-source scores keyed by source name.
    pub per_source: BTreeMap<String, f64>,
    pub band: Band,
    pub computed_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub votes: Option<u64>,
}

pub struct Consolidator {
    providers: Arc<ProviderRegistry>,
    tier: Arc<CacheTier>,
    version: Arc<CacheVersion>,
    consolidated_ttl: Duration,
    concurrency: usize,
    negative: BoundedTtlMap<()>,
}

impl Consolidator {
    pub fn new(
        providers: Arc<ProviderRegistry>,
        tier: Arc<CacheTier>,
        version: Arc<CacheVersion>,
        consolidated_ttl_secs: u64,
        concurrency: usize,
    ) -> Self {
        Self {
            providers,
            tier,
            version,
            consolidated_ttl: Duration::from_secs(consolidated_ttl_secs),
            concurrency: concurrency.max(1),
            negative: BoundedTtlMap::new(50_000, Duration::from_secs(1_800)),
        }
    }

    /// Consolidate one item. The four source lookups run in parallel.
    pub async fn consolidate(&self, item_id: &str, region: &str) -> Option<ConsolidatedRating> {
        if self.negative.get(item_id).is_some() {
            return None;
        }

        let key = CacheKeys::consolidated_rating(&self.version.current(), item_id);
        if let Some(rating) = self.tier.get_json::<ConsolidatedRating>(&key).await {
            return Some(rating);
        }

        let (primary, anime, extra) = tokio::join!(
            self.providers.ratings.fetch_by_item_id(item_id),
            self.providers.anime.fetch_by_item_id(item_id),
            self.providers.metadata.fetch_by_item_id(item_id, region),
        );

        let mut per_source = BTreeMap::new();
        if let Some(rating) = &primary {
            per_source.insert("ratings".to_string(), rating.rating);
        }
        if let Some(rating) = &anime {
            per_source.insert("anilist".to_string(), rating.rating);
        }
        if let Some(extra) = &extra {
            if let Some(metacritic) = extra.metacritic {
                per_source.insert("metacritic".to_string(), metacritic / 10.0);
            }
            if let Some(rotten) = extra.rotten_tomatoes {
                per_source.insert("rottenTomatoes".to_string(), rotten / 10.0);
            }
        }

        if per_source.is_empty() {
            self.negative.insert(item_id, ());
            metrics::record_consolidation("empty");
            return None;
        }

        let mean = per_source.values().sum::<f64>() / per_source.len() as f64;
        let score = (mean * 10.0).round() / 10.0;

        let rating = ConsolidatedRating {
            score,
            source_count: per_source.len() as u32,
            band: Band::from_score(score),
            per_source,
            computed_at: chrono::Utc::now().timestamp(),
            votes: primary.and_then(|r| r.votes),
        };

        self.tier
            .spawn_set_json(key, rating.clone(), self.consolidated_ttl);
        metrics::record_consolidation("computed");

        Some(rating)
    }

    /// Single-source path: only the primary rating, no cross-source
    /// averaging. Used when the config pins a metadata provider.
    pub async fn primary_only(&self, item_id: &str) -> Option<ConsolidatedRating> {
        let rating = self.providers.ratings.fetch_by_item_id(item_id).await?;
        let score = (rating.rating * 10.0).round() / 10.0;
        let mut per_source = BTreeMap::new();
        per_source.insert("ratings".to_string(), score);
        Some(ConsolidatedRating {
            score,
            source_count: 1,
            band: Band::from_score(score),
            per_source,
            computed_at: chrono::Utc::now().timestamp(),
            votes: rating.votes,
        })
    }

    /// Consolidate a batch of ids in rolling waves of `concurrency`
    /// items; within a wave the items run in parallel. A short pause
    /// between waves smooths the burst against the providers.
    pub async fn consolidate_batch(
        &self,
        item_ids: &[String],
        region: &str,
        primary_only: bool,
    ) -> BTreeMap<String, ConsolidatedRating> {
        let mut results = BTreeMap::new();

        for (wave, chunk) in item_ids.chunks(self.concurrency).enumerate() {
            if wave == 1 {
                tokio::time::sleep(FIRST_WAVE_DELAY).await;
            } else if wave > 1 {
                tokio::time::sleep(WAVE_DELAY).await;
            }

            let lookups = chunk.iter().map(|id| async move {
                let rating = if primary_only {
                    self.primary_only(id).await
                } else {
                    self.consolidate(id, region).await
                };
                (id.clone(), rating)
            });

            for (id, rating) in futures::future::join_all(lookups).await {
                if let Some(rating) = rating {
                    results.insert(id, rating);
                }
            }
        }

        results
    }
}
