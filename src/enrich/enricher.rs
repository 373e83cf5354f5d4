//! Document enrichment: fan out rating lookups for the items of an
//! upstream catalog/meta document and rewrite titles and descriptions
//! according to the per-installation format configuration.
//!
//! Enrichment is read-only with respect to its inputs: a new document is
//! produced, and items whose id is not in a supported format (or for
//! which every source came back empty) pass through untouched.

use std::{collections::BTreeMap, sync::Arc};

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use super::{
    consolidate::{ConsolidatedRating, Consolidator},
    format,
};
use crate::{
    config::UserConfig,
    observability::metrics,
    providers::{ExtraMetadata, ProviderRegistry, TitleRating},
};

/// Canonical (`tt`) and anime-list (`kitsu:`/`mal:`) ids are enrichable.
static SUPPORTED_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(tt\d+|kitsu:\d+|mal:\d+)$").expect("static pattern"));

/// Episode ids are `{seriesId}:{season}:{episode}`.
static EPISODE_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(tt\d+):(\d+):(\d+)$").expect("static pattern"));

pub struct Enricher {
    consolidator: Arc<Consolidator>,
    providers: Arc<ProviderRegistry>,
    concurrency: usize,
}

impl Enricher {
    pub fn new(
        consolidator: Arc<Consolidator>,
        providers: Arc<ProviderRegistry>,
        concurrency: usize,
    ) -> Self {
        Self {
            consolidator,
            providers,
            concurrency: concurrency.max(1),
        }
    }

    /// Enrich a catalog document (`{"metas": [...]}`).
    pub async fn enrich_catalog(&self, doc: &Value, config: &UserConfig) -> Value {
        let mut out = doc.clone();
        if !config.ratings_enabled {
            return out;
        }

        let Some(metas) = out.get_mut("metas").and_then(Value::as_array_mut) else {
            return out;
        };

        let ids: Vec<String> = metas
            .iter()
            .filter_map(|item| item.get("id").and_then(Value::as_str))
            .filter(|id| SUPPORTED_ID.is_match(id))
            .map(str::to_string)
            .collect();

        if ids.is_empty() {
            return out;
        }

        let started = std::time::Instant::now();
        let ratings = self
            .consolidator
            .consolidate_batch(&ids, &config.region, primary_only(config))
            .await;
        let description_data = self
            .description_data_for(config, &ids, &ratings)
            .await;

        let mut enriched_count = 0usize;
        for item in metas.iter_mut() {
            if self.apply_item(item, config, &ratings, &description_data, false) {
                enriched_count += 1;
            }
        }

        metrics::record_enrichment("catalog", ids.len(), started.elapsed().as_secs_f64());
        tracing::debug!(
            items = ids.len(),
            enriched = enriched_count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "catalog enriched"
        );

        out
    }

    /// Enrich a meta document (`{"meta": {...}}`), recursing into a
    /// series' episode list.
    pub async fn enrich_meta(&self, doc: &Value, config: &UserConfig) -> Value {
        let mut out = doc.clone();
        if !config.ratings_enabled {
            return out;
        }

        let Some(meta) = out.get_mut("meta") else {
            return out;
        };
        if meta.is_null() {
            return out;
        }

        let id = meta
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_default();

        if SUPPORTED_ID.is_match(&id) {
            let ids = vec![id.clone()];
            let ratings = self
                .consolidator
                .consolidate_batch(&ids, &config.region, primary_only(config))
                .await;
            let description_data = self.description_data_for(config, &ids, &ratings).await;
            self.apply_item(meta, config, &ratings, &description_data, false);
        }

        // A series meta carries its episodes in `videos[]`; those use
        // episode-level rating lookups.
        let is_series = meta.get("type").and_then(Value::as_str) == Some("series");
        if is_series
            && let Some(videos) = meta.get_mut("videos").and_then(Value::as_array_mut)
        {
            self.enrich_episodes(videos, config).await;
        }

        out
    }

    /// Fetch certification and auxiliary metadata for items that will
    /// render a description line. Providers memoize, so overlap with the
    /// consolidator's own lookups is cheap.
    async fn description_data_for(
        &self,
        config: &UserConfig,
        ids: &[String],
        ratings: &BTreeMap<String, ConsolidatedRating>,
    ) -> BTreeMap<String, (Option<String>, Option<ExtraMetadata>)> {
        if !config.inject_location.includes_description() {
            return BTreeMap::new();
        }

        let mut data = BTreeMap::new();
        let wanted: Vec<&String> = ids.iter().filter(|id| ratings.contains_key(*id)).collect();

        for chunk in wanted.chunks(self.concurrency) {
            let lookups = chunk.iter().map(|id| async move {
                let (certification, extra) = tokio::join!(
                    self.providers.certification.fetch_by_item_id(id),
                    self.providers.metadata.fetch_by_item_id(id, &config.region),
                );
                ((*id).clone(), (certification, extra))
            });
            for (id, pair) in futures::future::join_all(lookups).await {
                data.insert(id, pair);
            }
        }

        data
    }

    /// Apply title/description rewriting to one item. Returns whether
    /// anything was injected.
    fn apply_item(
        &self,
        item: &mut Value,
        config: &UserConfig,
        ratings: &BTreeMap<String, ConsolidatedRating>,
        description_data: &BTreeMap<String, (Option<String>, Option<ExtraMetadata>)>,
        is_episode: bool,
    ) -> bool {
        let Some(id) = item.get("id").and_then(Value::as_str).map(str::to_string) else {
            return false;
        };
        let Some(rating) = ratings.get(&id) else {
            return false;
        };

        let mut touched = false;

        let title_applies = if is_episode {
            config.title_format.apply_to_episodes
        } else {
            config.title_format.apply_to_catalog
        };
        if config.inject_location.includes_title() && title_applies {
            for field in ["name", "title"] {
                if let Some(original) = item.get(field).and_then(Value::as_str) {
                    let rewritten =
                        format::apply_to_title(&config.title_format, original, rating.score);
                    item[field] = Value::String(rewritten);
                    touched = true;
                    break;
                }
            }
        }

        let description_applies = if is_episode {
            config.description_format.apply_to_episodes
        } else {
            config.description_format.apply_to_catalog
        };
        if config.inject_location.includes_description() && description_applies {
            let (certification, extra) = description_data
                .get(&id)
                .map(|(c, e)| (c.as_deref(), e.as_ref()))
                .unwrap_or((None, None));
            let original = item
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string);
            let rewritten = format::apply_to_description(
                &config.description_format,
                original.as_deref(),
                rating,
                certification,
                extra,
            );
            item["description"] = Value::String(rewritten);
            touched = true;
        }

        touched
    }

    /// Episode pass over `videos[]`: collect ids, batch the episode
    /// rating lookups in bounded waves, then rewrite.
    async fn enrich_episodes(&self, videos: &mut [Value], config: &UserConfig) {
        let episode_keys: Vec<(String, String, u32, u32)> = videos
            .iter()
            .filter_map(|video| video.get("id").and_then(Value::as_str))
            .filter_map(|id| {
                let caps = EPISODE_ID.captures(id)?;
                let series = caps.get(1)?.as_str().to_string();
                let season = caps.get(2)?.as_str().parse().ok()?;
                let episode = caps.get(3)?.as_str().parse().ok()?;
                Some((id.to_string(), series, season, episode))
            })
            .collect();

        if episode_keys.is_empty() {
            return;
        }

        let mut episode_ratings: BTreeMap<String, TitleRating> = BTreeMap::new();
        for chunk in episode_keys.chunks(self.concurrency) {
            let lookups = chunk.iter().map(|(id, series, season, episode)| async move {
                let rating = self
                    .providers
                    .ratings
                    .fetch_episode(series, *season, *episode)
                    .await;
                (id.clone(), rating)
            });
            for (id, rating) in futures::future::join_all(lookups).await {
                if let Some(rating) = rating {
                    episode_ratings.insert(id, rating);
                }
            }
        }

        // Episode ratings are single-source; wrap them in the shape the
        // formatter expects.
        let consolidated: BTreeMap<String, ConsolidatedRating> = episode_ratings
            .into_iter()
            .map(|(id, rating)| {
                let score = (rating.rating * 10.0).round() / 10.0;
                let mut per_source = BTreeMap::new();
                per_source.insert("ratings".to_string(), score);
                (
                    id,
                    ConsolidatedRating {
                        score,
                        source_count: 1,
                        band: super::consolidate::Band::from_score(score),
                        per_source,
                        computed_at: chrono::Utc::now().timestamp(),
                        votes: rating.votes,
                    },
                )
            })
            .collect();

        let no_description_data = BTreeMap::new();
        for video in videos.iter_mut() {
            self.apply_item(video, config, &consolidated, &no_description_data, true);
        }
    }
}

/// The legacy single-source path skips cross-source consolidation when
/// the config pins the primary provider.
fn primary_only(config: &UserConfig) -> bool {
    matches!(config.metadata_provider.as_deref(), Some("ratings" | "primary"))
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    use super::*;
    use crate::{
        cache::{CacheTier, CacheVersion, MemoryCache},
        config::{CacheTtlConfig, EnrichmentConfig},
    };

    fn enricher(server: &MockServer) -> Enricher {
        let tier = Arc::new(CacheTier::new(Some(Arc::new(MemoryCache::default()))));
        let version = Arc::new(CacheVersion::new("1"));
        let enrichment = EnrichmentConfig {
            ratings_service_url: server.uri(),
            metadata_api_url: server.uri(),
            anilist_api_url: server.uri(),
            ..EnrichmentConfig::default()
        };
        let providers = Arc::new(ProviderRegistry::new(
            reqwest::Client::new(),
            &enrichment,
            &CacheTtlConfig::default(),
            Arc::clone(&tier),
            Arc::clone(&version),
        ));
        let consolidator = Arc::new(Consolidator::new(
            Arc::clone(&providers),
            tier,
            version,
            3600,
            10,
        ));
        Enricher::new(consolidator, providers, 10)
    }

    fn config(value: serde_json::Value) -> UserConfig {
        UserConfig::from_value(&value).unwrap()
    }

    async fn mount_rating(server: &MockServer, id: &str, rating: f64) {
        Mock::given(method("GET"))
            .and(path(format!("/api/ratings/{id}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"rating": rating})))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/api/title/{id}")))
            .respond_with(ResponseTemplate::new(404))
            .mount(server)
            .await;
    }

    async fn mount_missing(server: &MockServer, id: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/api/ratings/{id}")))
            .respond_with(ResponseTemplate::new(404))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/api/title/{id}")))
            .respond_with(ResponseTemplate::new(404))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn rewrites_titles_with_prefix_template() {
        let server = MockServer::start().await;
        mount_rating(&server, "tt1", 8.5).await;
        mount_missing(&server, "tt2").await;

        let enricher = enricher(&server);
        let config = config(json!({
            "upstream": "https://u/manifest.json",
            "titleFormat": {"position": "prefix", "template": "★ {rating}", "separator": " | "}
        }));

        let doc = json!({"metas": [{"id": "tt1", "name": "A"}, {"id": "tt2", "name": "B"}]});
        let enriched = enricher.enrich_catalog(&doc, &config).await;

        assert_eq!(
            enriched,
            json!({"metas": [{"id": "tt1", "name": "★ 8.5 | A"}, {"id": "tt2", "name": "B"}]})
        );
        // Input untouched.
        assert_eq!(doc["metas"][0]["name"], "A");
    }

    #[tokio::test]
    async fn unsupported_ids_are_skipped() {
        let server = MockServer::start().await;
        let enricher = enricher(&server);
        let config = config(json!({"upstream": "https://u/manifest.json"}));

        let doc = json!({"metas": [{"id": "custom:42", "name": "X"}]});
        let enriched = enricher.enrich_catalog(&doc, &config).await;
        assert_eq!(enriched, doc);
    }

    #[tokio::test]
    async fn ratings_disabled_passes_through() {
        let server = MockServer::start().await;
        let enricher = enricher(&server);
        let config = config(json!({
            "upstream": "https://u/manifest.json",
            "ratingsEnabled": false
        }));

        let doc = json!({"metas": [{"id": "tt1", "name": "A"}]});
        assert_eq!(enricher.enrich_catalog(&doc, &config).await, doc);
    }

    #[tokio::test]
    async fn enrichment_is_idempotent() {
        let server = MockServer::start().await;
        mount_rating(&server, "tt1", 8.5).await;

        let enricher = enricher(&server);
        let config = config(json!({"upstream": "https://u/manifest.json"}));

        let doc = json!({"metas": [{"id": "tt1", "name": "A"}]});
        let once = enricher.enrich_catalog(&doc, &config).await;
        let twice = enricher.enrich_catalog(&once, &config).await;
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn description_injection_builds_the_metadata_line() {
        let server = MockServer::start().await;
        mount_rating(&server, "tt1", 8.0).await;
        Mock::given(method("GET"))
            .and(path("/api/certification/tt1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"certification": "PG-13"})),
            )
            .mount(&server)
            .await;

        let enricher = enricher(&server);
        let config = config(json!({
            "upstream": "https://u/manifest.json",
            "injectLocation": "description",
            "descriptionFormat": {
                "position": "prefix",
                "template": "★ {rating}",
                "separator": "\n",
                "includeFlags": ["rating", "certification"]
            }
        }));

        let doc = json!({"metas": [{"id": "tt1", "name": "A", "description": "Plot."}]});
        let enriched = enricher.enrich_catalog(&doc, &config).await;

        assert_eq!(enriched["metas"][0]["name"], "A");
        assert_eq!(
            enriched["metas"][0]["description"],
            "★ 8.0 | PG-13\nPlot."
        );
    }

    #[tokio::test]
    async fn series_meta_enriches_episodes() {
        let server = MockServer::start().await;
        mount_rating(&server, "tt1", 8.0).await;
        Mock::given(method("GET"))
            .and(path("/api/ratings/tt1/episode/1/1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"rating": 9.2})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/ratings/tt1/episode/1/2"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let enricher = enricher(&server);
        let config = config(json!({"upstream": "https://u/manifest.json"}));

        let doc = json!({"meta": {
            "id": "tt1",
            "type": "series",
            "name": "Show",
            "videos": [
                {"id": "tt1:1:1", "name": "Pilot"},
                {"id": "tt1:1:2", "name": "Second"}
            ]
        }});
        let enriched = enricher.enrich_meta(&doc, &config).await;

        assert_eq!(enriched["meta"]["name"], "★ 8.0 | Show");
        assert_eq!(enriched["meta"]["videos"][0]["name"], "★ 9.2 | Pilot");
        assert_eq!(enriched["meta"]["videos"][1]["name"], "Second");
    }

    #[tokio::test]
    async fn episode_rewrite_respects_apply_flag() {
        let server = MockServer::start().await;
        mount_rating(&server, "tt1", 8.0).await;
        Mock::given(method("GET"))
            .and(path("/api/ratings/tt1/episode/1/1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"rating": 9.2})))
            .mount(&server)
            .await;

        let enricher = enricher(&server);
        let config = config(json!({
            "upstream": "https://u/manifest.json",
            "titleFormat": {"applyToEpisodes": false}
        }));

        let doc = json!({"meta": {
            "id": "tt1",
            "type": "series",
            "name": "Show",
            "videos": [{"id": "tt1:1:1", "name": "Pilot"}]
        }});
        let enriched = enricher.enrich_meta(&doc, &config).await;
        assert_eq!(enriched["meta"]["videos"][0]["name"], "Pilot");
    }

    #[tokio::test]
    async fn null_meta_passes_through() {
        let server = MockServer::start().await;
        let enricher = enricher(&server);
        let config = config(json!({"upstream": "https://u/manifest.json"}));
        let doc = json!({"meta": null});
        assert_eq!(enricher.enrich_meta(&doc, &config).await, doc);
    }
}
