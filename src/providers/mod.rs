mod anilist;
mod certification;
mod memo;
mod metadata;
mod ratings;

use std::sync::Arc;

pub use anilist::{AnimeListClient, AnimeRating};
pub use certification::CertificationClient;
pub use memo::BoundedTtlMap;
pub use metadata::{ExtraMetadata, MetadataClient};
pub use ratings::{RatingsClient, TitleRating};

use crate::{
    cache::{CacheTier, CacheVersion},
    config::{CacheTtlConfig, EnrichmentConfig},
};

/// All rating/metadata sources, shared across requests. Each client
/// carries its own in-process caches; the shared tier and version are
/// common.
pub struct ProviderRegistry {
    pub ratings: RatingsClient,
    pub certification: CertificationClient,
    pub metadata: MetadataClient,
    pub anime: AnimeListClient,
}

impl ProviderRegistry {
    pub fn new(
        client: reqwest::Client,
        enrichment: &EnrichmentConfig,
        ttl: &CacheTtlConfig,
        tier: Arc<CacheTier>,
        version: Arc<CacheVersion>,
    ) -> Self {
        Self {
            ratings: RatingsClient::new(
                client.clone(),
                enrichment.ratings_service_url.clone(),
                enrichment.provider_timeout_secs,
                Arc::clone(&tier),
                Arc::clone(&version),
                ttl.provider_secs,
            ),
            certification: CertificationClient::new(
                client.clone(),
                enrichment.metadata_api_url.clone(),
                enrichment.provider_timeout_secs,
                Arc::clone(&tier),
                Arc::clone(&version),
                ttl.provider_secs,
            ),
            metadata: MetadataClient::new(
                client.clone(),
                enrichment.metadata_api_url.clone(),
                enrichment.provider_timeout_secs,
                Arc::clone(&tier),
                Arc::clone(&version),
                ttl.provider_secs,
            ),
            anime: AnimeListClient::new(
                client,
                enrichment.anilist_api_url.clone(),
                enrichment.provider_timeout_secs,
                tier,
                version,
                ttl.provider_secs,
            ),
        }
    }
}
