mod error;
mod hot_keys;
mod keys;
mod memory;
#[cfg(feature = "redis")]
mod redis;
mod single_flight;
mod tier;
mod traits;

pub use error::{CacheError, CacheResult};
pub use hot_keys::{DEFAULT_LIMIT, DEFAULT_WINDOW_MINUTES, HotKey, HotKeyTracker};
pub use keys::{
    CacheKeys, CacheVersion, CatalogExtra, canonical_json, catalog_ttl, config_hash, url_hash,
};
pub use memory::MemoryCache;
#[cfg(feature = "redis")]
pub use redis::RedisCache;
pub use single_flight::{FlightOutcome, SingleFlight};
pub use tier::{CacheStatsSnapshot, CacheTier};
pub use traits::Cache;
