//! Caching layer for roadwise
//!
//! Public listings (courses, instructors, testimonials, results) are cached
//! as serialized JSON in two tiers:
//!
//! - [`store::LocalCache`]: process-local map with TTL, ETags and eviction
//! - [`external::ExternalStore`]: optional shared store (Redis REST API)
//!
//! [`tiered::TieredCache`] ties them together. Every listing also keeps a
//! long-lived stale snapshot that is served when the database read fails.

pub mod external;
pub mod keys;
pub mod store;
pub mod tiered;

pub use external::{ExternalStore, RestKvStore};
pub use keys::{listing_key, page_key, stale_key, STALE_PREFIX};
pub use store::{CacheEntry, CacheStats, LocalCache};
pub use tiered::{spawn_cleanup_task, CacheSource, CachedValue, TieredCache, TieredCacheStats};

use std::time::Duration;

use crate::config::CacheArgs;

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries in the local cache
    pub max_entries: usize,
    /// TTL for public listings
    pub list_ttl: Duration,
    /// TTL for stale fallback snapshots
    pub stale_ttl: Duration,
    /// Cleanup interval
    pub cleanup_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 5_000,
            list_ttl: Duration::from_secs(300),     // 5 minutes
            stale_ttl: Duration::from_secs(86_400), // 1 day
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

impl CacheConfig {
    /// Build from CLI/env arguments
    pub fn from_args(args: &CacheArgs) -> Self {
        Self {
            max_entries: args.cache_max_entries,
            list_ttl: Duration::from_secs(args.cache_list_ttl_secs),
            stale_ttl: Duration::from_secs(args.cache_stale_ttl_secs),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.max_entries, 5_000);
        assert_eq!(config.list_ttl, Duration::from_secs(300));
        assert_eq!(config.stale_ttl, Duration::from_secs(86_400));
    }

    #[test]
    fn test_from_args() {
        let args = crate::config::test_args();
        let config = CacheConfig::from_args(&args.cache);
        assert_eq!(config.list_ttl, Duration::from_secs(args.cache.cache_list_ttl_secs));
        assert_eq!(config.cleanup_interval, Duration::from_secs(60));
    }
}
