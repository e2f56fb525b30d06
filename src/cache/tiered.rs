//! Two-tier cache
//!
//! Reads try the external store first and fall back to the local map when
//! the store misses, errors, or is not configured. External hits are
//! back-filled locally for no longer than they have left in the store.
//! Writes always land locally; the external write is best effort.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::keys::{stale_key, STALE_PREFIX};
use super::store::{compute_etag, CacheEntry, CacheStats, LocalCache};
use super::{CacheConfig, ExternalStore};

/// Local back-fill lifetime when the store cannot report what is left
const UNKNOWN_REMAINING_TTL: Duration = Duration::from_secs(5);

/// Where a cached value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
    Local,
    External,
}

/// Cached JSON payload with its ETag
#[derive(Debug, Clone)]
pub struct CachedValue {
    pub data: String,
    pub etag: String,
    pub source: CacheSource,
}

impl From<CacheEntry> for CachedValue {
    fn from(entry: CacheEntry) -> Self {
        Self {
            data: entry.data,
            etag: entry.etag,
            source: CacheSource::Local,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TieredCacheStats {
    pub local: CacheStats,
    pub local_hit_rate: f64,
    /// Name of the external store, if configured
    pub external: Option<&'static str>,
    pub external_hits: u64,
    pub external_errors: u64,
    pub stale_served: u64,
}

pub struct TieredCache {
    local: LocalCache,
    external: Option<Arc<dyn ExternalStore>>,
    config: CacheConfig,
    external_hits: AtomicU64,
    external_errors: AtomicU64,
    stale_served: AtomicU64,
}

impl TieredCache {
    pub fn new(config: CacheConfig, external: Option<Arc<dyn ExternalStore>>) -> Self {
        if let Some(ref store) = external {
            info!(store = store.name(), "External cache tier enabled");
        }
        Self {
            local: LocalCache::new(&config),
            external,
            config,
            external_hits: AtomicU64::new(0),
            external_errors: AtomicU64::new(0),
            stale_served: AtomicU64::new(0),
        }
    }

    /// Local-only cache
    pub fn local_only(config: CacheConfig) -> Self {
        Self::new(config, None)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// TTL applied when back-filling a key from the external tier
    fn backfill_ttl(&self, key: &str, remaining: Option<Duration>) -> Duration {
        let configured = if key.starts_with(STALE_PREFIX) {
            self.config.stale_ttl
        } else {
            self.config.list_ttl
        };
        configured.min(remaining.unwrap_or(UNKNOWN_REMAINING_TTL))
    }

    fn external_failed(&self, op: &str, key: &str, err: impl std::fmt::Display) {
        self.external_errors.fetch_add(1, Ordering::Relaxed);
        warn!(op, key, error = %err, "External cache failed, using local tier");
    }

    pub async fn get(&self, key: &str) -> Option<CachedValue> {
        if let Some(ref store) = self.external {
            match store.get(key).await {
                Ok(Some(data)) => {
                    self.external_hits.fetch_add(1, Ordering::Relaxed);
                    debug!(key, "External cache hit");
                    let remaining = store.ttl(key).await.unwrap_or_else(|e| {
                        self.external_failed("ttl", key, e);
                        None
                    });
                    let entry = self.local.set(key, data, self.backfill_ttl(key, remaining));
                    let mut value = CachedValue::from(entry);
                    value.source = CacheSource::External;
                    return Some(value);
                }
                Ok(None) => {}
                Err(e) => self.external_failed("get", key, e),
            }
        }

        self.local.get(key).map(CachedValue::from)
    }

    /// Store a value; returns its ETag
    pub async fn set(&self, key: &str, data: String, ttl: Duration) -> String {
        let etag = compute_etag(&data);
        if let Some(ref store) = self.external {
            if let Err(e) = store.set(key, &data, ttl).await {
                self.external_failed("set", key, e);
            }
        }
        self.local.set(key, data, ttl);
        etag
    }

    pub async fn delete(&self, key: &str) {
        self.local.remove(key);
        if let Some(ref store) = self.external {
            if let Err(e) = store.delete(key).await {
                self.external_failed("delete", key, e);
            }
        }
    }

    /// Invalidate all live entries under `prefix` in both tiers.
    /// Stale snapshots are kept.
    pub async fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut count = self.local.invalidate_prefix(prefix);
        if let Some(ref store) = self.external {
            match store.delete_prefix(prefix).await {
                Ok(n) => count = count.max(n as usize),
                Err(e) => self.external_failed("delete_prefix", prefix, e),
            }
        }
        count
    }

    /// Drop everything, snapshots included
    pub async fn clear(&self) {
        self.local.clear();
        if let Some(ref store) = self.external {
            if let Err(e) = store.delete_prefix("").await {
                self.external_failed("clear", "*", e);
            }
        }
    }

    /// Store a listing along with its long-lived stale snapshot
    pub async fn set_with_snapshot(&self, key: &str, data: String) -> String {
        let etag = self
            .set(&stale_key(key), data.clone(), self.config.stale_ttl)
            .await;
        self.set(key, data, self.config.list_ttl).await;
        etag
    }

    /// Stale snapshot of a listing, used when the database read fails
    pub async fn stale(&self, key: &str) -> Option<CachedValue> {
        let value = self.get(&stale_key(key)).await?;
        self.stale_served.fetch_add(1, Ordering::Relaxed);
        Some(value)
    }

    /// Remove expired local entries
    pub fn cleanup(&self) -> usize {
        self.local.cleanup()
    }

    pub fn stats(&self) -> TieredCacheStats {
        let local = self.local.stats();
        TieredCacheStats {
            local_hit_rate: local.hit_rate(),
            local,
            external: self.external.as_ref().map(|s| s.name()),
            external_hits: self.external_hits.load(Ordering::Relaxed),
            external_errors: self.external_errors.load(Ordering::Relaxed),
            stale_served: self.stale_served.load(Ordering::Relaxed),
        }
    }
}

/// Spawn a background task to periodically clean up expired local entries
pub fn spawn_cleanup_task(cache: Arc<TieredCache>) {
    let interval = cache.config.cleanup_interval;

    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            let removed = cache.cleanup();
            let stats = cache.stats();
            debug!(
                removed,
                entries = stats.local.entries,
                hit_rate = format!("{:.1}%", stats.local_hit_rate),
                "Cache cleanup completed"
            );
        }
    });

    info!("Cache cleanup task started");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AppError, Result};
    use async_trait::async_trait;
    use dashmap::DashMap;

    /// External store that always fails
    struct DownStore;

    #[async_trait]
    impl ExternalStore for DownStore {
        fn name(&self) -> &'static str {
            "down"
        }
        async fn get(&self, _key: &str) -> Result<Option<String>> {
            Err(AppError::Internal("connection refused".into()))
        }
        async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<()> {
            Err(AppError::Internal("connection refused".into()))
        }
        async fn delete(&self, _key: &str) -> Result<()> {
            Err(AppError::Internal("connection refused".into()))
        }
        async fn delete_prefix(&self, _prefix: &str) -> Result<u64> {
            Err(AppError::Internal("connection refused".into()))
        }
    }

    /// External store backed by a map
    #[derive(Default)]
    struct MapStore(DashMap<String, String>, Option<Duration>);

    #[async_trait]
    impl ExternalStore for MapStore {
        fn name(&self) -> &'static str {
            "map"
        }
        async fn get(&self, key: &str) -> Result<Option<String>> {
            Ok(self.0.get(key).map(|v| v.clone()))
        }
        async fn ttl(&self, _key: &str) -> Result<Option<Duration>> {
            Ok(self.1)
        }
        async fn set(&self, key: &str, value: &str, _ttl: Duration) -> Result<()> {
            self.0.insert(key.to_string(), value.to_string());
            Ok(())
        }
        async fn delete(&self, key: &str) -> Result<()> {
            self.0.remove(key);
            Ok(())
        }
        async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
            let before = self.0.len();
            self.0.retain(|k, _| !k.starts_with(prefix));
            Ok((before - self.0.len()) as u64)
        }
    }

    #[tokio::test]
    async fn test_falls_back_to_local_when_external_fails() {
        let cache = TieredCache::new(CacheConfig::default(), Some(Arc::new(DownStore)));

        cache
            .set("courses:list", "[1]".into(), Duration::from_secs(60))
            .await;
        let value = cache.get("courses:list").await.expect("local fallback");

        assert_eq!(value.data, "[1]");
        assert_eq!(value.source, CacheSource::Local);
        assert!(cache.stats().external_errors >= 2);
    }

    #[tokio::test]
    async fn test_external_hit_backfills_local() {
        let external = Arc::new(MapStore::default());
        external.0.insert("results:list".into(), "[2]".into());
        let cache = TieredCache::new(CacheConfig::default(), Some(external.clone()));

        let value = cache.get("results:list").await.unwrap();
        assert_eq!(value.source, CacheSource::External);

        // Gone from the shared store, still served locally
        external.0.clear();
        let value = cache.get("results:list").await.unwrap();
        assert_eq!(value.data, "[2]");
        assert_eq!(value.source, CacheSource::Local);
    }

    #[tokio::test]
    async fn test_backfill_does_not_outlive_external_entry() {
        let external = Arc::new(MapStore(DashMap::new(), Some(Duration::from_secs(3))));
        external.0.insert("courses:list".into(), "[4]".into());
        let cache = TieredCache::new(CacheConfig::default(), Some(external));

        cache.get("courses:list").await.unwrap();
        let local = cache.local.get("courses:list").unwrap();
        assert!(local.remaining_ttl_secs() <= 3);
    }

    #[test]
    fn test_backfill_ttl_bounds() {
        let cache = TieredCache::local_only(CacheConfig::default());
        let list_ttl = cache.config().list_ttl;

        assert_eq!(cache.backfill_ttl("courses:list", Some(Duration::from_secs(2))), Duration::from_secs(2));
        assert_eq!(cache.backfill_ttl("courses:list", Some(list_ttl * 10)), list_ttl);
        assert_eq!(
            cache.backfill_ttl("courses:list", None),
            list_ttl.min(UNKNOWN_REMAINING_TTL)
        );
    }

    #[tokio::test]
    async fn test_invalidate_prefix_keeps_snapshots() {
        let external = Arc::new(MapStore::default());
        let cache = TieredCache::new(CacheConfig::default(), Some(external.clone()));

        cache.set_with_snapshot("courses:list", "[3]".into()).await;
        cache.invalidate_prefix("courses:").await;

        assert!(cache.get("courses:list").await.is_none());
        let stale = cache.stale("courses:list").await.unwrap();
        assert_eq!(stale.data, "[3]");
        assert_eq!(cache.stats().stale_served, 1);
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let cache = TieredCache::local_only(CacheConfig::default());
        cache.set("a", "1".into(), Duration::from_secs(60)).await;
        cache.set_with_snapshot("b", "2".into()).await;

        cache.delete("a").await;
        assert!(cache.get("a").await.is_none());

        cache.clear().await;
        assert!(cache.get("b").await.is_none());
        assert!(cache.stale("b").await.is_none());
        assert!(cache.stats().external.is_none());
    }

    #[tokio::test]
    async fn test_set_returns_etag_matching_get() {
        let cache = TieredCache::local_only(CacheConfig::default());
        let etag = cache.set("k", "{}".into(), Duration::from_secs(60)).await;
        assert_eq!(cache.get("k").await.unwrap().etag, etag);
    }
}
