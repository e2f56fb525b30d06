//! Process-local cache store
//!
//! DashMap of JSON payloads with TTL, ETag generation, prefix invalidation
//! and oldest-first eviction when over capacity.

use super::CacheConfig;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// A cached entry with metadata
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Serialized JSON body
    pub data: String,
    /// ETag for HTTP caching (SHA256 of data)
    pub etag: String,
    /// When this entry was created
    pub created_at: Instant,
    /// When this entry expires
    pub expires_at: Instant,
}

impl CacheEntry {
    pub fn new(data: String, ttl: Duration) -> Self {
        let etag = compute_etag(&data);
        let now = Instant::now();
        Self {
            data,
            etag,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// Remaining TTL in seconds
    pub fn remaining_ttl_secs(&self) -> u64 {
        self.expires_at
            .saturating_duration_since(Instant::now())
            .as_secs()
    }
}

/// Quoted ETag from the first 16 bytes of the SHA256 of `data`
pub fn compute_etag(data: &str) -> String {
    let hash = Sha256::digest(data.as_bytes());
    format!("\"{}\"", hex::encode(&hash[..16]))
}

/// Cache statistics
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheStats {
    /// Hit rate as percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// In-memory cache tier
pub struct LocalCache {
    entries: DashMap<String, CacheEntry>,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl LocalCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: config.max_entries,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Get a live entry
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired() {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key, "Local cache hit");
                return Some(entry.clone());
            }
            drop(entry); // Release the shard lock before removing
            self.entries.remove(key);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(key, "Local cache miss");
        None
    }

    /// Store an entry with explicit TTL
    pub fn set(&self, key: &str, data: String, ttl: Duration) -> CacheEntry {
        let entry = CacheEntry::new(data, ttl);
        debug!(key, ttl_secs = ttl.as_secs(), "Local cache set");
        self.entries.insert(key.to_string(), entry.clone());
        self.maybe_evict();
        entry
    }

    pub fn remove(&self, key: &str) -> Option<CacheEntry> {
        self.entries.remove(key).map(|(_, entry)| entry)
    }

    /// Invalidate entries whose key starts with `prefix`
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(prefix));
        let count = before.saturating_sub(self.entries.len());

        if count > 0 {
            debug!(prefix, count, "Invalidated local cache entries");
        }
        count
    }

    pub fn clear(&self) {
        self.entries.clear();
        info!("Local cache cleared");
    }

    /// Remove expired entries
    pub fn cleanup(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired());
        let count = before.saturating_sub(self.entries.len());

        if count > 0 {
            debug!(count, "Cleaned up expired cache entries");
        }
        count
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Evict oldest entries when over capacity
    fn maybe_evict(&self) {
        if self.entries.len() <= self.max_entries {
            return;
        }

        // Evict a little extra to avoid thrashing at the boundary
        let slack = (self.max_entries / 10).max(1);
        let to_evict = self.entries.len() - self.max_entries + slack;

        let mut by_age: Vec<(String, Instant)> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.created_at))
            .collect();
        by_age.sort_by_key(|(_, created)| *created);

        for (key, _) in by_age.into_iter().take(to_evict) {
            self.entries.remove(&key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }

        debug!(evicted = to_evict, "Evicted local cache entries");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache_with(max_entries: usize) -> LocalCache {
        LocalCache::new(&CacheConfig {
            max_entries,
            ..CacheConfig::default()
        })
    }

    #[test]
    fn test_etag_is_stable() {
        let a = CacheEntry::new("[1,2]".into(), Duration::from_secs(60));
        let b = CacheEntry::new("[1,2]".into(), Duration::from_secs(60));
        let c = CacheEntry::new("[1,3]".into(), Duration::from_secs(60));
        assert_eq!(a.etag, b.etag);
        assert_ne!(a.etag, c.etag);
        assert!(a.etag.starts_with('"') && a.etag.ends_with('"'));
    }

    #[test]
    fn test_get_set_and_stats() {
        let cache = cache_with(100);
        assert!(cache.get("courses:list").is_none());

        cache.set("courses:list", "[]".into(), Duration::from_secs(300));
        let entry = cache.get("courses:list").expect("should have entry");
        assert_eq!(entry.data, "[]");

        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate(), 50.0);
    }

    #[test]
    fn test_expiry() {
        let cache = cache_with(100);
        cache.set("k", "v".into(), Duration::from_millis(10));
        assert!(cache.get("k").is_some());

        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.get("k").is_none());
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn test_invalidate_prefix() {
        let cache = cache_with(100);
        let ttl = Duration::from_secs(300);
        cache.set("courses:list", "a".into(), ttl);
        cache.set("courses:item:two-wheeler", "b".into(), ttl);
        cache.set("results:list", "c".into(), ttl);

        assert_eq!(cache.invalidate_prefix("courses:"), 2);
        assert_eq!(cache.stats().entries, 1);
        assert!(cache.get("results:list").is_some());
    }

    #[test]
    fn test_cleanup_removes_expired_only() {
        let cache = cache_with(100);
        cache.set("short", "a".into(), Duration::from_millis(5));
        cache.set("long", "b".into(), Duration::from_secs(300));
        std::thread::sleep(Duration::from_millis(15));

        assert_eq!(cache.cleanup(), 1);
        assert!(cache.get("long").is_some());
    }

    #[test]
    fn test_eviction_drops_oldest() {
        let cache = cache_with(10);
        let ttl = Duration::from_secs(300);
        for i in 0..11 {
            cache.set(&format!("k{i}"), i.to_string(), ttl);
            std::thread::sleep(Duration::from_millis(1));
        }

        let stats = cache.stats();
        assert!(stats.entries <= 10);
        assert!(stats.evictions >= 1);
        assert!(cache.get("k0").is_none());
        assert!(cache.get("k10").is_some());
    }
}
