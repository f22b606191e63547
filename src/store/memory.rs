//! In-Memory Store Module
//!
//! HashMap storage with LRU tracking and TTL expiration, plus an async,
//! shareable wrapper implementing [`KeyValueStore`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use tokio::sync::RwLock;

use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::store::{
    glob_to_regex, validate_key, KeyValueStore, LruTracker, MemoryEntry, StoreHealth, StoreStats,
    StoredEntry, MAX_VALUE_SIZE,
};

// == Memory Cache ==
/// Synchronous cache engine with LRU eviction and TTL support.
#[derive(Debug)]
pub struct MemoryCache {
    entries: HashMap<String, MemoryEntry>,
    lru: LruTracker,
    stats: StoreStats,
    /// Maximum number of entries allowed
    max_entries: usize,
    /// TTL in seconds for entries stored without one
    default_ttl: u64,
}

impl MemoryCache {
    pub fn new(max_entries: usize, default_ttl: u64) -> Self {
        Self {
            entries: HashMap::new(),
            lru: LruTracker::new(),
            stats: StoreStats::new(),
            max_entries,
            default_ttl,
        }
    }

    // == Set ==
    /// Stores an entry, overwriting any previous one and resetting its TTL.
    ///
    /// At capacity, the least recently used entry is evicted first.
    pub fn set(&mut self, key: String, entry: StoredEntry, ttl: Option<u64>) -> Result<()> {
        validate_key(&key)?;

        let size = entry.value.to_string().len();
        if size > MAX_VALUE_SIZE {
            return Err(CacheError::InvalidRequest(format!(
                "Value exceeds maximum size of {} bytes",
                MAX_VALUE_SIZE
            )));
        }

        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_entries {
            match self.lru.evict_oldest() {
                Some(evicted) => {
                    self.entries.remove(&evicted);
                    self.stats.record_eviction();
                }
                None => {
                    return Err(CacheError::CacheFull(
                        "Cache is full and eviction failed".to_string(),
                    ))
                }
            }
        }

        let ttl = ttl.unwrap_or(self.default_ttl);
        self.entries
            .insert(key.clone(), MemoryEntry::new(entry, Some(ttl)));
        self.lru.touch(&key);
        self.stats.set_total_entries(self.entries.len());

        Ok(())
    }

    // == Get ==
    /// Returns the live entry for `key`.
    ///
    /// Expired entries are removed on access and reported as `Expired`.
    pub fn get(&mut self, key: &str) -> Result<MemoryEntry> {
        let expired = match self.entries.get(key) {
            None => {
                self.stats.record_miss();
                return Err(CacheError::NotFound(key.to_string()));
            }
            Some(entry) => entry.is_expired(),
        };

        if expired {
            self.remove_entry(key);
            self.stats.record_expirations(1);
            self.stats.record_miss();
            return Err(CacheError::Expired(key.to_string()));
        }

        self.stats.record_hit();
        self.lru.touch(key);
        self.entries
            .get(key)
            .cloned()
            .ok_or_else(|| CacheError::Internal(format!("entry vanished: {}", key)))
    }

    // == Delete ==
    pub fn delete(&mut self, key: &str) -> Result<()> {
        if self.remove_entry(key) {
            Ok(())
        } else {
            Err(CacheError::NotFound(key.to_string()))
        }
    }

    /// Removes every key matched by `pattern`. Returns the number removed.
    pub fn delete_matching(&mut self, pattern: &Regex) -> usize {
        let matched: Vec<String> = self
            .entries
            .keys()
            .filter(|key| pattern.is_match(key))
            .cloned()
            .collect();

        for key in &matched {
            self.remove_entry(key);
        }
        matched.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.lru.clear();
        self.stats.set_total_entries(0);
    }

    pub fn stats(&self) -> StoreStats {
        let mut stats = self.stats.clone();
        stats.set_total_entries(self.entries.len());
        stats
    }

    // == Cleanup Expired ==
    /// Removes all expired entries. Returns the number removed.
    pub fn cleanup_expired(&mut self) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.remove_entry(key);
        }
        self.stats.record_expirations(expired.len());
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn remove_entry(&mut self, key: &str) -> bool {
        let removed = self.entries.remove(key).is_some();
        self.lru.remove(key);
        self.stats.set_total_entries(self.entries.len());
        removed
    }
}

// == Memory Store ==
/// Cloneable async handle over a shared [`MemoryCache`].
#[derive(Debug, Clone)]
pub struct MemoryStore {
    cache: Arc<RwLock<MemoryCache>>,
}

impl MemoryStore {
    pub fn new(max_entries: usize, default_ttl: u64) -> Self {
        Self {
            cache: Arc::new(RwLock::new(MemoryCache::new(max_entries, default_ttl))),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.max_entries, config.default_ttl)
    }

    /// The shared engine, for the server handlers and the cleanup task.
    pub fn shared(&self) -> Arc<RwLock<MemoryCache>> {
        Arc::clone(&self.cache)
    }

    pub async fn stats(&self) -> StoreStats {
        self.cache.read().await.stats()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<StoredEntry>> {
        // Write lock: a read touches LRU order and stats.
        let mut cache = self.cache.write().await;
        match cache.get(key) {
            Ok(found) => Ok(Some(found.entry)),
            Err(CacheError::NotFound(_)) | Err(CacheError::Expired(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn set(&self, key: &str, entry: StoredEntry, ttl_secs: u64) -> Result<()> {
        self.cache
            .write()
            .await
            .set(key.to_string(), entry, Some(ttl_secs))
    }

    async fn del(&self, key: &str) -> Result<bool> {
        match self.cache.write().await.delete(key) {
            Ok(()) => Ok(true),
            Err(CacheError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<usize> {
        let re = glob_to_regex(pattern)?;
        Ok(self.cache.write().await.delete_matching(&re))
    }

    async fn clear(&self) -> Result<()> {
        self.cache.write().await.clear();
        Ok(())
    }

    async fn health_check(&self) -> StoreHealth {
        let entries = self.cache.read().await.len();
        StoreHealth::healthy("memory", format!("In-memory store with {} entries", entries))
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MAX_KEY_LENGTH;
    use serde_json::json;
    use std::thread::sleep;
    use std::time::Duration;

    fn entry(value: &str) -> StoredEntry {
        StoredEntry::new(json!(value))
    }

    #[test]
    fn test_cache_set_and_get() {
        let mut cache = MemoryCache::new(100, 300);

        cache.set("key1".to_string(), entry("value1"), None).unwrap();
        let found = cache.get("key1").unwrap();

        assert_eq!(found.entry.value, json!("value1"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_default_ttl_applied() {
        let mut cache = MemoryCache::new(100, 300);
        cache.set("k".to_string(), entry("v"), None).unwrap();

        let remaining = cache.get("k").unwrap().ttl_remaining().unwrap();
        assert!(remaining <= 300 && remaining >= 299);
    }

    #[test]
    fn test_cache_get_nonexistent() {
        let mut cache = MemoryCache::new(100, 300);
        assert!(matches!(cache.get("nope"), Err(CacheError::NotFound(_))));
    }

    #[test]
    fn test_cache_delete() {
        let mut cache = MemoryCache::new(100, 300);
        cache.set("key1".to_string(), entry("value1"), None).unwrap();
        cache.delete("key1").unwrap();

        assert!(cache.is_empty());
        assert!(matches!(cache.delete("key1"), Err(CacheError::NotFound(_))));
    }

    #[test]
    fn test_cache_overwrite() {
        let mut cache = MemoryCache::new(100, 300);
        cache.set("key1".to_string(), entry("value1"), None).unwrap();
        cache.set("key1".to_string(), entry("value2"), None).unwrap();

        assert_eq!(cache.get("key1").unwrap().entry.value, json!("value2"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_ttl_expiration() {
        let mut cache = MemoryCache::new(100, 300);
        cache.set("key1".to_string(), entry("value1"), Some(1)).unwrap();
        assert!(cache.get("key1").is_ok());

        sleep(Duration::from_millis(1100));

        assert!(matches!(cache.get("key1"), Err(CacheError::Expired(_))));
        assert_eq!(cache.stats().expirations, 1);
    }

    #[test]
    fn test_cache_lru_eviction_respects_access() {
        let mut cache = MemoryCache::new(3, 300);
        cache.set("key1".to_string(), entry("1"), None).unwrap();
        cache.set("key2".to_string(), entry("2"), None).unwrap();
        cache.set("key3".to_string(), entry("3"), None).unwrap();

        cache.get("key1").unwrap();
        cache.set("key4".to_string(), entry("4"), None).unwrap();

        assert_eq!(cache.len(), 3);
        assert!(cache.get("key1").is_ok());
        assert!(matches!(cache.get("key2"), Err(CacheError::NotFound(_))));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_cache_delete_matching() {
        let mut cache = MemoryCache::new(100, 300);
        cache.set("user:classes:1:student".to_string(), entry("a"), None).unwrap();
        cache.set("user:classes:2:teacher".to_string(), entry("b"), None).unwrap();
        cache.set("class:activities:9".to_string(), entry("c"), None).unwrap();

        let removed = cache.delete_matching(&glob_to_regex("user:classes:*").unwrap());

        assert_eq!(removed, 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("class:activities:9").is_ok());
    }

    #[test]
    fn test_cache_cleanup_expired() {
        let mut cache = MemoryCache::new(100, 300);
        cache.set("short".to_string(), entry("v"), Some(1)).unwrap();
        cache.set("long".to_string(), entry("v"), Some(10)).unwrap();

        sleep(Duration::from_millis(1100));

        assert_eq!(cache.cleanup_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("long").is_ok());
    }

    #[test]
    fn test_cache_rejects_bad_input() {
        let mut cache = MemoryCache::new(100, 300);

        let long_key = "x".repeat(MAX_KEY_LENGTH + 1);
        assert!(matches!(
            cache.set(long_key, entry("v"), None),
            Err(CacheError::InvalidRequest(_))
        ));

        let large = "x".repeat(MAX_VALUE_SIZE + 1);
        assert!(matches!(
            cache.set("key".to_string(), entry(&large), None),
            Err(CacheError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_store_miss_is_none() {
        let store = MemoryStore::new(10, 300);
        assert!(store.get("missing").await.unwrap().is_none());
        assert!(!store.del("missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_store_roundtrip_keeps_timestamp() {
        let store = MemoryStore::new(10, 300);
        let stored = entry("v");

        store.set("k", stored.clone(), 60).await.unwrap();
        let found = store.get("k").await.unwrap().unwrap();

        assert_eq!(found, stored);
        assert!(store.del("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_store_pattern_clear_and_health() {
        let store = MemoryStore::new(10, 300);
        store.set("a:1", entry("x"), 60).await.unwrap();
        store.set("a:2", entry("y"), 60).await.unwrap();
        store.set("b:1", entry("z"), 60).await.unwrap();

        assert_eq!(store.delete_pattern("a:*").await.unwrap(), 2);
        assert!(store.health_check().await.is_healthy());

        store.clear().await.unwrap();
        assert_eq!(store.stats().await.total_entries, 0);
    }
}
