//! Keyed Store Module
//!
//! The key-value contract the cache controller reads from and writes to, and
//! its two implementations: an in-memory TTL/LRU store and an HTTP client for
//! a remote cache server that falls back to a local copy.

mod entry;
mod lru;
mod memory;
mod remote;
mod stats;


use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;

use crate::error::{CacheError, Result};

// Re-export public types
pub use entry::{current_timestamp_ms, MemoryEntry, StoredEntry};
pub use lru::LruTracker;
pub use memory::{MemoryCache, MemoryStore};
pub use remote::{ConnectionMetrics, ConnectionState, HttpStore, MAX_RECONNECT_ATTEMPTS};
pub use stats::StoreStats;

// == Public Constants ==
/// Maximum allowed key length in bytes
pub const MAX_KEY_LENGTH: usize = 256;

/// Maximum allowed serialized value size in bytes
pub const MAX_VALUE_SIZE: usize = 1024 * 1024; // 1 MB

// == Keyed Store Contract ==
/// A shared key-value store with per-key TTL.
///
/// Implementations may evict any entry once its TTL has elapsed, so callers
/// must tolerate a miss even right after a `set`.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Returns the live entry for `key`, or `None` on a miss.
    async fn get(&self, key: &str) -> Result<Option<StoredEntry>>;

    /// Stores `entry` under `key` for `ttl_secs` seconds.
    async fn set(&self, key: &str, entry: StoredEntry, ttl_secs: u64) -> Result<()>;

    /// Removes `key`. Returns whether an entry was present.
    async fn del(&self, key: &str) -> Result<bool>;

    /// Removes every key matching a `*` glob. Returns the number removed.
    async fn delete_pattern(&self, pattern: &str) -> Result<usize>;

    /// Removes everything.
    async fn clear(&self) -> Result<()>;

    async fn health_check(&self) -> StoreHealth;
}

// == Health ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Result of a store health probe.
#[derive(Debug, Clone, Serialize)]
pub struct StoreHealth {
    pub status: HealthStatus,
    pub message: String,
    /// Which backend answered ("memory", "remote", "remote-fallback")
    pub mode: &'static str,
    pub timestamp: DateTime<Utc>,
}

impl StoreHealth {
    pub fn healthy(mode: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Healthy,
            message: message.into(),
            mode,
            timestamp: Utc::now(),
        }
    }

    pub fn unhealthy(mode: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            message: message.into(),
            mode,
            timestamp: Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

// == Key Helpers ==
/// Rejects empty or oversized keys.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(CacheError::InvalidRequest("Key cannot be empty".to_string()));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(CacheError::InvalidRequest(format!(
            "Key exceeds maximum length of {} bytes",
            MAX_KEY_LENGTH
        )));
    }
    Ok(())
}

/// Compiles a `*` glob into an anchored regex.
pub fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let escaped = regex::escape(pattern).replace(r"\*", ".*");
    Regex::new(&format!("^{}$", escaped))
        .map_err(|e| CacheError::InvalidRequest(format!("Invalid key pattern: {}", e)))
}
