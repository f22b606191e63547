//! Store Entry Module
//!
//! The timestamped payload exchanged with keyed stores, and the in-memory
//! wrapper that adds an expiry deadline.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// == Stored Entry ==
/// A cached value and the time it was produced.
///
/// This is what every `KeyValueStore` reads and writes; the controller derives
/// the entry's age from `timestamp`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntry {
    /// JSON payload, opaque to the store
    pub value: Value,
    /// Creation or refresh time
    pub timestamp: DateTime<Utc>,
}

impl StoredEntry {
    /// Wraps a value stamped with the current time.
    pub fn new(value: Value) -> Self {
        Self::at(value, Utc::now())
    }

    pub fn at(value: Value, timestamp: DateTime<Utc>) -> Self {
        Self { value, timestamp }
    }

    /// Age of the entry at `now`. Timestamps from the future count as zero.
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        (now - self.timestamp).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn age(&self) -> Duration {
        self.age_at(Utc::now())
    }
}

// == Memory Entry ==
/// A stored entry held by the in-memory store, with its expiry deadline.
#[derive(Debug, Clone)]
pub struct MemoryEntry {
    pub entry: StoredEntry,
    /// Insertion time (Unix milliseconds)
    pub created_at: u64,
    /// Expiration timestamp (Unix milliseconds), None = no expiration
    pub expires_at: Option<u64>,
}

impl MemoryEntry {
    pub fn new(entry: StoredEntry, ttl_seconds: Option<u64>) -> Self {
        let now = current_timestamp_ms();
        Self {
            entry,
            created_at: now,
            expires_at: ttl_seconds.map(|ttl| now + ttl * 1000),
        }
    }

    /// Expired once the current time reaches the deadline.
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|expires| current_timestamp_ms() >= expires)
    }

    /// Remaining TTL in milliseconds; `Some(0)` once expired, `None` without TTL.
    pub fn ttl_remaining_ms(&self) -> Option<u64> {
        self.expires_at
            .map(|expires| expires.saturating_sub(current_timestamp_ms()))
    }

    pub fn ttl_remaining(&self) -> Option<u64> {
        self.ttl_remaining_ms().map(|ms| ms / 1000)
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
