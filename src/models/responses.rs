//! Response DTOs for the cache server API
//!
//! Shared by the server handlers and the HTTP store client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::StoreStats;

/// Response body for GET /get/:key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetResponse {
    pub key: String,
    pub value: Value,
    /// When the value was produced
    pub timestamp: DateTime<Utc>,
    /// Seconds until the server may evict the entry
    #[serde(default)]
    pub ttl_remaining: Option<u64>,
}

/// Response body for PUT /set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetResponse {
    pub message: String,
    pub key: String,
}

impl SetResponse {
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' set successfully", key),
            key,
        }
    }
}

/// Response body for DELETE /del/:key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub message: String,
    pub key: String,
}

impl DeleteResponse {
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' deleted successfully", key),
            key,
        }
    }
}

/// Response body for DELETE /keys/:pattern
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternDeleteResponse {
    pub pattern: String,
    pub deleted: usize,
}

/// Response body for DELETE /flush
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlushResponse {
    pub message: String,
}

/// Response body for GET /stats
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub total_entries: usize,
    /// hits / (hits + misses)
    pub hit_rate: f64,
}

impl From<StoreStats> for StatsResponse {
    fn from(stats: StoreStats) -> Self {
        Self {
            hit_rate: stats.hit_rate(),
            hits: stats.hits,
            misses: stats.misses,
            evictions: stats.evictions,
            expirations: stats.expirations,
            total_entries: stats.total_entries,
        }
    }
}

/// Response body for GET /health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    /// RFC 3339 timestamp
    pub timestamp: String,
}

impl HealthResponse {
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_response_roundtrip() {
        let resp = GetResponse {
            key: "class:activities:7".to_string(),
            value: json!([{"id": 1}]),
            timestamp: Utc::now(),
            ttl_remaining: Some(299),
        };
        let json = serde_json::to_string(&resp).unwrap();
        let back: GetResponse = serde_json::from_str(&json).unwrap();

        assert_eq!(back.key, resp.key);
        assert_eq!(back.value, resp.value);
        assert_eq!(back.timestamp, resp.timestamp);
    }

    #[test]
    fn test_set_and_delete_messages() {
        assert!(SetResponse::new("my_key").message.contains("my_key"));
        assert!(DeleteResponse::new("gone").message.contains("deleted"));
    }

    #[test]
    fn test_stats_response_from_store_stats() {
        let stats = StoreStats {
            hits: 80,
            misses: 20,
            evictions: 5,
            expirations: 2,
            total_entries: 100,
        };
        let resp = StatsResponse::from(stats);
        assert!((resp.hit_rate - 0.8).abs() < 0.001);
        assert_eq!(resp.expirations, 2);
    }

    #[test]
    fn test_health_response_serialize() {
        let json = serde_json::to_string(&HealthResponse::healthy()).unwrap();
        assert!(json.contains("healthy"));
        assert!(json.contains("timestamp"));
    }
}
