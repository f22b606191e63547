//! Configuration Module
//!
//! Handles loading cache server and controller defaults from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Server and controller configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum number of entries the in-memory store can hold
    pub max_entries: usize,
    /// Default TTL in seconds for entries and subscriptions
    pub default_ttl: u64,
    /// HTTP server port
    pub server_port: u16,
    /// Background cleanup task interval in seconds
    pub cleanup_interval: u64,
    /// Age in milliseconds after which a cached value is served as stale
    pub stale_time_ms: u64,
    /// Retries after the first failed attempt before the error is surfaced
    pub max_retries: u32,
    /// First retry delay in milliseconds; doubled on every further attempt
    pub retry_base_delay_ms: u64,
    /// Upper bound for a single retry delay in milliseconds
    pub retry_max_delay_ms: u64,
    /// Base URL of a remote cache server, if any
    pub remote_cache_url: Option<String>,
    /// Remote store heartbeat interval in seconds
    pub heartbeat_interval: u64,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `MAX_ENTRIES` - Maximum cache entries (default: 1000)
    /// - `DEFAULT_TTL` - Default TTL in seconds (default: 300)
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `CLEANUP_INTERVAL` - Cleanup frequency in seconds (default: 1)
    /// - `STALE_TIME_MS` - Stale threshold in milliseconds (default: 60000)
    /// - `MAX_RETRIES` - Retries after a failed fetch (default: 3)
    /// - `RETRY_BASE_DELAY_MS` - First backoff delay (default: 1000)
    /// - `RETRY_MAX_DELAY_MS` - Backoff cap (default: 10000)
    /// - `REMOTE_CACHE_URL` - Remote cache server base URL (default: unset)
    /// - `HEARTBEAT_INTERVAL` - Remote heartbeat in seconds (default: 30)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_entries: env_or("MAX_ENTRIES", defaults.max_entries),
            default_ttl: env_or("DEFAULT_TTL", defaults.default_ttl),
            server_port: env_or("SERVER_PORT", defaults.server_port),
            cleanup_interval: env_or("CLEANUP_INTERVAL", defaults.cleanup_interval),
            stale_time_ms: env_or("STALE_TIME_MS", defaults.stale_time_ms),
            max_retries: env_or("MAX_RETRIES", defaults.max_retries),
            retry_base_delay_ms: env_or("RETRY_BASE_DELAY_MS", defaults.retry_base_delay_ms),
            retry_max_delay_ms: env_or("RETRY_MAX_DELAY_MS", defaults.retry_max_delay_ms),
            remote_cache_url: env::var("REMOTE_CACHE_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            heartbeat_interval: env_or("HEARTBEAT_INTERVAL", defaults.heartbeat_interval),
        }
    }

    pub fn stale_time(&self) -> Duration {
        Duration::from_millis(self.stale_time_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            default_ttl: 300,
            server_port: 3000,
            cleanup_interval: 1,
            stale_time_ms: 60_000,
            max_retries: 3,
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 10_000,
            remote_cache_url: None,
            heartbeat_interval: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.max_entries, 1000);
        assert_eq!(config.default_ttl, 300);
        assert_eq!(config.server_port, 3000);
        assert_eq!(config.cleanup_interval, 1);
        assert_eq!(config.stale_time(), Duration::from_secs(60));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_base_delay(), Duration::from_secs(1));
        assert_eq!(config.retry_max_delay(), Duration::from_secs(10));
        assert!(config.remote_cache_url.is_none());
    }

    #[test]
    fn test_config_from_env_defaults() {
        // Clear any existing env vars to test defaults
        env::remove_var("MAX_ENTRIES");
        env::remove_var("DEFAULT_TTL");
        env::remove_var("SERVER_PORT");
        env::remove_var("STALE_TIME_MS");
        env::remove_var("MAX_RETRIES");
        env::remove_var("REMOTE_CACHE_URL");

        let config = Config::from_env();
        assert_eq!(config.max_entries, 1000);
        assert_eq!(config.default_ttl, 300);
        assert_eq!(config.server_port, 3000);
        assert_eq!(config.stale_time_ms, 60_000);
        assert_eq!(config.max_retries, 3);
        assert!(config.remote_cache_url.is_none());
    }

    #[test]
    fn test_env_or_ignores_garbage() {
        env::set_var("MINI_SWR_TEST_GARBAGE", "not-a-number");
        assert_eq!(env_or("MINI_SWR_TEST_GARBAGE", 7u32), 7);
        env::remove_var("MINI_SWR_TEST_GARBAGE");
    }
}
