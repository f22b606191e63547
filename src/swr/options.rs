//! Subscription options.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::error::{CacheError, FetchError, Result};
use crate::store::validate_key;
use crate::swr::Backoff;

pub type SuccessCallback<T> = Arc<dyn Fn(&T) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&FetchError) + Send + Sync>;

/// Timing, retry and callback settings for one subscription.
pub struct SubscribeOptions<T> {
    /// Seconds after which a stored value may no longer be served
    pub ttl: u64,
    /// Age after which a served value is flagged stale and refreshed
    pub stale_time: Duration,
    /// When false the subscription never reads or fetches
    pub enabled: bool,
    /// Skip the cache read on subscribe; wait for an explicit `refetch`
    pub skip_initial_fetch: bool,
    /// Retries after the first failed attempt; 0 surfaces the first error
    pub max_retries: u32,
    pub backoff: Backoff,
    /// Called after every applied successful fetch
    pub on_success: Option<SuccessCallback<T>>,
    /// Called once retries are exhausted
    pub on_error: Option<ErrorCallback>,
}

impl<T> SubscribeOptions<T> {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ttl: config.default_ttl,
            stale_time: config.stale_time(),
            max_retries: config.max_retries,
            backoff: Backoff::new(config.retry_base_delay(), config.retry_max_delay()),
            ..Self::default()
        }
    }

    pub fn ttl(mut self, seconds: u64) -> Self {
        self.ttl = seconds;
        self
    }

    pub fn stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = stale_time;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn skip_initial_fetch(mut self, skip: bool) -> Self {
        self.skip_initial_fetch = skip;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff = Backoff::new(base, max);
        self
    }

    pub fn on_success(mut self, callback: impl Fn(&T) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(callback));
        self
    }

    pub fn on_error(mut self, callback: impl Fn(&FetchError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }

    pub fn ttl_duration(&self) -> Duration {
        Duration::from_secs(self.ttl)
    }

    /// Fails fast on settings that would make the subscription meaningless.
    pub fn validate(&self, key: &str) -> Result<()> {
        if self.enabled {
            validate_key(key)?;
        }
        if self.ttl == 0 {
            return Err(CacheError::InvalidRequest(
                "ttl must be at least one second".to_string(),
            ));
        }
        if self.stale_time > self.ttl_duration() {
            return Err(CacheError::InvalidRequest(format!(
                "stale_time ({:?}) exceeds ttl ({}s)",
                self.stale_time, self.ttl
            )));
        }
        Ok(())
    }
}

impl<T> Default for SubscribeOptions<T> {
    fn default() -> Self {
        Self {
            ttl: 300,
            stale_time: Duration::from_millis(60_000),
            enabled: true,
            skip_initial_fetch: false,
            max_retries: 3,
            backoff: Backoff::default(),
            on_success: None,
            on_error: None,
        }
    }
}

impl<T> Clone for SubscribeOptions<T> {
    fn clone(&self) -> Self {
        Self {
            ttl: self.ttl,
            stale_time: self.stale_time,
            enabled: self.enabled,
            skip_initial_fetch: self.skip_initial_fetch,
            max_retries: self.max_retries,
            backoff: self.backoff,
            on_success: self.on_success.clone(),
            on_error: self.on_error.clone(),
        }
    }
}

impl<T> fmt::Debug for SubscribeOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscribeOptions")
            .field("ttl", &self.ttl)
            .field("stale_time", &self.stale_time)
            .field("enabled", &self.enabled)
            .field("skip_initial_fetch", &self.skip_initial_fetch)
            .field("max_retries", &self.max_retries)
            .field("backoff", &self.backoff)
            .field("on_success", &self.on_success.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}
