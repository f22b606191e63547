//! Cache controller.
//!
//! Owns the store, the single-flight registry and the invalidation channel,
//! and hands out [`Subscription`]s.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::Mutex;
use regex::Regex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{FetchError, Result};
use crate::resources::ResourceKey;
use crate::store::{
    glob_to_regex, validate_key, HttpStore, KeyValueStore, MemoryStore, StoredEntry,
};
use crate::swr::inflight::InflightRegistry;
use crate::swr::subscription::{Fetcher, Subscription};
use crate::swr::{Backoff, Cacheable, ControllerStats, StatsSnapshot, SubscribeOptions};
use crate::tasks::{spawn_cleanup_task, spawn_heartbeat_task};

/// Pending invalidations a lagging subscription may miss before it is told so.
const INVALIDATION_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub(crate) enum InvalidationTarget {
    Key(String),
    Pattern(Regex),
}

/// Broadcast to every live subscription when entries are invalidated.
#[derive(Debug, Clone)]
pub(crate) struct Invalidation {
    pub target: InvalidationTarget,
    pub at: DateTime<Utc>,
    /// Subscription that asked for it and refreshes on its own
    pub origin: Option<u64>,
}

impl Invalidation {
    pub fn matches(&self, key: &str) -> bool {
        match &self.target {
            InvalidationTarget::Key(k) => k == key,
            InvalidationTarget::Pattern(re) => re.is_match(key),
        }
    }
}

pub(crate) struct ControllerInner {
    pub store: Arc<dyn KeyValueStore>,
    pub stats: ControllerStats,
    pub inflight: Arc<InflightRegistry>,
    pub invalidations: broadcast::Sender<Invalidation>,
    pub config: Config,
    next_subscription: AtomicU64,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl ControllerInner {
    /// Reads `key`, counting store failures as a miss.
    pub async fn read(&self, key: &str) -> Option<StoredEntry> {
        match self.store.get(key).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key, error = %e, "Store read failed, treating as miss");
                self.stats.record_store_error();
                None
            }
        }
    }

    pub async fn write(&self, key: &str, entry: StoredEntry, ttl: u64) {
        if let Err(e) = self.store.set(key, entry, ttl).await {
            warn!(key, error = %e, "Store write failed");
            self.stats.record_store_error();
        }
    }

    pub async fn remove(&self, key: &str) {
        if let Err(e) = self.store.del(key).await {
            warn!(key, error = %e, "Store delete failed");
            self.stats.record_store_error();
        }
    }

    pub fn publish(&self, invalidation: Invalidation) {
        self.stats.record_invalidation();
        // No receivers just means no live subscriptions.
        let _ = self.invalidations.send(invalidation);
    }

    pub fn next_subscription_id(&self) -> u64 {
        self.next_subscription.fetch_add(1, Ordering::Relaxed)
    }
}

/// Entry point for stale-while-revalidate subscriptions over a keyed store.
///
/// Cloning is cheap; clones share the store, the in-flight registry and the
/// counters.
#[derive(Clone)]
pub struct CacheController {
    inner: Arc<ControllerInner>,
}

impl CacheController {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_config(store, Config::default())
    }

    pub fn with_config(store: Arc<dyn KeyValueStore>, config: Config) -> Self {
        let (invalidations, _) = broadcast::channel(INVALIDATION_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(ControllerInner {
                store,
                stats: ControllerStats::new(),
                inflight: Arc::new(InflightRegistry::new()),
                invalidations,
                config,
                next_subscription: AtomicU64::new(0),
                background: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Builds the store described by `config` and starts its background tasks.
    ///
    /// With `remote_cache_url` set the controller talks to that server through
    /// an [`HttpStore`] mirrored into memory, and a heartbeat keeps the
    /// connection state current. Otherwise an in-process [`MemoryStore`] is
    /// used. Must be called inside a Tokio runtime.
    pub async fn from_config(config: Config) -> Result<Self> {
        let local = MemoryStore::from_config(&config);
        let mut background = vec![spawn_cleanup_task(
            local.clone(),
            Duration::from_secs(config.cleanup_interval),
        )];

        let store: Arc<dyn KeyValueStore> = match &config.remote_cache_url {
            Some(url) => {
                let remote = Arc::new(HttpStore::new(url, local)?);
                let state = remote.connect().await;
                info!(url = %url, state = %state, "Using remote cache store");
                background.push(spawn_heartbeat_task(
                    remote.clone(),
                    Duration::from_secs(config.heartbeat_interval),
                    reconnect_backoff(),
                ));
                remote as Arc<dyn KeyValueStore>
            }
            None => {
                info!(max_entries = config.max_entries, "Using in-memory cache store");
                Arc::new(local)
            }
        };

        let controller = Self::with_config(store, config);
        controller.inner.background.lock().extend(background);
        Ok(controller)
    }

    /// Options seeded from this controller's configuration.
    pub fn options<T>(&self) -> SubscribeOptions<T> {
        SubscribeOptions::from_config(&self.inner.config)
    }

    /// Subscribes to `key`, loading it through `fetch` on a miss or when stale.
    ///
    /// The fetch function receives a cancellation token that fires when the
    /// subscription goes away; it should stop work once it does. The initial
    /// load runs in the background; watch the returned subscription for
    /// results.
    ///
    /// Fails only for programmer errors such as an empty key or a
    /// `stale_time` longer than `ttl`.
    pub fn subscribe<T, F, Fut>(
        &self,
        key: impl Into<String>,
        fetch: F,
        options: SubscribeOptions<T>,
    ) -> Result<Subscription<T>>
    where
        T: Cacheable,
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, FetchError>> + Send + 'static,
    {
        let key = key.into();
        options.validate(&key)?;

        let fetcher: Fetcher<T> = Arc::new(move |token| fetch(token).boxed());
        let subscription = Subscription::start(self.inner.clone(), key, fetcher, options);
        Ok(subscription)
    }

    /// Subscribes to a well-known resource with its default ttl.
    pub fn subscribe_resource<T, F, Fut>(
        &self,
        resource: &ResourceKey,
        fetch: F,
    ) -> Result<Subscription<T>>
    where
        T: Cacheable,
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, FetchError>> + Send + 'static,
    {
        let mut options = self.options::<T>().ttl(resource.default_ttl());
        options.stale_time = options.stale_time.min(options.ttl_duration());
        self.subscribe(resource.cache_key(), fetch, options)
    }

    /// Deletes `key` from the store and makes every subscription to it
    /// refetch. Flights started before this call are not reused.
    pub async fn invalidate(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        self.invalidate_from(key, Utc::now(), None).await;
        Ok(())
    }

    /// Deletes every key matching the `*` glob `pattern` and refreshes the
    /// matching subscriptions. Returns how many stored entries were removed.
    pub async fn invalidate_pattern(&self, pattern: &str) -> Result<usize> {
        let regex = glob_to_regex(pattern)?;
        let at = Utc::now();
        self.inner.inflight.supersede(|key| regex.is_match(key));

        let deleted = match self.inner.store.delete_pattern(pattern).await {
            Ok(count) => count,
            Err(e) => {
                warn!(pattern, error = %e, "Store pattern delete failed");
                self.inner.stats.record_store_error();
                0
            }
        };

        info!(pattern, deleted, "Invalidated cache pattern");
        self.inner.publish(Invalidation {
            target: InvalidationTarget::Pattern(regex),
            at,
            origin: None,
        });
        Ok(deleted)
    }

    pub(crate) async fn invalidate_from(&self, key: &str, at: DateTime<Utc>, origin: Option<u64>) {
        invalidate_key(&self.inner, key, at, origin).await;
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.inner.store
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Whether a fetch for `key` is running right now.
    pub fn is_fetching(&self, key: &str) -> bool {
        self.inner.inflight.is_in_flight(key)
    }

    /// Stops background tasks started by [`from_config`](Self::from_config).
    pub fn shutdown(&self) {
        let handles: Vec<_> = self.inner.background.lock().drain(..).collect();
        if !handles.is_empty() {
            debug!(tasks = handles.len(), "Stopping controller background tasks");
        }
        for handle in handles {
            handle.abort();
        }
    }
}

pub(crate) async fn invalidate_key(
    inner: &ControllerInner,
    key: &str,
    at: DateTime<Utc>,
    origin: Option<u64>,
) {
    inner.inflight.supersede(|k| k == key);
    inner.remove(key).await;
    debug!(key, "Invalidated cache key");
    inner.publish(Invalidation {
        target: InvalidationTarget::Key(key.to_string()),
        at,
        origin,
    });
}

/// Delays between remote reconnect attempts: 2s, 4s, 8s, 16s, then 30s.
pub fn reconnect_backoff() -> Backoff {
    Backoff::new(Duration::from_secs(1), Duration::from_secs(30))
}
