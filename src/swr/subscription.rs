//! Subscription handle and its load / fetch / retry state machine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::{CacheError, ErrorKind, FetchError, Result};
use crate::store::StoredEntry;
use crate::swr::controller::{invalidate_key, ControllerInner, Invalidation};
use crate::swr::inflight::{FlightResult, Joined, Role};
use crate::swr::{CacheState, Cacheable, Freshness, SubscribeOptions};

pub(crate) type Fetcher<T> = Arc<
    dyn Fn(CancellationToken) -> BoxFuture<'static, std::result::Result<T, FetchError>>
        + Send
        + Sync,
>;

/// A live subscription to one key.
///
/// Dropping the handle (or calling [`unsubscribe`](Self::unsubscribe))
/// cancels the token handed to the fetch function, aborts pending loads and
/// retry sleeps, and freezes the state: nothing resolves into it afterwards.
pub struct Subscription<T: Cacheable> {
    inner: Arc<Inner<T>>,
}

struct Inner<T: Cacheable> {
    id: u64,
    key: String,
    controller: Arc<ControllerInner>,
    fetcher: Fetcher<T>,
    options: SubscribeOptions<T>,
    state: watch::Sender<CacheState<T>>,
    in_flight: AtomicBool,
    /// Results produced before this instant never replace `data`
    floor: Mutex<Option<DateTime<Utc>>>,
    token: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Held while a load or fetch cycle runs; at most one per subscription.
struct FlightGuard<'a, T: Cacheable> {
    inner: &'a Inner<T>,
}

impl<'a, T: Cacheable> FlightGuard<'a, T> {
    fn acquire(inner: &'a Inner<T>) -> Option<Self> {
        inner
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        inner.mutate(|s| s.fetching = true);
        Some(Self { inner })
    }
}

impl<T: Cacheable> Drop for FlightGuard<'_, T> {
    fn drop(&mut self) {
        self.inner.in_flight.store(false, Ordering::Release);
        self.inner.mutate(|s| s.fetching = false);
    }
}

impl<T: Cacheable> Subscription<T> {
    pub(crate) fn start(
        controller: Arc<ControllerInner>,
        key: String,
        fetcher: Fetcher<T>,
        options: SubscribeOptions<T>,
    ) -> Self {
        let loads_now = options.enabled && !options.skip_initial_fetch;
        let (state, _) = watch::channel(CacheState::new(loads_now));
        let invalidations = controller.invalidations.subscribe();

        let inner = Arc::new(Inner {
            id: controller.next_subscription_id(),
            key,
            controller,
            fetcher,
            options,
            state,
            in_flight: AtomicBool::new(false),
            floor: Mutex::new(None),
            token: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        });

        if inner.options.enabled {
            inner.track(tokio::spawn(inner.clone().listen(invalidations)));
            if loads_now {
                inner.track(tokio::spawn(inner.clone().load()));
            }
        }

        debug!(key = %inner.key, id = inner.id, enabled = inner.options.enabled, "Subscribed");
        Self { inner }
    }

    pub fn key(&self) -> &str {
        &self.inner.key
    }

    pub fn options(&self) -> &SubscribeOptions<T> {
        &self.inner.options
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> CacheState<T> {
        self.inner.state.borrow().clone()
    }

    pub fn data(&self) -> Option<T> {
        self.inner.state.borrow().data.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.state.borrow().loading
    }

    pub fn is_stale(&self) -> bool {
        self.inner.state.borrow().stale
    }

    pub fn error(&self) -> Option<FetchError> {
        self.inner.state.borrow().error.clone()
    }

    pub fn retry_count(&self) -> u32 {
        self.inner.state.borrow().retry_count
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.inner.state.borrow().last_updated
    }

    /// Whether a load or fetch cycle is running for this handle.
    pub fn is_fetching(&self) -> bool {
        self.inner.state.borrow().fetching
    }

    /// Receiver that observes every state change.
    pub fn watch(&self) -> watch::Receiver<CacheState<T>> {
        self.inner.state.subscribe()
    }

    /// Waits until the state satisfies `predicate` and returns that state.
    pub async fn wait_for(
        &self,
        mut predicate: impl FnMut(&CacheState<T>) -> bool,
    ) -> Result<CacheState<T>> {
        let mut rx = self.watch();
        let matched = rx.wait_for(|state| predicate(state)).await;
        match matched {
            Ok(state) => Ok(state.clone()),
            Err(_) => Err(self.inner.cancelled()),
        }
    }

    /// Fetches now, bypassing freshness. If a cycle is already running on
    /// this handle, waits for it and returns its outcome instead.
    pub async fn refetch(&self) -> Result<T> {
        self.inner.ensure_enabled()?;
        self.inner.refresh(false).await
    }

    /// Deletes the stored entry, refreshes every other subscription to the
    /// key, and fetches for this one. Flights started earlier are not reused.
    pub async fn invalidate(&self) -> Result<T> {
        self.inner.ensure_enabled()?;
        let at = Utc::now();
        self.inner.raise_floor(at);
        invalidate_key(&self.inner.controller, &self.inner.key, at, Some(self.inner.id)).await;
        self.inner.refresh(true).await
    }

    /// Applies `update` to the current data right away and persists the
    /// result in the background with the subscription's ttl. Fetches that
    /// started before this call will not overwrite it.
    pub fn update_cache<F>(&self, update: F)
    where
        F: FnOnce(Option<&T>) -> T,
    {
        let inner = &self.inner;
        let now = Utc::now();
        inner.raise_floor(now);

        let mut updated = None;
        inner.mutate(|s| {
            let value = update(s.data.as_ref());
            s.data = Some(value.clone());
            s.stale = false;
            s.loading = false;
            s.last_updated = Some(now);
            updated = Some(value);
        });
        let Some(value) = updated else {
            debug!(key = %inner.key, "Ignoring update on closed subscription");
            return;
        };
        inner.controller.stats.record_optimistic_update();

        if inner.options.enabled {
            inner.persist(&value, now);
        }
    }

    /// Replaces the data outright; see [`update_cache`](Self::update_cache).
    pub fn set_cache(&self, value: T) {
        self.update_cache(|_| value);
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl<T: Cacheable> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.inner.close();
    }
}

impl<T: Cacheable> Inner<T> {
    fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    fn cancelled(&self) -> CacheError {
        CacheError::Cancelled(self.key.clone())
    }

    fn ensure_enabled(&self) -> Result<()> {
        if self.options.enabled {
            Ok(())
        } else {
            Err(CacheError::Disabled(self.key.clone()))
        }
    }

    /// Applies `f` unless the subscription is closed. Returns whether it ran.
    fn mutate(&self, f: impl FnOnce(&mut CacheState<T>)) -> bool {
        if self.is_closed() {
            return false;
        }
        self.state.send_modify(f);
        true
    }

    fn track(&self, handle: JoinHandle<()>) {
        if self.is_closed() {
            handle.abort();
            return;
        }
        let mut tasks = self.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    fn close(&self) {
        if self.is_closed() {
            return;
        }
        self.token.cancel();
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            task.abort();
        }
        debug!(key = %self.key, id = self.id, "Unsubscribed");
    }

    fn raise_floor(&self, at: DateTime<Utc>) {
        let mut floor = self.floor.lock();
        *floor = Some(floor.map_or(at, |current| current.max(at)));
    }

    fn floor(&self) -> Option<DateTime<Utc>> {
        *self.floor.lock()
    }

    fn accepts(&self, produced_at: DateTime<Utc>) -> bool {
        self.floor().map_or(true, |floor| produced_at >= floor)
    }

    /// Initial load: read the store, decide freshness, fetch if needed.
    async fn load(self: Arc<Self>) {
        let Some(_guard) = FlightGuard::acquire(&self) else {
            debug!(key = %self.key, "Load skipped, cycle already running");
            return;
        };

        let stats = &self.controller.stats;
        let cached = self.controller.read(&self.key).await;
        if self.is_closed() {
            return;
        }

        if let Some(entry) = cached {
            let age = entry.age();
            match Freshness::of(age, self.options.stale_time, self.options.ttl_duration()) {
                Freshness::Fresh => {
                    if self.serve_cached(entry, false) {
                        stats.record_hit();
                        debug!(key = %self.key, age_ms = age.as_millis() as u64, "Cache hit");
                        return;
                    }
                }
                Freshness::Stale => {
                    if self.serve_cached(entry, true) {
                        stats.record_stale_hit();
                        debug!(key = %self.key, age_ms = age.as_millis() as u64, "Serving stale, revalidating");
                        if let Err(e) = self.revalidate().await {
                            debug!(key = %self.key, error = %e, "Background revalidation ended");
                        }
                        return;
                    }
                }
                Freshness::Expired => {
                    debug!(key = %self.key, age_ms = age.as_millis() as u64, "Cached entry past ttl");
                }
            }
        }

        stats.record_miss();
        self.mutate(|s| {
            if s.data.is_none() {
                s.loading = true;
            }
        });
        if let Err(e) = self.revalidate().await {
            debug!(key = %self.key, error = %e, "Initial fetch ended");
        }
    }

    /// Serves a stored entry. Returns false when it could not be decoded.
    fn serve_cached(&self, entry: StoredEntry, stale: bool) -> bool {
        let data: T = match serde_json::from_value(entry.value) {
            Ok(data) => data,
            Err(e) => {
                warn!(key = %self.key, error = %e, "Cached value has an unexpected shape, refetching");
                return false;
            }
        };

        let timestamp = entry.timestamp;
        self.mutate(|s| {
            if !self.accepts(timestamp) {
                return;
            }
            s.data = Some(data);
            s.stale = stale;
            s.loading = false;
            s.error = None;
            s.retry_count = 0;
            s.last_updated = Some(timestamp);
        });
        true
    }

    /// Foreground fetch outside the initial load.
    ///
    /// Waits for a running cycle first. For a plain refetch the finished
    /// cycle's outcome is the answer; after an invalidation a new fetch is
    /// always made.
    async fn refresh(&self, invalidated: bool) -> Result<T> {
        loop {
            if self.is_closed() {
                return Err(self.cancelled());
            }

            if let Some(_guard) = FlightGuard::acquire(self) {
                self.mutate(|s| {
                    if s.data.is_none() {
                        s.loading = true;
                    } else if invalidated {
                        s.stale = true;
                    }
                });
                return self.revalidate().await;
            }

            let settled = self.wait_idle().await?;
            if !invalidated {
                if let Some(error) = settled.error {
                    return Err(CacheError::Fetch(error));
                }
                if let Some(data) = settled.data {
                    return Ok(data);
                }
            }
            tokio::task::yield_now().await;
        }
    }

    async fn wait_idle(&self) -> Result<CacheState<T>> {
        let mut rx = self.state.subscribe();
        tokio::select! {
            _ = self.token.cancelled() => return Err(self.cancelled()),
            idle = rx.wait_for(|s| !s.fetching) => {
                if idle.is_err() {
                    return Err(self.cancelled());
                }
            }
        }
        Ok(self.state.borrow().clone())
    }

    /// Fetch with retries. The caller holds the flight guard.
    async fn revalidate(&self) -> Result<T> {
        let stats = &self.controller.stats;
        let mut failures = 0u32;

        loop {
            let error = match self.fetch_once().await {
                Ok(Some(data)) => return Ok(data),
                Ok(None) => return self.current_after_discard(),
                Err(e) => e,
            };
            if error.is_cancelled() || self.is_closed() {
                debug!(key = %self.key, "Fetch cancelled");
                return Err(self.cancelled());
            }

            failures += 1;
            stats.record_fetch_error();
            if error.kind == ErrorKind::NotFound {
                self.controller.remove(&self.key).await;
            }

            if failures <= self.options.max_retries {
                let delay = self.options.backoff.delay(failures);
                warn!(
                    key = %self.key,
                    attempt = failures,
                    max_retries = self.options.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Fetch failed, retrying"
                );
                self.mutate(|s| s.retry_count = failures);
                stats.record_retry();

                tokio::select! {
                    _ = self.token.cancelled() => return Err(self.cancelled()),
                    _ = tokio::time::sleep(delay) => {}
                }
            } else {
                error!(key = %self.key, attempts = failures, error = %error, "Fetch failed, giving up");
                let reported = self.mutate(|s| {
                    s.retry_count = failures;
                    s.error = Some(error.clone());
                    s.loading = false;
                });
                if reported {
                    if let Some(on_error) = &self.options.on_error {
                        on_error(&error);
                    }
                }
                return Err(CacheError::Fetch(error));
            }
        }
    }

    /// The applied value once a fetch result was discarded by the gate.
    fn current_after_discard(&self) -> Result<T> {
        match self.state.borrow().data.clone() {
            Some(data) => Ok(data),
            None => Err(CacheError::Superseded(self.key.clone())),
        }
    }

    /// One attempt: join or start the key's flight and apply its result.
    /// `Ok(None)` means the result settled but was not applied.
    async fn fetch_once(&self) -> std::result::Result<Option<T>, FetchError> {
        loop {
            let joined = self
                .controller
                .inflight
                .join_or_start(&self.key, self.floor(), || self.start_flight());

            let outcome = tokio::select! {
                biased;
                _ = self.token.cancelled() => return Err(FetchError::cancelled()),
                outcome = joined.outcome.clone() => outcome,
            };

            match outcome {
                Err(e) if e.is_cancelled() && joined.role == Role::Follower && !self.is_closed() => {
                    debug!(key = %self.key, "Joined fetch was cancelled by its owner, starting another");
                }
                Err(e) => return Err(e),
                Ok(raw) => return self.apply_fetched(raw, &joined).await,
            }
        }
    }

    fn start_flight(&self) -> BoxFuture<'static, FlightResult> {
        self.controller.stats.record_flight();
        let fetcher = self.fetcher.clone();
        let token = self.token.child_token();
        let key = self.key.clone();

        async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(FetchError::cancelled()),
                result = fetcher(token.clone()) => result.and_then(|data| {
                    serde_json::to_value(data).map_err(|e| {
                        FetchError::new(
                            ErrorKind::Validation,
                            format!("value for {} is not serializable: {}", key, e),
                        )
                    })
                }),
            }
        }
        .boxed()
    }

    async fn apply_fetched(
        &self,
        raw: Value,
        flight: &Joined,
    ) -> std::result::Result<Option<T>, FetchError> {
        let data: T = serde_json::from_value(raw.clone()).map_err(|e| {
            FetchError::new(
                ErrorKind::Validation,
                format!("fetched value for {} has an unexpected shape: {}", self.key, e),
            )
        })?;
        if self.is_closed() {
            return Err(FetchError::cancelled());
        }

        let current = || !flight.is_superseded() && self.accepts(flight.started_at);
        let now = Utc::now();
        if current() && flight.role == Role::Leader {
            self.controller
                .write(&self.key, StoredEntry::at(raw, now), self.options.ttl)
                .await;
        }

        let mut applied = false;
        self.mutate(|s| {
            s.error = None;
            s.retry_count = 0;
            if current() {
                s.data = Some(data.clone());
                s.stale = false;
                s.loading = false;
                s.last_updated = Some(now);
                applied = true;
            }
        });

        if !applied {
            if !self.is_closed() {
                debug!(key = %self.key, "Discarding fetch that started before a newer local change");
            }
            return Ok(None);
        }

        self.controller.stats.record_success();
        debug!(key = %self.key, "Fetch applied");
        if let Some(on_success) = &self.options.on_success {
            on_success(&data);
        }
        Ok(Some(data))
    }

    /// Reacts to invalidations published on the controller.
    async fn listen(self: Arc<Self>, mut invalidations: broadcast::Receiver<Invalidation>) {
        loop {
            let received = tokio::select! {
                _ = self.token.cancelled() => break,
                received = invalidations.recv() => received,
            };

            let at = match received {
                Ok(invalidation) => {
                    if invalidation.origin == Some(self.id) || !invalidation.matches(&self.key) {
                        continue;
                    }
                    invalidation.at
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(key = %self.key, missed, "Missed invalidations, refreshing");
                    Utc::now()
                }
                Err(RecvError::Closed) => break,
            };

            self.raise_floor(at);
            if let Err(e) = self.refresh(true).await {
                debug!(key = %self.key, error = %e, "Refresh after invalidation ended");
            }
        }
    }

    fn persist(&self, value: &T, at: DateTime<Utc>) {
        let raw = match serde_json::to_value(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = %self.key, error = %e, "Cannot persist optimistic update");
                return;
            }
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(key = %self.key, "No runtime, optimistic update kept in memory only");
            return;
        };

        let controller = self.controller.clone();
        let key = self.key.clone();
        let ttl = self.options.ttl;
        runtime.spawn(async move {
            controller.write(&key, StoredEntry::at(raw, at), ttl).await;
        });
    }
}
