//! Per-key single-flight registry.
//!
//! At most one fetch runs per key across all subscriptions of a controller.
//! Late callers join the running flight instead of starting another one,
//! unless it started before a point they must not observe (an invalidation
//! or a local write). Invalidating a key supersedes its running flight: the
//! flight still settles for whoever awaits it, but nobody applies its result.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use crate::error::{ErrorKind, FetchError};

pub(crate) type FlightResult = std::result::Result<Value, FetchError>;
pub(crate) type SharedFlight = Shared<BoxFuture<'static, FlightResult>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Role {
    /// Started the flight; owns the store write
    Leader,
    /// Joined a flight someone else started
    Follower,
}

pub(crate) struct Joined {
    pub role: Role,
    pub started_at: DateTime<Utc>,
    pub outcome: SharedFlight,
    superseded: Arc<AtomicBool>,
}

impl Joined {
    /// Whether an invalidation landed while this flight was running.
    pub fn is_superseded(&self) -> bool {
        self.superseded.load(Ordering::Acquire)
    }
}

struct Flight {
    id: u64,
    started_at: DateTime<Utc>,
    outcome: SharedFlight,
    superseded: Arc<AtomicBool>,
}

#[derive(Default)]
pub(crate) struct InflightRegistry {
    next_id: AtomicU64,
    flights: Mutex<HashMap<String, Flight>>,
}

impl InflightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Joins the running flight for `key`, or spawns `start()` as a new one.
    ///
    /// A flight that started before `not_before` is never joined; the new
    /// flight replaces it in the registry and the old one finishes on its own.
    pub fn join_or_start<F>(
        self: &Arc<Self>,
        key: &str,
        not_before: Option<DateTime<Utc>>,
        start: F,
    ) -> Joined
    where
        F: FnOnce() -> BoxFuture<'static, FlightResult>,
    {
        let mut flights = self.flights.lock();

        if let Some(flight) = flights.get(key) {
            if not_before.map_or(true, |floor| flight.started_at >= floor) {
                debug!(key, flight = flight.id, "Joining in-flight fetch");
                return Joined {
                    role: Role::Follower,
                    started_at: flight.started_at,
                    outcome: flight.outcome.clone(),
                    superseded: flight.superseded.clone(),
                };
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let started_at = Utc::now();
        let fetch = start();
        let registry = Arc::clone(self);
        let owned_key = key.to_string();

        // The task removes its own entry, so a flight nobody awaits still
        // leaves the registry once the fetch settles.
        let handle = tokio::spawn(async move {
            let result = fetch.await;
            registry.finish(&owned_key, id);
            result
        });

        let outcome = async move {
            match handle.await {
                Ok(result) => result,
                Err(e) if e.is_cancelled() => Err(FetchError::cancelled()),
                Err(e) => Err(FetchError::new(
                    ErrorKind::Unknown,
                    format!("fetch task failed: {}", e),
                )),
            }
        }
        .boxed()
        .shared();

        let superseded = Arc::new(AtomicBool::new(false));
        debug!(key, flight = id, "Starting fetch");
        flights.insert(
            key.to_string(),
            Flight {
                id,
                started_at,
                outcome: outcome.clone(),
                superseded: superseded.clone(),
            },
        );

        Joined {
            role: Role::Leader,
            started_at,
            outcome,
            superseded,
        }
    }

    /// Marks running flights for matching keys as superseded and forgets
    /// them, so later callers start fresh ones. Returns how many were hit.
    pub fn supersede(&self, matches: impl Fn(&str) -> bool) -> usize {
        let mut flights = self.flights.lock();
        let before = flights.len();
        flights.retain(|key, flight| {
            if matches(key) {
                flight.superseded.store(true, Ordering::Release);
                debug!(key = %key, flight = flight.id, "Superseded in-flight fetch");
                false
            } else {
                true
            }
        });
        before - flights.len()
    }

    /// Drops the entry for `key` if it still belongs to flight `id`.
    fn finish(&self, key: &str, id: u64) {
        let mut flights = self.flights.lock();
        if flights.get(key).is_some_and(|flight| flight.id == id) {
            flights.remove(key);
        }
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.flights.lock().contains_key(key)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.flights.lock().len()
    }
}
