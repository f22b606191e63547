//! Controller-wide counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Lock-free counters shared by every subscription of a controller.
#[derive(Debug, Default)]
pub struct ControllerStats {
    cache_hits: AtomicU64,
    stale_hits: AtomicU64,
    cache_misses: AtomicU64,
    flights: AtomicU64,
    fetch_successes: AtomicU64,
    fetch_errors: AtomicU64,
    retries: AtomicU64,
    store_errors: AtomicU64,
    optimistic_updates: AtomicU64,
    invalidations: AtomicU64,
}

/// Point-in-time copy of [`ControllerStats`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub cache_hits: u64,
    pub stale_hits: u64,
    pub cache_misses: u64,
    /// Fetch function invocations
    pub flights: u64,
    pub fetch_successes: u64,
    pub fetch_errors: u64,
    pub retries: u64,
    pub store_errors: u64,
    pub optimistic_updates: u64,
    pub invalidations: u64,
}

impl StatsSnapshot {
    /// Share of reads served from the store, stale ones included.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.cache_hits + self.stale_hits;
        let total = hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl ControllerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        bump(&self.cache_hits);
    }

    pub fn record_stale_hit(&self) {
        bump(&self.stale_hits);
    }

    pub fn record_miss(&self) {
        bump(&self.cache_misses);
    }

    pub fn record_flight(&self) {
        bump(&self.flights);
    }

    pub fn record_success(&self) {
        bump(&self.fetch_successes);
    }

    pub fn record_fetch_error(&self) {
        bump(&self.fetch_errors);
    }

    pub fn record_retry(&self) {
        bump(&self.retries);
    }

    pub fn record_store_error(&self) {
        bump(&self.store_errors);
    }

    pub fn record_optimistic_update(&self) {
        bump(&self.optimistic_updates);
    }

    pub fn record_invalidation(&self) {
        bump(&self.invalidations);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            cache_hits: load(&self.cache_hits),
            stale_hits: load(&self.stale_hits),
            cache_misses: load(&self.cache_misses),
            flights: load(&self.flights),
            fetch_successes: load(&self.fetch_successes),
            fetch_errors: load(&self.fetch_errors),
            retries: load(&self.retries),
            store_errors: load(&self.store_errors),
            optimistic_updates: load(&self.optimistic_updates),
            invalidations: load(&self.invalidations),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_counts() {
        let stats = ControllerStats::new();
        stats.record_hit();
        stats.record_stale_hit();
        stats.record_miss();
        stats.record_miss();
        stats.record_flight();

        let snap = stats.snapshot();
        assert_eq!(snap.cache_hits, 1);
        assert_eq!(snap.stale_hits, 1);
        assert_eq!(snap.cache_misses, 2);
        assert_eq!(snap.flights, 1);
        assert_eq!(snap.hit_rate(), 0.5);
    }

    #[test]
    fn test_empty_hit_rate() {
        assert_eq!(StatsSnapshot::default().hit_rate(), 0.0);
    }
}
