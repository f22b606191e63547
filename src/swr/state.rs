//! Per-subscription state and the freshness decision.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::FetchError;

/// What a consumer sees for one subscribed key.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheState<T> {
    /// Last value served from the store, a fetch, or an optimistic update
    pub data: Option<T>,
    /// A fetch is outstanding and no data has been served yet
    pub loading: bool,
    /// `data` is past `stale_time` and a refresh is running or pending
    pub stale: bool,
    /// Last error after retries were exhausted; cleared on success
    pub error: Option<FetchError>,
    /// Consecutive failed attempts; reset on success
    pub retry_count: u32,
    /// When `data` was produced
    pub last_updated: Option<DateTime<Utc>>,
    /// The subscription's in-flight guard is held
    pub fetching: bool,
}

impl<T> CacheState<T> {
    pub fn new(loading: bool) -> Self {
        Self {
            data: None,
            loading,
            stale: false,
            error: None,
            retry_count: 0,
            last_updated: None,
            fetching: false,
        }
    }

    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }
}

impl<T> Default for CacheState<T> {
    fn default() -> Self {
        Self::new(false)
    }
}

/// Outcome of comparing a stored entry's age with the subscription's timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Serve as is, no network call
    Fresh,
    /// Serve flagged stale, refresh once in the background
    Stale,
    /// Past ttl; treat as a miss
    Expired,
}

impl Freshness {
    pub fn of(age: Duration, stale_time: Duration, ttl: Duration) -> Self {
        if age >= ttl {
            Freshness::Expired
        } else if age >= stale_time {
            Freshness::Stale
        } else {
            Freshness::Fresh
        }
    }
}
