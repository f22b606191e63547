//! Stale-While-Revalidate Module
//!
//! Subscriptions that serve cached values immediately, refresh them in the
//! background once they go stale, retry failed fetches with exponential
//! backoff, and share one in-flight fetch per key.

pub mod backoff;
mod controller;
mod inflight;
mod options;
mod state;
mod stats;
mod subscription;

use serde::de::DeserializeOwned;
use serde::Serialize;

// Re-export public types
pub use backoff::Backoff;
pub use controller::{reconnect_backoff, CacheController};
pub use options::{ErrorCallback, SubscribeOptions, SuccessCallback};
pub use state::{CacheState, Freshness};
pub use stats::{ControllerStats, StatsSnapshot};
pub use subscription::Subscription;

/// Values a subscription can hold: stored as JSON and shared across tasks.
pub trait Cacheable: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> Cacheable for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}
