//! Mini SWR - stale-while-revalidate caching over a keyed store
//!
//! A [`CacheController`] hands out subscriptions that serve cached values
//! right away, refresh them in the background once stale, retry failed
//! fetches with exponential backoff and share one in-flight fetch per key.
//! The keyed store is either in-process ([`MemoryStore`]) or a remote cache
//! server ([`HttpStore`]); the server itself ships as the `mini_swr` binary.

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod resources;
pub mod store;
pub mod swr;
pub mod tasks;

pub use api::{create_router, AppState};
pub use config::Config;
pub use error::{CacheError, ErrorKind, FetchError, Result};
pub use resources::{MemberRole, ResourceKey};
pub use store::{HttpStore, KeyValueStore, MemoryStore, StoredEntry};
pub use swr::{CacheController, CacheState, SubscribeOptions, Subscription};
pub use tasks::{spawn_cleanup_task, spawn_heartbeat_task};
