//! TTL Cleanup Task
//!
//! Background task that periodically purges expired entries from a
//! [`MemoryStore`] so they stop counting against capacity.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::store::MemoryStore;

/// Spawns the periodic expiry sweep over `store`.
///
/// Abort the returned handle to stop it during shutdown.
///
/// # Example
/// ```ignore
/// let store = MemoryStore::new(1000, 300);
/// let cleanup = spawn_cleanup_task(store.clone(), Duration::from_secs(1));
/// // Later, during shutdown:
/// cleanup.abort();
/// ```
pub fn spawn_cleanup_task(store: MemoryStore, every: Duration) -> JoinHandle<()> {
    let cache = store.shared();

    tokio::spawn(async move {
        info!(interval_ms = every.as_millis() as u64, "Starting TTL cleanup task");

        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let (removed, remaining) = {
                let mut guard = cache.write().await;
                let removed = guard.cleanup_expired();
                (removed, guard.len())
            };

            if removed > 0 {
                info!(removed, remaining, "TTL cleanup removed expired entries");
            } else {
                debug!(remaining, "TTL cleanup found nothing to remove");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{KeyValueStore, StoredEntry};
    use serde_json::json;

    #[tokio::test]
    async fn test_cleanup_task_removes_expired_entries() {
        let store = MemoryStore::new(100, 300);
        store
            .set("expire_soon", StoredEntry::new(json!("value")), 1)
            .await
            .unwrap();

        let handle = spawn_cleanup_task(store.clone(), Duration::from_millis(200));
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert!(store.shared().read().await.is_empty());
        assert!(store.stats().await.expirations >= 1);
        handle.abort();
    }

    #[tokio::test]
    async fn test_cleanup_task_preserves_valid_entries() {
        let store = MemoryStore::new(100, 300);
        store
            .set("long_lived", StoredEntry::new(json!({"n": 1})), 3600)
            .await
            .unwrap();

        let handle = spawn_cleanup_task(store.clone(), Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(350)).await;

        let entry = store.get("long_lived").await.unwrap();
        assert_eq!(entry.map(|e| e.value), Some(json!({"n": 1})));
        handle.abort();
    }

    #[tokio::test]
    async fn test_cleanup_task_can_be_aborted() {
        let handle = spawn_cleanup_task(MemoryStore::new(10, 60), Duration::from_secs(1));
        handle.abort();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(handle.is_finished(), "Task should be finished after abort");
    }
}
