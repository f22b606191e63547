//! Remote Heartbeat Task
//!
//! Pings the remote cache server on a fixed interval. A failed ping marks the
//! connection errored and starts a bounded reconnect loop; once attempts are
//! exhausted the store stays on its local copy until a later ping succeeds.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::store::{ConnectionState, HttpStore};
use crate::swr::Backoff;

/// Spawns the heartbeat for `store`. Abort the handle to stop it.
pub fn spawn_heartbeat_task(
    store: Arc<HttpStore>,
    every: Duration,
    backoff: Backoff,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(url = %store.base_url(), interval_ms = every.as_millis() as u64, "Starting remote heartbeat");

        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;

            match store.ping().await {
                Ok(()) => {
                    if store.connection_state() != ConnectionState::Connected {
                        info!(url = %store.base_url(), "Remote cache reachable again");
                    }
                    store.mark_connected();
                    debug!("Heartbeat ok");
                }
                Err(e) => {
                    warn!(url = %store.base_url(), error = %e, "Heartbeat failed");
                    if store.connection_state() == ConnectionState::Disconnected {
                        continue;
                    }
                    store.mark_failed(&e);
                    reconnect(&store, backoff).await;
                }
            }
        }
    })
}

/// Retries the remote side with `backoff` until a ping succeeds or the
/// attempt budget runs out. Returns whether the store is connected.
///
/// Attempt `n` waits `backoff.delay(n + 1)`, so the default reconnect
/// backoff yields 2s, 4s, 8s, 16s, 30s.
pub async fn reconnect(store: &HttpStore, backoff: Backoff) -> bool {
    while let Some(attempt) = store.begin_reconnect() {
        let delay = backoff.delay(attempt + 1);
        info!(
            attempt,
            max_attempts = store.connection_metrics().max_reconnect_attempts,
            delay_ms = delay.as_millis() as u64,
            "Reconnecting to remote cache"
        );
        tokio::time::sleep(delay).await;

        match store.ping().await {
            Ok(()) => {
                info!(attempt, "Reconnected to remote cache");
                store.mark_connected();
                return true;
            }
            Err(e) => {
                warn!(attempt, error = %e, "Reconnect attempt failed");
                store.mark_failed(&e);
            }
        }
    }

    if store.connection_state() == ConnectionState::Connected {
        return true;
    }
    error!(url = %store.base_url(), "Max reconnection attempts reached, using local store only");
    store.mark_disconnected();
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, MAX_RECONNECT_ATTEMPTS};

    fn quick_backoff() -> Backoff {
        Backoff::new(Duration::from_millis(1), Duration::from_millis(5))
    }

    fn unreachable_store() -> HttpStore {
        HttpStore::new("http://127.0.0.1:9", MemoryStore::new(10, 60)).unwrap()
    }

    #[tokio::test]
    async fn test_reconnect_gives_up_after_max_attempts() {
        let store = unreachable_store();
        store.mark_failed(&crate::error::CacheError::Store("down".to_string()));

        assert!(!reconnect(&store, quick_backoff()).await);

        let metrics = store.connection_metrics();
        assert_eq!(metrics.state, ConnectionState::Disconnected);
        assert_eq!(metrics.reconnect_attempts, MAX_RECONNECT_ATTEMPTS);
        assert!(metrics.last_error.is_some());
    }

    #[tokio::test]
    async fn test_exhausted_store_does_not_retry_again() {
        let store = unreachable_store();
        assert!(!reconnect(&store, quick_backoff()).await);
        assert!(store.begin_reconnect().is_none());
        assert!(!reconnect(&store, quick_backoff()).await);
        assert_eq!(store.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_heartbeat_task_can_be_aborted() {
        let store = Arc::new(unreachable_store());
        let handle = spawn_heartbeat_task(store, Duration::from_secs(30), quick_backoff());
        handle.abort();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(handle.is_finished());
    }
}
