//! Remote Store Module
//!
//! HTTP client for a remote cache server. Every write is mirrored into a
//! local [`MemoryStore`], and reads fall back to it whenever the remote side
//! fails, so callers never see an unreachable server.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reqwest::{Client, StatusCode, Url};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{CacheError, Result};
use crate::models::{GetResponse, PatternDeleteResponse, SetRequest};
use crate::store::{KeyValueStore, MemoryStore, StoreHealth, StoredEntry};

/// Per-request timeout for remote calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Reconnect attempts before the remote side is given up on.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

// == Connection State ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Snapshot of the remote connection.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionMetrics {
    pub state: ConnectionState,
    pub reconnect_attempts: u32,
    pub max_reconnect_attempts: u32,
    pub last_error: Option<String>,
    pub connected_since: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct Connection {
    state: ConnectionState,
    reconnect_attempts: u32,
    last_error: Option<String>,
    connected_since: Option<DateTime<Utc>>,
}

// == HTTP Store ==
/// Keyed store backed by a remote cache server with a local mirror.
#[derive(Debug)]
pub struct HttpStore {
    client: Client,
    base_url: Url,
    local: MemoryStore,
    connection: Mutex<Connection>,
}

impl HttpStore {
    /// Creates a client for the server at `base_url`. No request is made
    /// until [`connect`](Self::connect) or the first store operation.
    pub fn new(base_url: &str, local: MemoryStore) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| CacheError::InvalidRequest(format!("Invalid remote cache URL: {}", e)))?;
        if base_url.cannot_be_a_base() {
            return Err(CacheError::InvalidRequest(format!(
                "Remote cache URL cannot be a base: {}",
                base_url
            )));
        }

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(store_error)?;

        Ok(Self {
            client,
            base_url,
            local,
            connection: Mutex::new(Connection {
                state: ConnectionState::Connecting,
                reconnect_attempts: 0,
                last_error: None,
                connected_since: None,
            }),
        })
    }

    /// Probes the server once and records the outcome.
    pub async fn connect(&self) -> ConnectionState {
        match self.ping().await {
            Ok(()) => {
                info!(url = %self.base_url, "Connected to remote cache");
                self.mark_connected();
            }
            Err(e) => {
                warn!(url = %self.base_url, error = %e, "Remote cache unreachable, using local store");
                self.mark_failed(&e);
            }
        }
        self.connection_state()
    }

    /// Calls the server's health endpoint.
    pub async fn ping(&self) -> Result<()> {
        let response = self
            .client
            .get(self.endpoint(&["health"])?)
            .send()
            .await
            .map_err(store_error)?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(CacheError::Store(format!(
                "health check returned {}",
                response.status()
            )))
        }
    }

    pub fn local(&self) -> &MemoryStore {
        &self.local
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.lock().state
    }

    pub fn connection_metrics(&self) -> ConnectionMetrics {
        let conn = self.connection.lock();
        ConnectionMetrics {
            state: conn.state,
            reconnect_attempts: conn.reconnect_attempts,
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            last_error: conn.last_error.clone(),
            connected_since: conn.connected_since,
        }
    }

    pub fn mark_connected(&self) {
        let mut conn = self.connection.lock();
        if conn.state != ConnectionState::Connected {
            conn.connected_since = Some(Utc::now());
        }
        conn.state = ConnectionState::Connected;
        conn.reconnect_attempts = 0;
        conn.last_error = None;
    }

    pub fn mark_failed(&self, error: &CacheError) {
        let mut conn = self.connection.lock();
        conn.state = ConnectionState::Error;
        conn.last_error = Some(error.to_string());
        conn.connected_since = None;
    }

    /// Moves to `Reconnecting` and returns the attempt number, or `None`
    /// when a reconnect is already running or attempts are exhausted.
    pub fn begin_reconnect(&self) -> Option<u32> {
        let mut conn = self.connection.lock();
        if conn.state == ConnectionState::Reconnecting
            || conn.reconnect_attempts >= MAX_RECONNECT_ATTEMPTS
        {
            return None;
        }
        conn.state = ConnectionState::Reconnecting;
        conn.reconnect_attempts += 1;
        Some(conn.reconnect_attempts)
    }

    /// Gives up on the remote side until a heartbeat succeeds again.
    pub fn mark_disconnected(&self) {
        let mut conn = self.connection.lock();
        conn.state = ConnectionState::Disconnected;
        conn.connected_since = None;
    }

    /// Whether remote calls are worth attempting.
    fn remote_enabled(&self) -> bool {
        !matches!(
            self.connection_state(),
            ConnectionState::Disconnected | ConnectionState::Reconnecting
        )
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| CacheError::Internal(format!("bad base URL {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn note_remote_failure(&self, op: &str, key: &str, error: &CacheError) {
        warn!(op, key, error = %error, "Remote cache call failed, using local store");
        if self.connection_state() == ConnectionState::Connected {
            self.mark_failed(error);
        }
    }

    async fn remote_get(&self, key: &str) -> Result<Option<(StoredEntry, Option<u64>)>> {
        let response = self
            .client
            .get(self.endpoint(&["get", key])?)
            .send()
            .await
            .map_err(store_error)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: GetResponse = response
            .error_for_status()
            .map_err(store_error)?
            .json()
            .await
            .map_err(store_error)?;

        Ok(Some((
            StoredEntry::at(body.value, body.timestamp),
            body.ttl_remaining,
        )))
    }

    async fn remote_set(&self, key: &str, entry: &StoredEntry, ttl_secs: u64) -> Result<()> {
        let request = SetRequest {
            key: key.to_string(),
            value: entry.value.clone(),
            ttl: Some(ttl_secs),
            timestamp: Some(entry.timestamp),
        };
        self.client
            .put(self.endpoint(&["set"])?)
            .json(&request)
            .send()
            .await
            .map_err(store_error)?
            .error_for_status()
            .map_err(store_error)?;
        Ok(())
    }

    async fn remote_delete(&self, segments: &[&str]) -> Result<Option<reqwest::Response>> {
        let response = self
            .client
            .delete(self.endpoint(segments)?)
            .send()
            .await
            .map_err(store_error)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(response.error_for_status().map_err(store_error)?))
    }
}

fn store_error(err: impl fmt::Display) -> CacheError {
    CacheError::Store(err.to_string())
}

#[async_trait]
impl KeyValueStore for HttpStore {
    async fn get(&self, key: &str) -> Result<Option<StoredEntry>> {
        if self.remote_enabled() {
            match self.remote_get(key).await {
                Ok(Some((entry, ttl_remaining))) => {
                    let ttl = ttl_remaining.unwrap_or(0).max(1);
                    if let Err(e) = self.local.set(key, entry.clone(), ttl).await {
                        debug!(key, error = %e, "Could not mirror remote entry locally");
                    }
                    return Ok(Some(entry));
                }
                Ok(None) => {
                    // The server is authoritative: drop a mirrored copy that
                    // was deleted or evicted remotely.
                    if let Err(e) = self.local.del(key).await {
                        debug!(key, error = %e, "Could not drop local mirror");
                    }
                    return Ok(None);
                }
                Err(e) => self.note_remote_failure("get", key, &e),
            }
        }
        self.local.get(key).await
    }

    async fn set(&self, key: &str, entry: StoredEntry, ttl_secs: u64) -> Result<()> {
        if self.remote_enabled() {
            if let Err(e) = self.remote_set(key, &entry, ttl_secs).await {
                self.note_remote_failure("set", key, &e);
            }
        }
        self.local.set(key, entry, ttl_secs).await
    }

    async fn del(&self, key: &str) -> Result<bool> {
        let mut removed = false;
        if self.remote_enabled() {
            match self.remote_delete(&["del", key]).await {
                Ok(found) => removed = found.is_some(),
                Err(e) => self.note_remote_failure("del", key, &e),
            }
        }
        Ok(self.local.del(key).await? || removed)
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<usize> {
        let mut remote_count = 0;
        if self.remote_enabled() {
            match self.remote_delete(&["keys", pattern]).await {
                Ok(Some(response)) => match response.json::<PatternDeleteResponse>().await {
                    Ok(body) => remote_count = body.deleted,
                    Err(e) => self.note_remote_failure("delete_pattern", pattern, &store_error(e)),
                },
                Ok(None) => {}
                Err(e) => self.note_remote_failure("delete_pattern", pattern, &e),
            }
        }
        let local_count = self.local.delete_pattern(pattern).await?;
        Ok(remote_count.max(local_count))
    }

    async fn clear(&self) -> Result<()> {
        if self.remote_enabled() {
            if let Err(e) = self.remote_delete(&["flush"]).await {
                self.note_remote_failure("clear", "*", &e);
            }
        }
        self.local.clear().await
    }

    async fn health_check(&self) -> StoreHealth {
        match self.ping().await {
            Ok(()) => StoreHealth::healthy("remote", format!("Remote cache at {} is responding", self.base_url)),
            Err(e) => StoreHealth::healthy(
                "remote-fallback",
                format!("Remote cache unavailable ({}), serving from local store", e),
            ),
        }
    }
}
