//! API Handlers
//!
//! HTTP request handlers exposing the in-memory store to remote clients.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::{CacheError, Result};
use crate::models::{
    DeleteResponse, FlushResponse, GetResponse, HealthResponse, PatternDeleteResponse, SetRequest,
    SetResponse, StatsResponse,
};
use crate::store::{glob_to_regex, MemoryCache, MemoryStore, StoredEntry};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Shared store engine
    pub cache: Arc<RwLock<MemoryCache>>,
}

impl AppState {
    pub fn new(store: &MemoryStore) -> Self {
        Self {
            cache: store.shared(),
        }
    }
}

/// Handler for PUT /set
pub async fn set_handler(
    State(state): State<AppState>,
    Json(req): Json<SetRequest>,
) -> Result<Json<SetResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let entry = StoredEntry::at(req.value, req.timestamp.unwrap_or_else(Utc::now));
    state.cache.write().await.set(req.key.clone(), entry, req.ttl)?;

    Ok(Json(SetResponse::new(req.key)))
}

/// Handler for GET /get/:key
pub async fn get_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<GetResponse>> {
    // Write lock: a read touches LRU order and stats.
    let found = state.cache.write().await.get(&key)?;

    Ok(Json(GetResponse {
        key,
        ttl_remaining: found.ttl_remaining(),
        value: found.entry.value,
        timestamp: found.entry.timestamp,
    }))
}

/// Handler for DELETE /del/:key
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<DeleteResponse>> {
    state.cache.write().await.delete(&key)?;

    Ok(Json(DeleteResponse::new(key)))
}

/// Handler for DELETE /keys/:pattern
pub async fn delete_pattern_handler(
    State(state): State<AppState>,
    Path(pattern): Path<String>,
) -> Result<Json<PatternDeleteResponse>> {
    let re = glob_to_regex(&pattern)?;
    let deleted = state.cache.write().await.delete_matching(&re);

    Ok(Json(PatternDeleteResponse { pattern, deleted }))
}

/// Handler for DELETE /flush
pub async fn flush_handler(State(state): State<AppState>) -> Json<FlushResponse> {
    state.cache.write().await.clear();

    Json(FlushResponse {
        message: "Cache flushed".to_string(),
    })
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    let stats = state.cache.read().await.stats();
    Json(StatsResponse::from(stats))
}

/// Handler for GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}
