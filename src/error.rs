//! Error types for the cache controller, stores and server
//!
//! Provides unified error handling using thiserror, plus classification of
//! fetch failures into recoverable and non-recoverable kinds.

use std::fmt;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the crate.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Key not found in cache
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Key has expired
    #[error("Key expired: {0}")]
    Expired(String),

    /// Invalid request data or subscription options
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Cache is full and eviction failed
    #[error("Cache full: {0}")]
    CacheFull(String),

    /// The keyed store could not be reached or returned garbage
    #[error("Store error: {0}")]
    Store(String),

    /// The fetch function failed and retries are exhausted
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// The subscription was cancelled before the operation completed
    #[error("Subscription cancelled: {0}")]
    Cancelled(String),

    /// A fetch settled after a newer local change or invalidation, so its
    /// result was dropped and there is no applied value to return
    #[error("Fetch result discarded: {0}")]
    Superseded(String),

    /// The subscription was created with `enabled = false`
    #[error("Subscription disabled: {0}")]
    Disabled(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::NotFound(_) | CacheError::Expired(_) => StatusCode::NOT_FOUND,
            CacheError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            CacheError::CacheFull(_) => StatusCode::SERVICE_UNAVAILABLE,
            CacheError::Store(_) | CacheError::Fetch(_) => StatusCode::BAD_GATEWAY,
            CacheError::Cancelled(_) | CacheError::Superseded(_) | CacheError::Disabled(_) => {
                StatusCode::CONFLICT
            }
            CacheError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the crate.
pub type Result<T> = std::result::Result<T, CacheError>;

// == Error Kind ==
/// Category of a fetch failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Connectivity problem (refused, reset, timeout)
    Network,
    /// Backend asked us to slow down
    RateLimited,
    /// Credentials missing or expired
    Authentication,
    /// Authenticated but not allowed
    Permission,
    /// The resource does not exist upstream
    NotFound,
    /// Backend or database failure
    Server,
    /// The request payload was rejected
    Validation,
    /// The fetch was abandoned by its caller
    Cancelled,
    /// Anything we could not classify
    Unknown,
}

impl ErrorKind {
    /// Stable lowercase name, used in logs and JSON.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Authentication => "authentication",
            ErrorKind::Permission => "permission",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Server => "server",
            ErrorKind::Validation => "validation",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message fragments per kind, checked in order after status codes.
const MESSAGE_PATTERNS: &[(ErrorKind, &[&str])] = &[
    (
        ErrorKind::Authentication,
        &[
            "jwt expired",
            "invalid_grant",
            "invalid login credentials",
            "email not confirmed",
        ],
    ),
    (
        ErrorKind::Network,
        &[
            "networkerror",
            "failed to fetch",
            "err_network",
            "econnrefused",
            "enotfound",
            "connection reset",
            "timed out",
            "timeout",
        ],
    ),
    (
        ErrorKind::RateLimited,
        &["rate limit", "too many requests", "quota exceeded"],
    ),
    (
        ErrorKind::Server,
        &[
            "deadlock detected",
            "violates foreign key constraint",
            "violates unique constraint",
            "internal server error",
        ],
    ),
    (
        ErrorKind::Permission,
        &[
            "permission denied",
            "access denied",
            "forbidden",
            "unauthorized",
            "insufficient privileges",
            "rls policy",
        ],
    ),
    (
        ErrorKind::Validation,
        &[
            "invalid input syntax",
            "value too long",
            "violates not-null constraint",
            "invalid format",
            "malformed",
        ],
    ),
    (ErrorKind::NotFound, &["not found", "no rows found"]),
];

// == Fetch Error ==
/// Failure reported by a fetch function.
///
/// Cloneable so that one failed flight can be handed to every subscription
/// waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} error: {message}")]
pub struct FetchError {
    /// Classified category
    pub kind: ErrorKind,
    /// Human-readable description
    pub message: String,
    /// Upstream status code, when the failure came from an HTTP-like backend
    pub status: Option<u16>,
}

impl FetchError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }

    /// The fetch was abandoned because its subscription went away.
    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "fetch cancelled")
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    /// Classifies a failure from its status code and message.
    ///
    /// Status codes win over message patterns; unmatched failures are
    /// `Unknown`.
    pub fn classify(status: Option<u16>, message: impl Into<String>) -> Self {
        let message = message.into();
        let kind = status
            .and_then(kind_for_status)
            .unwrap_or_else(|| kind_for_message(&message));

        Self {
            kind,
            message,
            status,
        }
    }

    /// Shorthand for `classify(None, message)`.
    pub fn from_message(message: impl Into<String>) -> Self {
        Self::classify(None, message)
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }

    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Network | ErrorKind::RateLimited | ErrorKind::Server | ErrorKind::Unknown
        )
    }
}

fn kind_for_status(status: u16) -> Option<ErrorKind> {
    match status {
        401 => Some(ErrorKind::Authentication),
        403 => Some(ErrorKind::Permission),
        404 => Some(ErrorKind::NotFound),
        408 => Some(ErrorKind::Network),
        429 => Some(ErrorKind::RateLimited),
        400 | 422 => Some(ErrorKind::Validation),
        s if s >= 500 => Some(ErrorKind::Server),
        _ => None,
    }
}

fn kind_for_message(message: &str) -> ErrorKind {
    let lowered = message.to_lowercase();
    MESSAGE_PATTERNS
        .iter()
        .find(|(_, patterns)| patterns.iter().any(|p| lowered.contains(p)))
        .map(|(kind, _)| *kind)
        .unwrap_or(ErrorKind::Unknown)
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        let status = err.status().map(|s| s.as_u16());
        if err.is_timeout() || err.is_connect() {
            return Self {
                kind: ErrorKind::Network,
                message: err.to_string(),
                status,
            };
        }
        Self::classify(status, err.to_string())
    }
}
