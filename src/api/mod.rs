//! API Module
//!
//! HTTP handlers and routing for the cache server REST API. The same API is
//! what [`HttpStore`](crate::store::HttpStore) talks to.

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
