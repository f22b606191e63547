//! Request and Response models for the cache server API
//!
//! DTOs used both by the server handlers and by the HTTP store client.

pub mod requests;
pub mod responses;

// Re-export commonly used types
pub use requests::SetRequest;
pub use responses::{
    DeleteResponse, FlushResponse, GetResponse, HealthResponse,
    PatternDeleteResponse, SetResponse, StatsResponse,
};
