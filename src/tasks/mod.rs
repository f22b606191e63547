//! Background Tasks Module
//!
//! Periodic work that runs alongside the server or a controller.
//!
//! # Tasks
//! - TTL Cleanup: purges expired entries from the in-memory store
//! - Heartbeat: pings the remote cache and drives reconnects

mod cleanup;
mod heartbeat;

pub use cleanup::spawn_cleanup_task;
pub use heartbeat::{reconnect, spawn_heartbeat_task};
