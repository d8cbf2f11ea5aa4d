//! API module for pharmstream
//!
//! The operational HTTP surface of one instance: the liveness endpoint the
//! peer's health monitor probes, role introspection, the internal endpoint
//! that receives forwarded messages, and the operator stand-down signal.

pub mod health;
pub mod internal;
pub mod server;

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Config;
use crate::db::DbPool;
use crate::failover::{RoleController, RoleState};
use crate::router::MessageRouter;

pub use server::{create_router, create_server, shutdown_signal};

/// Shared state of the HTTP surface
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: DbPool,
    pub role: Arc<RoleController>,
    pub router: Arc<MessageRouter>,
}

/// Liveness response consumed by the peer's health monitor
///
/// `success` is the flag the probe checks; `services` is informational.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct HealthResponse {
    /// Whether this instance considers itself alive
    pub success: bool,

    /// Role identifier of this instance
    pub container: String,

    /// Per-service status labels
    pub services: HashMap<String, String>,

    /// Current timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Role introspection response
#[derive(Debug, serde::Serialize)]
pub struct RoleResponse {
    /// Role identifier of this instance
    pub container: String,

    /// Current role state
    pub state: RoleState,

    /// Whether this instance is consuming messages
    pub consuming: bool,

    /// Number of message ids in the dedup cache
    pub dedup_cache_size: usize,
}
