//! Shared process state, bundled the way `storage-element::state::AppState`
//! bundles its own config/WAL/cache handles.

use std::sync::Arc;

use artstore_jwt::KeyManager;
use redis::aio::ConnectionManager;

use crate::config::IngesterConfig;
use crate::topology::TopologyCache;

/// Everything a request handler needs to route an upload.
pub struct AppState {
    pub config: IngesterConfig,
    pub jwt: Arc<KeyManager>,
    pub redis: tokio::sync::Mutex<ConnectionManager>,
    pub topology: Arc<TopologyCache>,
    pub http: reqwest::Client,
}
