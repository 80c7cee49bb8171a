//! Shared admin-module process state, handed to every request handler.

use std::sync::Arc;

use artstore_jwt::KeyManager;
use redis::aio::ConnectionManager;
use sqlx::PgPool;

use crate::config::AdminConfig;

/// Everything a request handler needs: the database pool, a Redis handle,
/// the JWT key manager, and static config.
#[derive(Clone)]
pub struct AppState {
    pub config: AdminConfig,
    pub pool: PgPool,
    pub redis: ConnectionManager,
    pub jwt: Arc<KeyManager>,
}
