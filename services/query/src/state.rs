//! Shared HTTP-handler state for the query service.

use artstore_jwt::KeyManager;
use sqlx::PgPool;

pub struct AppState {
    pub pool: PgPool,
    pub jwt: std::sync::Arc<KeyManager>,
}
