//! Shared error type for all Redis-backed helpers.

use thiserror::Error;

/// Failure modes surfaced by the topology bus, event stream, rate limiter
/// and distributed lock helpers.
#[derive(Debug, Error)]
pub enum RedisHelperError {
    /// The underlying Redis client/command failed.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// A stored JSON payload failed to deserialize.
    #[error("malformed payload: {0}")]
    Serde(#[from] serde_json::Error),
}
