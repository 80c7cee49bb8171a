//! Ingester error enum, mapped 1:1 onto the shared [`ErrorEnvelope`]
//! (spec §7 error-category table).

use artstore_common::error::ErrorEnvelope;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Everything that can go wrong routing an upload through the ingester.
#[derive(Debug, Error)]
pub enum IngesterError {
    /// Missing, malformed or expired bearer token.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated, but the caller has exceeded its rate limit.
    #[error("rate limited: {0}")]
    RateLimited(String, u64),

    /// Malformed multipart body or missing required field.
    #[error("validation failed: {0}")]
    Validation(String),

    /// No eligible storage-element could admit the upload.
    #[error("insufficient storage: {0}")]
    Capacity(String),

    /// Topology not yet hydrated, Redis blip, or the chosen storage-element
    /// returned a 5xx / connection error after streaming had begun.
    #[error("transient failure: {0}")]
    Transient(String),
}

impl IntoResponse for IngesterError {
    fn into_response(self) -> Response {
        if let IngesterError::RateLimited(msg, retry_after) = self {
            return (
                [("Retry-After", retry_after.to_string())],
                ErrorEnvelope::rate_limited(msg),
            )
                .into_response();
        }

        let envelope = match self {
            IngesterError::Unauthorized(msg) => ErrorEnvelope::auth("unauthorized", msg),
            IngesterError::Validation(msg) => ErrorEnvelope::validation("validation_failed", msg),
            IngesterError::Capacity(msg) => ErrorEnvelope::insufficient_storage(msg),
            IngesterError::Transient(msg) => ErrorEnvelope::unavailable("transient_error", msg),
            IngesterError::RateLimited(..) => unreachable!(),
        };
        envelope.into_response()
    }
}

impl From<artstore_redis::RedisHelperError> for IngesterError {
    fn from(e: artstore_redis::RedisHelperError) -> Self {
        IngesterError::Transient(e.to_string())
    }
}

impl From<reqwest::Error> for IngesterError {
    fn from(e: reqwest::Error) -> Self {
        IngesterError::Transient(e.to_string())
    }
}
