//! Query-service error enum, mapped onto the shared [`ErrorEnvelope`].

use artstore_common::error::ErrorEnvelope;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Everything that can go wrong serving a query-service request or
/// processing a file event.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Missing, malformed or expired bearer token.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Malformed request body or query parameter.
    #[error("validation failed: {0}")]
    Validation(String),

    /// No search row (or no live storage-element mapping) for the file.
    #[error("not found: {0}")]
    NotFound(String),

    /// Database or Redis hiccup expected to be transient.
    #[error("transient failure: {0}")]
    Transient(String),
}

impl IntoResponse for QueryError {
    fn into_response(self) -> Response {
        let envelope = match self {
            QueryError::Unauthorized(msg) => ErrorEnvelope::auth("unauthorized", msg),
            QueryError::Validation(msg) => ErrorEnvelope::validation("validation_failed", msg),
            QueryError::NotFound(msg) => ErrorEnvelope::not_found("not_found", msg),
            QueryError::Transient(msg) => ErrorEnvelope::unavailable("transient_error", msg),
        };
        envelope.into_response()
    }
}

impl From<sqlx::Error> for QueryError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => QueryError::NotFound("no matching row".into()),
            other => QueryError::Transient(other.to_string()),
        }
    }
}

impl From<artstore_redis::RedisHelperError> for QueryError {
    fn from(e: artstore_redis::RedisHelperError) -> Self {
        QueryError::Transient(e.to_string())
    }
}

