//! Admin-module error enum, mapped onto the shared [`ErrorEnvelope`].

use artstore_common::error::ErrorEnvelope;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Everything that can go wrong serving an admin-module request.
#[derive(Debug, Error)]
pub enum AdminError {
    /// Missing, malformed or expired bearer token.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated, but role forbids the operation, or account locked out.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Malformed request body or path parameter.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Entity not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Unique constraint or other conflicting state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Database or Redis hiccup expected to be transient.
    #[error("transient failure: {0}")]
    Transient(String),

    /// On-disk or in-DB state violates an invariant the service could not repair.
    #[error("invariant violation: {0}")]
    Invariant(String),
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let envelope = match self {
            AdminError::Unauthorized(msg) => ErrorEnvelope::auth("unauthorized", msg),
            AdminError::Forbidden(msg) => ErrorEnvelope::forbidden("forbidden", msg),
            AdminError::Validation(msg) => ErrorEnvelope::validation("validation_failed", msg),
            AdminError::NotFound(msg) => ErrorEnvelope::not_found("not_found", msg),
            AdminError::Conflict(msg) => ErrorEnvelope::validation("conflict", msg),
            AdminError::Transient(msg) => ErrorEnvelope::unavailable("transient_error", msg),
            AdminError::Invariant(msg) => ErrorEnvelope::internal(msg),
        };
        envelope.into_response()
    }
}

impl From<sqlx::Error> for AdminError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => AdminError::NotFound("no matching row".into()),
            other => AdminError::Transient(other.to_string()),
        }
    }
}

impl From<artstore_redis::RedisHelperError> for AdminError {
    fn from(e: artstore_redis::RedisHelperError) -> Self {
        AdminError::Transient(e.to_string())
    }
}

impl From<bcrypt::BcryptError> for AdminError {
    fn from(e: bcrypt::BcryptError) -> Self {
        AdminError::Invariant(e.to_string())
    }
}
