//! Storage-element error enum, mapped 1:1 onto the shared [`ErrorEnvelope`].

use artstore_common::error::ErrorEnvelope;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Everything that can go wrong serving a storage-element request.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Missing, malformed or expired bearer token.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated, but role/mode forbids the operation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Malformed request, unsupported enum value, oversized attr.json.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Range request could not be satisfied against the current file length.
    #[error("range not satisfiable: {0}")]
    RangeNotSatisfiable(String),

    /// The element's mode forbids this operation on capacity grounds.
    #[error("insufficient storage: {0}")]
    InsufficientStorage(String),

    /// File not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Filesystem, WAL or cache DB hiccup expected to be transient.
    #[error("transient failure: {0}")]
    Transient(String),

    /// On-disk state violates an invariant the service could not repair.
    #[error("invariant violation: {0}")]
    Invariant(String),
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let envelope = match self {
            ServiceError::Unauthorized(msg) => ErrorEnvelope::auth("unauthorized", msg),
            ServiceError::Forbidden(msg) => ErrorEnvelope::forbidden("forbidden", msg),
            ServiceError::Validation(msg) => ErrorEnvelope::validation("validation_failed", msg),
            ServiceError::RangeNotSatisfiable(msg) => ErrorEnvelope::range_not_satisfiable(msg),
            ServiceError::InsufficientStorage(msg) => ErrorEnvelope::insufficient_storage(msg),
            ServiceError::NotFound(msg) => ErrorEnvelope::not_found("not_found", msg),
            ServiceError::Transient(msg) => ErrorEnvelope::unavailable("transient_error", msg),
            ServiceError::Invariant(msg) => ErrorEnvelope::internal(msg),
        };
        envelope.into_response()
    }
}

impl From<artstore_wal::WalError> for ServiceError {
    fn from(e: artstore_wal::WalError) -> Self {
        ServiceError::Transient(e.to_string())
    }
}

impl From<artstore_attrfile::AttrFileError> for ServiceError {
    fn from(e: artstore_attrfile::AttrFileError) -> Self {
        ServiceError::Validation(e.to_string())
    }
}

impl From<std::io::Error> for ServiceError {
    fn from(e: std::io::Error) -> Self {
        ServiceError::Transient(e.to_string())
    }
}

impl From<rusqlite::Error> for ServiceError {
    fn from(e: rusqlite::Error) -> Self {
        ServiceError::Transient(e.to_string())
    }
}
