//! The error envelope common to all four services' HTTP surfaces.
//!
//! Each service defines its own `thiserror` enum for its internal error
//! variants; at the HTTP boundary every variant is mapped to one of the
//! five categories below (spec §7) and rendered as this envelope.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// The five error categories from the error-handling design.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Missing/invalid/expired JWT, wrong role.
    Auth,
    /// Bad enum, oversized attr.json, invalid range, forbidden transition.
    Validation,
    /// Storage element or storage full, file too large for critical.
    Capacity,
    /// Redis blip, downstream 5xx, filesystem interruption.
    Transient,
    /// Cache/attr drift, non-terminal WAL entry found on restart.
    Invariant,
}

/// A machine-coded error body: `{code, message}`.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    /// Stable machine code, e.g. `"jwt_expired"`, `"mode_forbids_delete"`.
    pub code: String,
    /// Human-readable detail.
    pub message: String,
    #[serde(skip)]
    status: StatusCode,
}

impl ErrorEnvelope {
    /// Build an envelope for a given category, status, code and message.
    pub fn new(
        _category: ErrorCategory,
        status: StatusCode,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            status,
        }
    }

    /// 401 Unauthorized.
    pub fn auth(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Auth, StatusCode::UNAUTHORIZED, code, message)
    }

    /// 403 Forbidden.
    pub fn forbidden(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Auth, StatusCode::FORBIDDEN, code, message)
    }

    /// 400 Bad Request.
    pub fn validation(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Validation, StatusCode::BAD_REQUEST, code, message)
    }

    /// 422 Unprocessable Entity.
    pub fn unprocessable(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            ErrorCategory::Validation,
            StatusCode::UNPROCESSABLE_ENTITY,
            code,
            message,
        )
    }

    /// 416 Range Not Satisfiable.
    pub fn range_not_satisfiable(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCategory::Validation,
            StatusCode::RANGE_NOT_SATISFIABLE,
            "range_not_satisfiable",
            message,
        )
    }

    /// 507 Insufficient Storage.
    pub fn insufficient_storage(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCategory::Capacity,
            StatusCode::INSUFFICIENT_STORAGE,
            "insufficient_storage",
            message,
        )
    }

    /// 429 Too Many Requests.
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCategory::Capacity,
            StatusCode::TOO_MANY_REQUESTS,
            "rate_limited",
            message,
        )
    }

    /// 503 Service Unavailable.
    pub fn unavailable(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Transient, StatusCode::SERVICE_UNAVAILABLE, code, message)
    }

    /// 500 Internal Server Error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCategory::Transient,
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            message,
        )
    }

    /// 404 Not Found.
    pub fn not_found(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Validation, StatusCode::NOT_FOUND, code, message)
    }
}

impl IntoResponse for ErrorEnvelope {
    fn into_response(self) -> Response {
        let status = self.status;
        (status, Json(self)).into_response()
    }
}
