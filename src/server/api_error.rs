//! Standardized API error responses.
//!
//! Every endpoint reports failures with the same JSON shape:
//!
//! ```json
//! {
//!   "error": {
//!     "code": "INVALID_REQUEST",
//!     "message": "Request payload is invalid",
//!     "details": { "errors": [{ "field": "valid_to", "message": "..." }] }
//!   }
//! }
//! ```
//!
//! The `details` field is optional.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::errors::RtoError;

/// Machine-readable error codes. These are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // === Validation Errors (400) ===
    /// One or more fields failed validation
    InvalidRequest,
    /// Unknown document kind in the path
    UnknownKind,

    // === Authentication Errors (401/403) ===
    /// No session cookie or bearer token
    Unauthorized,
    /// Wrong username or password
    InvalidCredentials,
    /// Session token is invalid or expired
    InvalidToken,
    /// Caller is not allowed to perform the operation
    Forbidden,

    // === Resource Errors (404/409) ===
    NotFound,
    /// Operation conflicts with existing data
    Conflict,

    // === Server Errors (5xx) ===
    DatabaseError,
    ConfigError,
    InternalError,
}

impl ErrorCode {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidRequest | ErrorCode::UnknownKind => StatusCode::BAD_REQUEST,

            ErrorCode::Unauthorized | ErrorCode::InvalidCredentials | ErrorCode::InvalidToken => {
                StatusCode::UNAUTHORIZED
            }

            ErrorCode::Forbidden => StatusCode::FORBIDDEN,

            ErrorCode::NotFound => StatusCode::NOT_FOUND,

            ErrorCode::Conflict => StatusCode::CONFLICT,

            ErrorCode::DatabaseError | ErrorCode::ConfigError | ErrorCode::InternalError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::InvalidRequest => "Request payload is invalid",
            ErrorCode::UnknownKind => "Unknown document kind",
            ErrorCode::Unauthorized => "Authentication is required",
            ErrorCode::InvalidCredentials => "Invalid username or password",
            ErrorCode::InvalidToken => "Session is invalid or has expired",
            ErrorCode::Forbidden => "You are not allowed to perform this operation",
            ErrorCode::NotFound => "The requested resource was not found",
            ErrorCode::Conflict => "Operation conflicts with existing data",
            ErrorCode::DatabaseError => "Database operation failed",
            ErrorCode::ConfigError => "Server configuration error",
            ErrorCode::InternalError => "An unexpected error occurred",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Top-level error response returned by all endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub error: ErrorBody,
}

impl ApiError {
    /// Error with the code's default message.
    pub fn new(code: ErrorCode) -> Self {
        Self {
            error: ErrorBody {
                code,
                message: code.default_message().to_string(),
                details: None,
            },
        }
    }

    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error: ErrorBody {
                code,
                message: message.into(),
                details: None,
            },
        }
    }

    pub fn with_details(
        code: ErrorCode,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            error: ErrorBody {
                code,
                message: message.into(),
                details: Some(details),
            },
        }
    }

    pub fn status_code(&self) -> StatusCode {
        self.error.code.status_code()
    }

    // === Convenience constructors ===

    pub fn not_found(resource: &str) -> Self {
        Self::with_message(ErrorCode::NotFound, format!("{resource} not found"))
    }

    pub fn unknown_kind(slug: &str) -> Self {
        Self::with_message(
            ErrorCode::UnknownKind,
            format!("unknown document kind '{slug}'"),
        )
    }

    pub fn forbidden() -> Self {
        Self::new(ErrorCode::Forbidden)
    }

    /// Database error (internal details hidden from client).
    pub fn database_error() -> Self {
        Self::new(ErrorCode::DatabaseError)
    }

    pub fn internal_error() -> Self {
        Self::new(ErrorCode::InternalError)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(self)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {}",
            self.error.code.default_message(),
            self.error.message
        )
    }
}

impl std::error::Error for ApiError {}

impl From<RtoError> for ApiError {
    fn from(err: RtoError) -> Self {
        match err {
            RtoError::InvalidInput(msg) => ApiError::with_message(ErrorCode::InvalidRequest, msg),
            RtoError::NotFound(what) => ApiError::not_found(&what),
            RtoError::Conflict(msg) => ApiError::with_message(ErrorCode::Conflict, msg),
            RtoError::AuthError(msg) => ApiError::with_message(ErrorCode::Unauthorized, msg),
            // Already logged where it happened; keep internals out of the body.
            RtoError::DatabaseError(_) => ApiError::database_error(),
            RtoError::ConfigError(msg) => ApiError::with_message(ErrorCode::ConfigError, msg),
            RtoError::ServerError(_) => ApiError::internal_error(),
        }
    }
}
