//! Error types for the LoopHive API layer.
//!
//! Every error response is serialized as `{error, message, status, details?}`
//! with the matching HTTP status code. `error` is a stable machine-readable
//! code; `message` is for humans.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value as JsonValue};
use std::fmt;

use loophive_storage::StorageError;

pub type ApiResult<T> = Result<T, ApiError>;

// ============================================================================
// ERROR CODES
// ============================================================================

/// Machine-readable error codes carried in the `error` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    AuthenticationFailed,
    InsufficientPermissions,
    NotFound,
    ValidationError,
    BatchTooLarge,
    CannotDeleteDefault,
    InvalidMerge,
    Conflict,
    RateLimitExceeded,
    InternalError,
}

impl ErrorCode {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::AuthenticationFailed => StatusCode::UNAUTHORIZED,
            ErrorCode::InsufficientPermissions => StatusCode::FORBIDDEN,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::ValidationError
            | ErrorCode::BatchTooLarge
            | ErrorCode::CannotDeleteDefault
            | ErrorCode::InvalidMerge => StatusCode::BAD_REQUEST,
            ErrorCode::Conflict => StatusCode::CONFLICT,
            ErrorCode::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::AuthenticationFailed => "authentication_failed",
            ErrorCode::InsufficientPermissions => "insufficient_permissions",
            ErrorCode::NotFound => "not_found",
            ErrorCode::ValidationError => "validation_error",
            ErrorCode::BatchTooLarge => "batch_too_large",
            ErrorCode::CannotDeleteDefault => "cannot_delete_default",
            ErrorCode::InvalidMerge => "invalid_merge",
            ErrorCode::Conflict => "conflict",
            ErrorCode::RateLimitExceeded => "rate_limit_exceeded",
            ErrorCode::InternalError => "internal_error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// API ERROR
// ============================================================================

/// Structured API error with optional `details`.
#[derive(Debug, Clone)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<JsonValue>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: JsonValue) -> Self {
        self.details = Some(details);
        self
    }

    pub fn not_found(what: &str) -> Self {
        Self::new(ErrorCode::NotFound, format!("{what} not found"))
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::AuthenticationFailed, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InsufficientPermissions, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    pub fn rate_limited(limit: usize) -> Self {
        Self::new(
            ErrorCode::RateLimitExceeded,
            format!("Rate limit of {limit} requests/second exceeded"),
        )
        .with_details(json!({"retry_after_seconds": 1}))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn body(&self) -> JsonValue {
        let mut body = json!({
            "error": self.code.as_str(),
            "message": self.message,
            "status": self.code.status_code().as_u16(),
        });
        if let Some(details) = &self.details {
            body["details"] = details.clone();
        }
        body
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.code.status_code(), Json(self.body())).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Conflict(message) => ApiError::new(ErrorCode::Conflict, message),
            other => {
                tracing::error!(error = %other, "Storage failure");
                ApiError::internal("Storage operation failed")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_body_shape() {
        let err = ApiError::not_found("Agent");
        let body = err.body();
        assert_eq!(body["error"], "not_found");
        assert_eq!(body["message"], "Agent not found");
        assert_eq!(body["status"], 404);
        assert!(body.get("details").is_none());
    }

    #[test]
    fn test_rate_limited_details() {
        let err = ApiError::rate_limited(30);
        assert_eq!(err.code.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(err.body()["details"]["retry_after_seconds"], 1);
    }

    #[test]
    fn test_conflict_maps_to_400_family() {
        let err: ApiError = StorageError::Conflict("slug taken".into()).into();
        assert_eq!(err.code, ErrorCode::Conflict);
        assert_eq!(err.code.status_code(), StatusCode::CONFLICT);
    }
}
