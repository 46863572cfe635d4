use serde::Serialize;
use thiserror::Error;

// Import Axum types for HTTP response conversion
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// The custom error type for the application.
#[derive(Debug, Error)]
pub enum Error {
    /// An error originating from the sqlx library.
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// An error originating from IO operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON serialization error.
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// A configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// A request validation error.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An authentication error (missing or invalid token).
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// A not found error (resource does not exist or is out of the
    /// caller's scope).
    #[error("Not found: {0}")]
    NotFound(String),

    /// A forbidden error (caller does not own the resource).
    #[error("Access forbidden: {0}")]
    Forbidden(String),

    /// A branching rule violation: the supplied parent message is missing,
    /// belongs to another conversation, or has the wrong role.
    #[error("Invalid parent message: {0}")]
    InvalidParent(String),

    /// A follow-up message was sent without pinning a parent even though
    /// the conversation already has assistant replies.
    #[error("Follow-up messages must reference a parent message")]
    ParentRequired,

    /// A file type the document decoder cannot handle.
    #[error("Unsupported file type: {0}")]
    Unsupported(String),

    /// A file exceeding the configured size cap.
    #[error("File too large: {0}")]
    TooLarge(String),

    /// A decode that produced no extractable text.
    #[error("No content: {0}")]
    NoContent(String),

    /// A per-conversation or global local-mode lock timed out.
    #[error("Busy: {0}")]
    Busy(String),

    /// An LLM or vector store failure.
    #[error("Provider error: {0}")]
    Provider(String),

    /// An internal invariant violation.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A type alias for `Result<T, Error>` to simplify function signatures.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: String,
    code: &'a str,
}

/// Log error at appropriate level based on error type.
/// Client-facing errors (4xx) are logged as warnings, server errors (5xx) as errors.
fn log_error(error: &Error, error_code: &str, status_code: u16) {
    if status_code >= 500 {
        tracing::error!(
            error_code,
            error = %error,
            status_code,
            "Error returned to client"
        );
    } else {
        tracing::warn!(
            error_code,
            error = %error,
            status_code,
            "Error returned to client"
        );
    }
}

/// Convert custom Error to HTTP response
///
/// Each error variant maps to an HTTP status code and a JSON body with an
/// error message and a stable error code.
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let code = self.error_code();
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        log_error(&self, code, self.status_code());

        // Internal detail stays out of client-facing bodies.
        let message = match &self {
            Error::Sqlx(_) => "Database error".to_string(),
            Error::Io(_) => "IO error".to_string(),
            Error::Config(_) => "Configuration error".to_string(),
            other => other.to_string(),
        };

        let body = ErrorBody {
            error: message,
            code,
        };
        (status, Json(body)).into_response()
    }
}

impl Error {
    /// Helper method to get the HTTP status code for an error
    fn status_code(&self) -> u16 {
        match self {
            Error::Validation(_)
            | Error::InvalidParent(_)
            | Error::ParentRequired
            | Error::NoContent(_)
            | Error::Json(_) => 400,
            Error::Authentication(_) => 401,
            Error::Forbidden(_) => 403,
            Error::NotFound(_) => 404,
            Error::TooLarge(_) => 413,
            Error::Unsupported(_) => 415,
            Error::Busy(_) => 503,
            _ => 500,
        }
    }

    /// Helper method to get the error code for logging
    fn error_code(&self) -> &'static str {
        match self {
            Error::Sqlx(_) => "INTERNAL_ERROR",
            Error::Io(_) => "INTERNAL_ERROR",
            Error::Json(_) => "JSON_ERROR",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::Authentication(_) => "AUTHENTICATION_FAILED",
            Error::NotFound(_) => "NOT_FOUND",
            Error::Forbidden(_) => "FORBIDDEN",
            Error::InvalidParent(_) => "INVALID_PARENT",
            Error::ParentRequired => "PARENT_REQUIRED",
            Error::Unsupported(_) => "UNSUPPORTED_FILE_TYPE",
            Error::TooLarge(_) => "FILE_TOO_LARGE",
            Error::NoContent(_) => "NO_CONTENT",
            Error::Busy(_) => "BUSY",
            Error::Provider(_) => "PROVIDER_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_for_branching_errors() {
        assert_eq!(Error::InvalidParent("x".into()).status_code(), 400);
        assert_eq!(Error::ParentRequired.status_code(), 400);
        assert_eq!(Error::Busy("x".into()).status_code(), 503);
        assert_eq!(Error::TooLarge("x".into()).status_code(), 413);
        assert_eq!(Error::Unsupported("pdf".into()).status_code(), 415);
        assert_eq!(Error::Provider("x".into()).status_code(), 500);
    }

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(Error::ParentRequired.error_code(), "PARENT_REQUIRED");
        assert_eq!(Error::Busy("x".into()).error_code(), "BUSY");
        assert_eq!(Error::NoContent("x".into()).error_code(), "NO_CONTENT");
    }
}
