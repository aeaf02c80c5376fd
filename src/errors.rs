//! Application error model with MCP and HTTP error mapping
//!
//! Defines a typed error hierarchy using `thiserror` for internal error handling,
//! and maps each variant to the appropriate MCP `ErrorData` type and HTTP status
//! so both surfaces report failures consistently.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use rmcp::model::ErrorData;
use serde_json::json;
use thiserror::Error;

/// Application error type
///
/// Covers every failure the digest service can surface to a caller. Problems
/// with a single message are not errors; they are reported as skips by the
/// window fetcher.
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid user input (malformed time window, bad address, missing field)
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Missing or wrong API key on the HTTP surface
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Operation disabled by configuration (sending, summarization)
    #[error("disabled: {0}")]
    Disabled(String),
    /// IMAP or SMTP authentication failure
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    /// Mailbox session failure (connect, select, search)
    #[error("mailbox session error: {0}")]
    Session(String),
    /// Operation timeout (TCP connect, TLS handshake, IMAP response)
    #[error("operation timed out: {0}")]
    Timeout(String),
    /// Summarization collaborator failed or was unreachable
    #[error("summarization failed: {0}")]
    Summary(String),
    /// SMTP submission failed
    #[error("send failed: {0}")]
    Send(String),
    /// Internal error (unexpected failure, external crate error)
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Convenience constructor for `InvalidInput`
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Stable machine-readable code for clients
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::Unauthorized(_) => "unauthorized",
            Self::Disabled(_) => "disabled",
            Self::AuthFailed(_) => "auth_failed",
            Self::Session(_) => "session_error",
            Self::Timeout(_) => "timeout",
            Self::Summary(_) => "summary_error",
            Self::Send(_) => "send_error",
            Self::Internal(_) => "internal",
        }
    }

    /// Convert to MCP `ErrorData`
    ///
    /// # Mappings
    ///
    /// - `InvalidInput` → `invalid_params`
    /// - `Unauthorized`, `Disabled`, `AuthFailed` → `invalid_request`
    /// - everything else → `internal_error`
    pub fn to_error_data(&self) -> ErrorData {
        let data = Some(json!({ "code": self.code() }));
        let msg = self.to_string();
        match self {
            Self::InvalidInput(_) => ErrorData::invalid_params(msg, data),
            Self::Unauthorized(_) | Self::Disabled(_) | Self::AuthFailed(_) => {
                ErrorData::invalid_request(msg, data)
            }
            Self::Session(_)
            | Self::Timeout(_)
            | Self::Summary(_)
            | Self::Send(_)
            | Self::Internal(_) => ErrorData::internal_error(msg, data),
        }
    }

    /// HTTP status used by the REST surface
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Disabled(_) => StatusCode::FORBIDDEN,
            Self::AuthFailed(_) | Self::Session(_) | Self::Summary(_) | Self::Send(_) => {
                StatusCode::BAD_GATEWAY
            }
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = json!({ "error": self.to_string(), "code": self.code() });
        (self.status_code(), Json(body)).into_response()
    }
}

/// Type alias for fallible return values
///
/// Use this for all internal functions that can fail. Provides a consistent
/// error type throughout the codebase.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use super::AppError;

    #[test]
    fn input_errors_are_client_errors() {
        let err = AppError::invalid("bad window");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), "invalid_input");
        assert_eq!(err.to_string(), "invalid input: bad window");
    }

    #[test]
    fn upstream_failures_map_to_gateway_statuses() {
        assert_eq!(
            AppError::Session("select failed".to_owned()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            AppError::Timeout("UID SEARCH timed out".to_owned()).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            AppError::Summary("503".to_owned()).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }
}
