//! Unified API error handling with structured `{error}` responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error};

use crate::session::SessionError;

/// API error type with structured responses.
#[derive(Debug, Error)]
pub enum ApiError {
    /// A lifecycle operation failed; reported uniformly as 400 with the
    /// domain error message, matching the session API's wire contract.
    #[error("{0}")]
    BadRequest(String),

    /// The proxy could not resolve a path segment to a running session.
    #[error("{0}")]
    NotFound(String),

    /// The backend was resolved but the forward failed.
    #[error("{0}")]
    BadGateway(String),
}

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_gateway(msg: impl Into<String>) -> Self {
        Self::BadGateway(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadGateway(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        Self::BadRequest(err.to_string())
    }
}

/// Structured error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.to_string();

        match &self {
            ApiError::BadGateway(msg) => {
                error!(message = %msg, "proxy upstream error");
            }
            _ => {
                debug!(message = %message, "client error");
            }
        }

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_errors_map_to_bad_request() {
        let err: ApiError = SessionError::NotRunning("s1".to_string()).into();
        assert!(matches!(err, ApiError::BadRequest(_)));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn status_codes_match_variants() {
        assert_eq!(
            ApiError::not_found("x").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::bad_gateway("x").status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn error_body_carries_the_message() {
        let err: ApiError = SessionError::NotFound("s1".to_string()).into();
        assert_eq!(err.to_string(), "session \"s1\" not found");
    }
}
