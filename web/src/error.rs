//! Error types for web handlers.
//!
//! [`AppError`] bridges intake errors and HTTP responses. Internal detail is
//! logged when the response is built and never sent to the caller.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use request_relay_runtime::IntakeError;
use serde::Serialize;
use std::fmt;

/// Message returned when a request could not be queued.
pub const UNAVAILABLE_MESSAGE: &str = "The request could not be queued. Please try again later.";

/// Application error type for web handlers.
///
/// # Examples
///
/// ```ignore
/// async fn handler(State(state): State<AppState>) -> Result<String, AppError> {
///     let ack = state.intake().submit(source).await?;
///     Ok(ack.message)
/// }
/// ```
#[derive(Debug)]
pub struct AppError {
    /// HTTP status code
    status: StatusCode,
    /// Error message (user-facing)
    message: String,
    /// Error code (for client error handling)
    code: &'static str,
    /// Internal error (for logging, not exposed to client)
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub const fn new(status: StatusCode, message: String, code: &'static str) -> Self {
        Self {
            status,
            message,
            code,
            source: None,
        }
    }

    /// Attach the underlying error for logging.
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// Create a 422 Unprocessable Entity error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            message.into(),
            "VALIDATION_ERROR",
        )
    }

    /// Create a 503 Service Unavailable error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            message.into(),
            "SERVICE_UNAVAILABLE",
        )
    }

    /// HTTP status this error maps to.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Error response body (JSON).
#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match (&self.source, self.status.is_server_error()) {
            (Some(source), true) => tracing::error!(
                status = %self.status,
                code = self.code,
                error = %source,
                "Request failed"
            ),
            (None, true) => tracing::error!(
                status = %self.status,
                code = self.code,
                message = %self.message,
                "Request failed"
            ),
            (Some(source), false) => tracing::warn!(
                status = %self.status,
                code = self.code,
                error = %source,
                "Request rejected"
            ),
            (None, false) => {}
        }

        let body = ErrorResponse {
            code: self.code,
            message: self.message,
        };

        (self.status, Json(body)).into_response()
    }
}

impl From<IntakeError> for AppError {
    fn from(err: IntakeError) -> Self {
        match err {
            IntakeError::EnqueueFailed(_) => {
                Self::unavailable(UNAVAILABLE_MESSAGE).with_source(anyhow::Error::new(err))
            }
            IntakeError::Rejected(_) => Self::validation("The request is too large to accept")
                .with_source(anyhow::Error::new(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use request_relay_core::{CodecError, QueueError};

    #[test]
    fn test_error_display() {
        let err = AppError::validation("Invalid input");
        assert_eq!(err.to_string(), "[VALIDATION_ERROR] Invalid input");
    }

    #[test]
    fn enqueue_failure_maps_to_service_unavailable() {
        let err = AppError::from(IntakeError::EnqueueFailed(QueueError::ConnectionFailed(
            "postgres://secret-host".to_string(),
        )));

        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.code(), "SERVICE_UNAVAILABLE");
        // Transport detail stays out of the message
        assert!(!err.to_string().contains("secret-host"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn rejected_request_maps_to_unprocessable_entity() {
        let err = AppError::from(IntakeError::Rejected(CodecError::EncodeFailed(
            "too large".to_string(),
        )));

        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }
}
