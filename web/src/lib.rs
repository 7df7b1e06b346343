//! # Request Relay Web
//!
//! Axum HTTP surface for the intake stage.
//!
//! ## Routes
//!
//! - `/api/submit` (any method): resolve the caller's name, enqueue the
//!   request, and answer with a greeting plus the `X-Correlation-ID` header
//! - `/health`: liveness
//!
//! ## Components
//!
//! - **[`AppError`]**: maps intake errors to HTTP responses
//! - **[`middleware`]**: request-id tracking and the `http_request` span
//! - **[`AppState`]**: the shared intake handler
//!
//! ## Example
//!
//! ```ignore
//! use request_relay_web::{AppState, router};
//!
//! let intake = Arc::new(IntakeHandler::new(transport, clock, ids, "request_open"));
//! let app = router(AppState::new(intake));
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:7071").await?;
//! axum::serve(listener, app).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{any, get},
};
use tower_http::trace::TraceLayer;

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod state;

pub use error::AppError;
pub use handlers::submit::{CORRELATION_ID_HEADER, MAX_BODY_BYTES};
pub use middleware::{REQUEST_ID_HEADER, RequestId, request_id_layer};
pub use state::AppState;

/// Result type for web handlers.
pub type WebResult<T> = Result<T, AppError>;

/// Build the intake router.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/submit", any(handlers::submit))
        .route("/health", get(handlers::health_check))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(request_id_layer())
}
