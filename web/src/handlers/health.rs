//! Health check endpoint.

use axum::http::StatusCode;

/// Liveness check.
///
/// Returns 200 OK while the process is serving. Queue reachability is not
/// checked here; a transport outage shows up as 503s from `submit`.
///
/// ```text
/// GET /health
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}
