//! Custom Axum extractors.
//!
//! ```ignore
//! use request_relay_web::middleware::RequestId;
//!
//! async fn handler(request_id: RequestId) -> String {
//!     format!("Request ID: {request_id}")
//! }
//! ```

use crate::middleware::{REQUEST_ID_HEADER, RequestId};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

/// Extracts the id stored by the request-id middleware.
///
/// Without the middleware, falls back to the `X-Request-ID` header and then
/// to a fresh UUID, so handlers always have an id to log.
#[async_trait]
impl<S> FromRequestParts<S> for RequestId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(id) = parts.extensions.get::<Self>() {
            return Ok(*id);
        }

        let id = parts
            .headers
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s).ok())
            .unwrap_or_else(Uuid::new_v4);

        Ok(Self(id))
    }
}
