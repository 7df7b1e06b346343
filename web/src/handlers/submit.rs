//! The intake endpoint.

use crate::WebResult;
use crate::middleware::RequestId;
use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::{Query, State, rejection::BytesRejection},
    response::{IntoResponse, Response},
};
use request_relay_core::NameSource;

/// Response header carrying the correlation id assigned at intake.
pub const CORRELATION_ID_HEADER: &str = "X-Correlation-ID";

/// Largest request body read when looking for a `name` field.
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Query string as raw key/value pairs, in order.
type QueryPairs = Query<Vec<(String, String)>>;

/// Accept a request and enqueue it for processing.
///
/// Any HTTP method is accepted. The name comes from the first `name` query
/// parameter, or from the `name` field of a JSON body. Caller input that
/// cannot be read (an undecodable query string, a body over
/// [`MAX_BODY_BYTES`], a body that is not JSON) is treated as carrying no
/// name.
///
/// ```text
/// GET  /api/submit?name=Ada
/// POST /api/submit        {"name": "Ada"}
/// ```
///
/// # Responses
///
/// - 200 with the greeting as `text/plain` and the correlation id in
///   `X-Correlation-ID`, once the request is durably queued
/// - 422 if the request is too large to queue
/// - 503 if the queue is unavailable
///
/// # Errors
///
/// Returns [`AppError`](crate::AppError) when the intake rejects or cannot enqueue the request.
pub async fn submit(
    State(state): State<AppState>,
    request_id: RequestId,
    query: Option<QueryPairs>,
    body: Result<Bytes, BytesRejection>,
) -> WebResult<Response> {
    let query_name = query.and_then(|Query(pairs)| first_name(pairs));
    let body = body.unwrap_or_else(|rejection| {
        tracing::debug!(request_id = %request_id, error = %rejection, "Ignoring unreadable body");
        Bytes::new()
    });

    let source = NameSource::resolve(query_name.as_deref(), &body);
    tracing::debug!(request_id = %request_id, source = ?source, "Resolved name");

    let ack = state.intake().submit(source).await?;

    Ok((
        [(CORRELATION_ID_HEADER, ack.correlation_id.to_string())],
        ack.message,
    )
        .into_response())
}

fn first_name(pairs: Vec<(String, String)>) -> Option<String> {
    pairs
        .into_iter()
        .find_map(|(key, value)| (key == "name").then_some(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(raw: &[(&str, &str)]) -> Vec<(String, String)> {
        raw.iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn first_name_wins_over_repeats() {
        let query = pairs(&[("name", "Ada"), ("name", "Grace")]);
        assert_eq!(first_name(query), Some("Ada".to_string()));
    }

    #[test]
    fn other_keys_are_ignored() {
        let query = pairs(&[("code", "abc"), ("name", "Ada")]);
        assert_eq!(first_name(query), Some("Ada".to_string()));
        assert_eq!(first_name(pairs(&[("names", "Ada")])), None);
    }
}
