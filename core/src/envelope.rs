//! Request and result envelopes.
//!
//! A [`RequestEnvelope`] is created once by the intake stage and a
//! [`ResultEnvelope`] once per processing attempt by the processor. Both are
//! immutable after construction; the only way to "change" one is to build a
//! new envelope.
//!
//! The [`CorrelationId`] is copied verbatim from request to result so that an
//! external consumer of the result queue can join results back to callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier linking a request to its eventual result.
///
/// The relay never interprets the contents; it only copies it from the
/// request envelope into the result envelope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Wrap an identifier string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Terminal outcome recorded on a result envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    /// The request was transformed successfully
    Success,
    /// The request was understood but permanently rejected
    Failure,
}

impl Outcome {
    /// Stable lowercase name, used for metric labels and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work waiting on the `request_open` queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    correlation_id: CorrelationId,
    payload: Vec<u8>,
    submitted_at: DateTime<Utc>,
}

impl RequestEnvelope {
    /// Create a new request envelope.
    ///
    /// `payload` is the codec-encoded request body; see
    /// [`codec::encode_name`](crate::codec::encode_name).
    #[must_use]
    pub const fn new(
        correlation_id: CorrelationId,
        payload: Vec<u8>,
        submitted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            correlation_id,
            payload,
            submitted_at,
        }
    }

    /// Correlation identifier assigned at intake.
    #[must_use]
    pub const fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Encoded request payload.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// When the intake stage accepted the request.
    #[must_use]
    pub const fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }
}

/// The outcome of processing one request, published to `request_processed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    correlation_id: CorrelationId,
    result: Vec<u8>,
    processed_at: DateTime<Utc>,
    outcome: Outcome,
}

impl ResultEnvelope {
    /// Create a new result envelope.
    #[must_use]
    pub const fn new(
        correlation_id: CorrelationId,
        result: Vec<u8>,
        processed_at: DateTime<Utc>,
        outcome: Outcome,
    ) -> Self {
        Self {
            correlation_id,
            result,
            processed_at,
            outcome,
        }
    }

    /// Create a successful result envelope.
    #[must_use]
    pub const fn success(
        correlation_id: CorrelationId,
        result: Vec<u8>,
        processed_at: DateTime<Utc>,
    ) -> Self {
        Self::new(correlation_id, result, processed_at, Outcome::Success)
    }

    /// Create a failed result envelope carrying the rejection reason.
    #[must_use]
    pub fn failure(
        correlation_id: CorrelationId,
        reason: &str,
        processed_at: DateTime<Utc>,
    ) -> Self {
        Self::new(
            correlation_id,
            reason.as_bytes().to_vec(),
            processed_at,
            Outcome::Failure,
        )
    }

    /// Correlation identifier copied from the request.
    #[must_use]
    pub const fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Result bytes.
    #[must_use]
    pub fn result(&self) -> &[u8] {
        &self.result
    }

    /// Result bytes as text, if they are valid UTF-8.
    #[must_use]
    pub fn result_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.result).ok()
    }

    /// When the processor produced this result.
    #[must_use]
    pub const fn processed_at(&self) -> DateTime<Utc> {
        self.processed_at
    }

    /// Whether processing succeeded.
    #[must_use]
    pub const fn outcome(&self) -> Outcome {
        self.outcome
    }
}
