//! Intake stage: turns a synchronous call into a durably enqueued request.
//!
//! The handler is stateless between calls. Each accepted call produces
//! exactly one enqueue to the open queue; a call that fails produces none
//! that the caller is told about, and the caller is never acknowledged
//! without a durable enqueue.

use crate::bounded;
use crate::metrics::IntakeMetrics;
use request_relay_core::environment::{Clock, IdGenerator};
use request_relay_core::{
    CodecError, CorrelationId, NameSource, QueueError, QueueTransport, RequestEnvelope, codec,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Default bound on a single enqueue, including the network round trip.
pub const DEFAULT_ENQUEUE_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors returned by [`IntakeHandler::submit`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntakeError {
    /// The request could not be durably enqueued (includes timeouts)
    #[error("Failed to enqueue request: {0}")]
    EnqueueFailed(#[source] QueueError),

    /// The request could not be encoded (for example, it is too large)
    #[error("Request rejected: {0}")]
    Rejected(#[source] CodecError),
}

/// What the caller is told once the request has been accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acknowledgment {
    /// Human-readable acknowledgment text
    pub message: String,
    /// Identifier the eventual result will carry
    pub correlation_id: CorrelationId,
}

/// Acknowledgment text for a resolved name.
///
/// ```
/// use request_relay_runtime::intake::greeting;
///
/// assert_eq!(
///     greeting(Some("Ada")),
///     "Hello, Ada. This HTTP triggered function executed OK."
/// );
/// ```
#[must_use]
pub fn greeting(name: Option<&str>) -> String {
    match name {
        Some(name) => format!("Hello, {name}. This HTTP triggered function executed OK."),
        None => "This HTTP triggered function executed successfully. Pass a name in the query \
                 string or in the request body for a personalized response."
            .to_string(),
    }
}

/// Accepts requests and enqueues them to the open queue.
pub struct IntakeHandler {
    transport: Arc<dyn QueueTransport>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    queue: String,
    enqueue_timeout: Duration,
}

impl IntakeHandler {
    /// Create a handler that enqueues to `queue`.
    #[must_use]
    pub fn new(
        transport: Arc<dyn QueueTransport>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        queue: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            clock,
            ids,
            queue: queue.into(),
            enqueue_timeout: DEFAULT_ENQUEUE_TIMEOUT,
        }
    }

    /// Override the enqueue timeout.
    #[must_use]
    pub const fn with_enqueue_timeout(mut self, timeout: Duration) -> Self {
        self.enqueue_timeout = timeout;
        self
    }

    /// Queue this handler enqueues to.
    #[must_use]
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Build a request envelope for `source` and enqueue it.
    ///
    /// # Errors
    ///
    /// - [`IntakeError::Rejected`] if the request cannot be encoded; nothing
    ///   is enqueued
    /// - [`IntakeError::EnqueueFailed`] if the transport fails or the enqueue
    ///   exceeds the timeout; no retry is attempted here
    pub async fn submit(&self, source: NameSource) -> Result<Acknowledgment, IntakeError> {
        let correlation_id = self.ids.next_id();
        let name = source.name();

        let body = match self.encode(&correlation_id, name) {
            Ok(body) => body,
            Err(err) => {
                IntakeMetrics::record_rejected();
                tracing::warn!(
                    correlation_id = %correlation_id,
                    error = %err,
                    "Request rejected before enqueue"
                );
                return Err(IntakeError::Rejected(err));
            }
        };

        let enqueued = bounded(
            "enqueue",
            &self.queue,
            self.enqueue_timeout,
            self.transport.enqueue(&self.queue, &body),
        )
        .await;

        if let Err(err) = enqueued {
            IntakeMetrics::record_rejected();
            tracing::error!(
                correlation_id = %correlation_id,
                queue = %self.queue,
                error = %err,
                "Failed to enqueue request"
            );
            return Err(IntakeError::EnqueueFailed(err));
        }

        IntakeMetrics::record_accepted();
        tracing::info!(
            correlation_id = %correlation_id,
            queue = %self.queue,
            named = name.is_some(),
            "Request accepted"
        );

        Ok(Acknowledgment {
            message: greeting(name),
            correlation_id,
        })
    }

    fn encode(
        &self,
        correlation_id: &CorrelationId,
        name: Option<&str>,
    ) -> Result<Vec<u8>, CodecError> {
        let payload = codec::encode_name(name)?;
        let envelope = RequestEnvelope::new(correlation_id.clone(), payload, self.clock.now());
        codec::encode_request(&envelope)
    }
}
