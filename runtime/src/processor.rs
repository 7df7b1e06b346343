//! Processor stage: lease, transform, publish, then acknowledge.
//!
//! Each leased message moves through
//!
//! ```text
//! Leased ──► Transformed ──► Published ──► Acked
//!    │
//!    └──► DeadLettered
//! ```
//!
//! The original message is acknowledged only after its result is durably
//! enqueued downstream. Every failure before that point leaves the message
//! leased, so the transport redelivers it once the visibility timeout
//! expires. Redelivery is safe: the transform is deterministic and the result
//! memo republishes the exact bytes an earlier attempt produced.
//!
//! Messages that can never succeed go to the poison queue instead of blocking
//! the queue: undecodable bodies immediately, and anything whose delivery
//! count exceeds the configured budget.

use crate::bounded;
use crate::metrics::ProcessorMetrics;
use crate::retry::{RetryPolicy, retry_with_predicate};
use request_relay_core::environment::Clock;
use request_relay_core::{
    CorrelationId, DeliveryReceipt, LeasedMessage, Outcome, QueueError, QueueNames,
    QueueTransport, ResultEnvelope, codec,
};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;

/// Suffix the default transform appends to the name.
pub const PROCESSED_MARKER: &str = " got processed";

/// Reason recorded on the result when the request carried no name.
pub const NO_NAME_REASON: &str = "no name supplied";

/// Processor tuning. Immutable once the processor is built.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Source and destination queues
    pub queues: QueueNames,
    /// How long a leased message stays hidden from other consumers
    pub visibility_timeout: Duration,
    /// Deliveries allowed before a message is dead-lettered on lease
    pub max_delivery_attempts: u32,
    /// Sleep between polls of an empty queue
    pub poll_interval: Duration,
    /// Bound on each individual transport call
    pub operation_timeout: Duration,
    /// Backoff for publish, acknowledge and dequeue errors
    pub retry: RetryPolicy,
    /// Number of results remembered for byte-identical redelivery
    pub memo_capacity: usize,
    /// Consumer loops spawned by [`Processor::spawn_workers`]
    pub concurrency: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            queues: QueueNames::default(),
            visibility_timeout: Duration::from_secs(30),
            max_delivery_attempts: 5,
            poll_interval: Duration::from_secs(1),
            operation_timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
            memo_capacity: 1024,
            concurrency: 1,
        }
    }
}

/// How a transform failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    /// Permanent business rejection; published as a failed result
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// Anything else; treated as transient and retried through redelivery
    #[error("Processing failed: {0}")]
    Unclassified(String),
}

/// The business transformation applied to each decoded request.
///
/// Must be deterministic: the same input always yields the same output.
pub trait Transform: Send + Sync {
    /// Transform the request's name into result bytes.
    ///
    /// # Errors
    ///
    /// Returns [`TransformError::Rejected`] for requests that can never
    /// succeed, [`TransformError::Unclassified`] for anything else.
    fn apply(&self, name: Option<&str>) -> Result<Vec<u8>, TransformError>;
}

/// Appends [`PROCESSED_MARKER`] to the name; rejects requests without one.
#[derive(Debug, Clone, Copy, Default)]
pub struct AppendMarker;

impl Transform for AppendMarker {
    fn apply(&self, name: Option<&str>) -> Result<Vec<u8>, TransformError> {
        name.map(|name| format!("{name}{PROCESSED_MARKER}").into_bytes())
            .ok_or_else(|| TransformError::Rejected(NO_NAME_REASON.to_string()))
    }
}

/// Furthest point a message reached in the processing protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    /// Leased from the open queue
    Leased,
    /// Result computed and encoded
    Transformed,
    /// Result durably enqueued downstream
    Published,
    /// Original removed from the open queue
    Acked,
    /// Original moved to the poison queue
    DeadLettered,
}

impl MessageState {
    /// Stable lowercase name, used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Leased => "leased",
            Self::Transformed => "transformed",
            Self::Published => "published",
            Self::Acked => "acked",
            Self::DeadLettered => "dead_lettered",
        }
    }
}

impl fmt::Display for MessageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a message was dead-lettered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadLetterReason {
    /// The body or its payload could not be decoded
    MalformedPayload,
    /// The delivery count exceeded the budget
    DeliveryBudgetExhausted,
    /// The result could not be encoded (for example, it is too large)
    UnencodableResult,
}

impl DeadLetterReason {
    /// Stable lowercase name, used for metric labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MalformedPayload => "malformed_payload",
            Self::DeliveryBudgetExhausted => "delivery_budget_exhausted",
            Self::UnencodableResult => "unencodable_result",
        }
    }
}

/// Final disposition of one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Result published and original acknowledged
    Acked(Outcome),
    /// Original moved to the poison queue
    DeadLettered(DeadLetterReason),
    /// Left leased for redelivery; carries the furthest state reached
    Released(MessageState),
    /// Nothing was visible on the queue
    Idle,
}

/// Bounded FIFO memo of encoded results, keyed by correlation id.
#[derive(Debug)]
struct ResultMemo {
    capacity: usize,
    order: VecDeque<CorrelationId>,
    entries: HashMap<CorrelationId, (Outcome, Vec<u8>)>,
}

impl ResultMemo {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            entries: HashMap::with_capacity(capacity),
        }
    }

    fn get(&self, id: &CorrelationId) -> Option<(Outcome, Vec<u8>)> {
        self.entries.get(id).cloned()
    }

    fn insert(&mut self, id: CorrelationId, outcome: Outcome, bytes: Vec<u8>) {
        if self.capacity == 0 || self.entries.contains_key(&id) {
            return;
        }
        while self.order.len() >= self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.entries.remove(&evicted);
            }
        }
        self.order.push_back(id.clone());
        self.entries.insert(id, (outcome, bytes));
    }
}

/// Long-running consumer of the open queue.
///
/// One processor may be shared by any number of worker loops; the transport
/// guarantees each message is leased by at most one of them at a time.
pub struct Processor<T = AppendMarker> {
    transport: Arc<dyn QueueTransport>,
    clock: Arc<dyn Clock>,
    transform: T,
    config: ProcessorConfig,
    memo: Mutex<ResultMemo>,
}

impl<T: Transform> Processor<T> {
    /// Create a processor.
    #[must_use]
    pub fn new(
        transport: Arc<dyn QueueTransport>,
        clock: Arc<dyn Clock>,
        transform: T,
        config: ProcessorConfig,
    ) -> Self {
        let memo = Mutex::new(ResultMemo::new(config.memo_capacity));
        Self {
            transport,
            clock,
            transform,
            config,
            memo,
        }
    }

    /// Configuration this processor runs with.
    #[must_use]
    pub const fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Lease at most one message and take it to a final disposition.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] only if leasing itself failed. Everything after
    /// a successful lease is reported through [`Disposition`].
    pub async fn poll_once(&self) -> Result<Disposition, QueueError> {
        let queue = &self.config.queues.open;
        let leased = bounded(
            "dequeue",
            queue,
            self.config.operation_timeout,
            self.transport
                .dequeue_lease(queue, self.config.visibility_timeout),
        )
        .await?;

        match leased {
            Some(leased) => Ok(self.handle_delivery(leased).await),
            None => Ok(Disposition::Idle),
        }
    }

    /// Take one leased message through the processing protocol.
    pub async fn handle_delivery(&self, leased: LeasedMessage) -> Disposition {
        let span = tracing::info_span!(
            "delivery",
            queue = %leased.receipt.queue(),
            message_id = %leased.receipt.message_id(),
            delivery_count = leased.receipt.delivery_count(),
        );
        self.process(leased).instrument(span).await
    }

    #[allow(clippy::cognitive_complexity, clippy::too_many_lines)]
    async fn process(&self, leased: LeasedMessage) -> Disposition {
        let started = Instant::now();
        let LeasedMessage { receipt, body } = leased;

        if receipt.delivery_count() > self.config.max_delivery_attempts {
            tracing::warn!(
                max_delivery_attempts = self.config.max_delivery_attempts,
                "Delivery budget exhausted"
            );
            return self
                .dead_letter(&receipt, &body, DeadLetterReason::DeliveryBudgetExhausted)
                .await;
        }

        let request = match codec::decode_request(&body) {
            Ok(request) => request,
            Err(err) => {
                tracing::warn!(error = %err, "Undecodable request envelope");
                return self
                    .dead_letter(&receipt, &body, DeadLetterReason::MalformedPayload)
                    .await;
            }
        };
        let correlation_id = request.correlation_id().clone();

        let (outcome, result) = if let Some(memoized) = self.remembered(&correlation_id) {
            ProcessorMetrics::record_memo_hit();
            tracing::debug!(correlation_id = %correlation_id, "Republishing memoized result");
            memoized
        } else {
            let name = match codec::decode_name(request.payload()) {
                Ok(name) => name,
                Err(err) => {
                    tracing::warn!(correlation_id = %correlation_id, error = %err, "Undecodable payload");
                    return self
                        .dead_letter(&receipt, &body, DeadLetterReason::MalformedPayload)
                        .await;
                }
            };

            let envelope = match self.transform.apply(name.as_deref()) {
                Ok(result) => ResultEnvelope::success(correlation_id.clone(), result, self.clock.now()),
                Err(TransformError::Rejected(reason)) => {
                    tracing::info!(correlation_id = %correlation_id, reason = %reason, "Request rejected");
                    ResultEnvelope::failure(correlation_id.clone(), &reason, self.clock.now())
                }
                Err(err @ TransformError::Unclassified(_)) => {
                    tracing::warn!(
                        correlation_id = %correlation_id,
                        state = %MessageState::Leased,
                        error = %err,
                        "Transform failed, leaving message for redelivery"
                    );
                    ProcessorMetrics::record_released();
                    return Disposition::Released(MessageState::Leased);
                }
            };

            let bytes = match codec::encode_result(&envelope) {
                Ok(bytes) => bytes,
                Err(err) => {
                    tracing::warn!(correlation_id = %correlation_id, error = %err, "Result cannot be encoded");
                    return self
                        .dead_letter(&receipt, &body, DeadLetterReason::UnencodableResult)
                        .await;
                }
            };

            self.remember(correlation_id.clone(), envelope.outcome(), bytes.clone());
            (envelope.outcome(), bytes)
        };

        tracing::debug!(correlation_id = %correlation_id, state = %MessageState::Transformed, "Result ready");

        let processed = &self.config.queues.processed;
        let published = retry_with_predicate(
            &self.config.retry,
            "publish",
            || {
                bounded(
                    "enqueue",
                    processed,
                    self.config.operation_timeout,
                    self.transport.enqueue(processed, &result),
                )
            },
            QueueError::is_transient,
        )
        .await;

        if let Err(err) = published {
            tracing::warn!(
                correlation_id = %correlation_id,
                state = %MessageState::Transformed,
                error = %err,
                "Publish failed, leaving message for redelivery"
            );
            ProcessorMetrics::record_released();
            return Disposition::Released(MessageState::Transformed);
        }

        tracing::debug!(correlation_id = %correlation_id, state = %MessageState::Published, "Result published");

        let acknowledged = retry_with_predicate(
            &self.config.retry,
            "acknowledge",
            || {
                bounded(
                    "acknowledge",
                    receipt.queue(),
                    self.config.operation_timeout,
                    self.transport.acknowledge(&receipt),
                )
            },
            QueueError::is_transient,
        )
        .await;

        if let Err(err) = acknowledged {
            tracing::warn!(
                correlation_id = %correlation_id,
                state = %MessageState::Published,
                error = %err,
                "Acknowledge failed, message will be redelivered"
            );
            ProcessorMetrics::record_released();
            return Disposition::Released(MessageState::Published);
        }

        ProcessorMetrics::record_acked(outcome, started.elapsed());
        tracing::info!(
            correlation_id = %correlation_id,
            state = %MessageState::Acked,
            outcome = %outcome,
            "Message processed"
        );
        Disposition::Acked(outcome)
    }

    async fn dead_letter(
        &self,
        receipt: &DeliveryReceipt,
        body: &[u8],
        reason: DeadLetterReason,
    ) -> Disposition {
        let result = retry_with_predicate(
            &self.config.retry,
            "dead_letter",
            || {
                bounded(
                    "dead_letter",
                    receipt.queue(),
                    self.config.operation_timeout,
                    self.transport.dead_letter(receipt, body),
                )
            },
            QueueError::is_transient,
        )
        .await;

        match result {
            Ok(()) => {
                ProcessorMetrics::record_dead_lettered(reason.as_str());
                tracing::warn!(
                    state = %MessageState::DeadLettered,
                    reason = reason.as_str(),
                    "Message dead-lettered"
                );
                Disposition::DeadLettered(reason)
            }
            Err(err) => {
                ProcessorMetrics::record_released();
                tracing::error!(
                    state = %MessageState::Leased,
                    reason = reason.as_str(),
                    error = %err,
                    "Dead-letter failed, leaving message for redelivery"
                );
                Disposition::Released(MessageState::Leased)
            }
        }
    }

    fn remembered(&self, id: &CorrelationId) -> Option<(Outcome, Vec<u8>)> {
        self.memo
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
    }

    fn remember(&self, id: CorrelationId, outcome: Outcome, bytes: Vec<u8>) {
        self.memo
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, outcome, bytes);
    }

    /// Consume the open queue until `shutdown` turns `true` (or its sender
    /// is dropped).
    ///
    /// The signal is observed between messages; a message already leased is
    /// always taken to a final disposition first.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            queue = %self.config.queues.open,
            processed_queue = %self.config.queues.processed,
            "Processor loop started"
        );

        let mut consecutive_errors: u32 = 0;

        while !*shutdown.borrow() {
            let pause = match self.poll_once().await {
                Ok(Disposition::Idle) => {
                    consecutive_errors = 0;
                    self.config.poll_interval
                }
                Ok(_) => {
                    consecutive_errors = 0;
                    continue;
                }
                Err(err) => {
                    let delay = self.config.retry.backoff(consecutive_errors);
                    consecutive_errors = consecutive_errors.saturating_add(1);
                    tracing::warn!(
                        error = %err,
                        attempt = consecutive_errors,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Dequeue failed, backing off"
                    );
                    delay
                }
            };

            tokio::select! {
                () = tokio::time::sleep(pause) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!(queue = %self.config.queues.open, "Processor loop stopped");
    }
}

impl<T: Transform + 'static> Processor<T> {
    /// Spawn [`ProcessorConfig::concurrency`] worker loops sharing this
    /// processor. Each stops when `shutdown` turns `true`.
    #[must_use]
    pub fn spawn_workers(self: &Arc<Self>, shutdown: &watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        (0..self.config.concurrency.max(1))
            .map(|worker| {
                let processor = Arc::clone(self);
                let shutdown = shutdown.clone();
                tokio::spawn(
                    async move { processor.run(shutdown).await }
                        .instrument(tracing::info_span!("processor", worker)),
                )
            })
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn append_marker_appends_suffix() {
        let result = AppendMarker.apply(Some("Ada")).unwrap();
        assert_eq!(result, b"Ada got processed");
    }

    #[test]
    fn append_marker_rejects_missing_name() {
        assert_eq!(
            AppendMarker.apply(None),
            Err(TransformError::Rejected(NO_NAME_REASON.to_string()))
        );
    }

    #[test]
    fn memo_evicts_oldest_first() {
        let mut memo = ResultMemo::new(2);
        memo.insert(CorrelationId::new("a"), Outcome::Success, b"a".to_vec());
        memo.insert(CorrelationId::new("b"), Outcome::Success, b"b".to_vec());
        memo.insert(CorrelationId::new("c"), Outcome::Failure, b"c".to_vec());

        assert!(memo.get(&CorrelationId::new("a")).is_none());
        assert_eq!(
            memo.get(&CorrelationId::new("c")),
            Some((Outcome::Failure, b"c".to_vec()))
        );
    }

    #[test]
    fn memo_keeps_first_result_for_an_id() {
        let mut memo = ResultMemo::new(4);
        memo.insert(CorrelationId::new("a"), Outcome::Success, b"first".to_vec());
        memo.insert(CorrelationId::new("a"), Outcome::Success, b"second".to_vec());

        assert_eq!(
            memo.get(&CorrelationId::new("a")),
            Some((Outcome::Success, b"first".to_vec()))
        );
    }

    #[test]
    fn zero_capacity_memo_remembers_nothing() {
        let mut memo = ResultMemo::new(0);
        memo.insert(CorrelationId::new("a"), Outcome::Success, b"a".to_vec());
        assert!(memo.get(&CorrelationId::new("a")).is_none());
    }
}
