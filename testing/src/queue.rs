//! In-memory queue transport.
//!
//! [`InMemoryQueue`] implements [`QueueTransport`] with the same observable
//! semantics as a durable backend, minus the durability:
//!
//! - FIFO leasing of visible messages, with a visibility timeout measured on
//!   the tokio clock (so `tokio::time::pause` and `advance` drive expiry)
//! - a delivery count incremented on every lease
//! - lease tokens, so a stale receipt cannot acknowledge a re-leased message
//! - dead-lettering into `<queue>-poison`
//!
//! Tests additionally get failure injection and inspection helpers. The
//! server binary uses this transport when no database is configured.

use request_relay_core::transport::{TransportFuture, poison_queue_name};
use request_relay_core::{DeliveryReceipt, LeasedMessage, QueueError, QueueTransport};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct StoredMessage {
    id: u64,
    body: Vec<u8>,
    delivery_count: u32,
    lease: Option<Lease>,
}

#[derive(Debug, Clone)]
struct Lease {
    token: u64,
    expires_at: Instant,
}

impl StoredMessage {
    fn is_visible(&self, now: Instant) -> bool {
        self.lease.as_ref().is_none_or(|lease| lease.expires_at <= now)
    }
}

/// How enqueues to a queue should fail.
#[derive(Debug, Clone, Copy)]
enum EnqueueFault {
    Next(u32),
    Always,
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    next_token: u64,
    queues: HashMap<String, VecDeque<StoredMessage>>,
    enqueue_faults: HashMap<String, EnqueueFault>,
    failing_dequeues: u32,
    failing_acknowledges: u32,
    failing_dead_letters: u32,
    enqueue_attempts: HashMap<String, u32>,
}

impl State {
    fn push(&mut self, queue: &str, body: Vec<u8>) {
        self.next_id += 1;
        let message = StoredMessage {
            id: self.next_id,
            body,
            delivery_count: 0,
            lease: None,
        };
        self.queues
            .entry(queue.to_string())
            .or_default()
            .push_back(message);
    }

    fn take_enqueue_fault(&mut self, queue: &str) -> bool {
        match self.enqueue_faults.get_mut(queue) {
            Some(EnqueueFault::Always) => true,
            Some(EnqueueFault::Next(remaining)) => {
                *remaining -= 1;
                if *remaining == 0 {
                    self.enqueue_faults.remove(queue);
                }
                true
            }
            None => false,
        }
    }

    /// Position of the message the receipt still holds a lease on.
    fn leased_position(&self, receipt: &DeliveryReceipt) -> Result<usize, QueueError> {
        let lease_lost = || QueueError::LeaseLost {
            queue: receipt.queue().to_string(),
            message_id: receipt.message_id().to_string(),
        };

        let queue = self.queues.get(receipt.queue()).ok_or_else(lease_lost)?;
        queue
            .iter()
            .position(|message| {
                message.id.to_string() == receipt.message_id()
                    && message
                        .lease
                        .as_ref()
                        .is_some_and(|lease| lease.token.to_string() == receipt.lease_token())
            })
            .ok_or_else(lease_lost)
    }
}

fn take_fault(counter: &mut u32) -> bool {
    if *counter == 0 {
        return false;
    }
    *counter -= 1;
    true
}

/// In-memory lease-based queue transport.
///
/// Cloning shares the underlying queues.
///
/// # Example
///
/// ```
/// use request_relay_testing::InMemoryQueue;
/// use request_relay_core::QueueTransport;
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let queue = InMemoryQueue::new();
/// queue.enqueue("request_open", b"hello").await.unwrap();
///
/// let leased = queue
///     .dequeue_lease("request_open", Duration::from_secs(30))
///     .await
///     .unwrap()
///     .unwrap();
/// assert_eq!(leased.body, b"hello");
/// assert_eq!(leased.receipt.delivery_count(), 1);
///
/// queue.acknowledge(&leased.receipt).await.unwrap();
/// assert!(queue.is_empty("request_open"));
/// # });
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryQueue {
    state: Arc<Mutex<State>>,
}

impl InMemoryQueue {
    /// Create an empty transport
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail the next `count` enqueues to `queue`
    pub fn fail_next_enqueues(&self, queue: &str, count: u32) {
        if count > 0 {
            self.state()
                .enqueue_faults
                .insert(queue.to_string(), EnqueueFault::Next(count));
        }
    }

    /// Fail every enqueue to `queue` until [`heal_enqueues`](Self::heal_enqueues)
    pub fn fail_enqueues(&self, queue: &str) {
        self.state()
            .enqueue_faults
            .insert(queue.to_string(), EnqueueFault::Always);
    }

    /// Stop injecting enqueue failures for `queue`
    pub fn heal_enqueues(&self, queue: &str) {
        self.state().enqueue_faults.remove(queue);
    }

    /// Fail the next `count` dequeue calls, on any queue
    pub fn fail_next_dequeues(&self, count: u32) {
        self.state().failing_dequeues = count;
    }

    /// Fail the next `count` acknowledge calls
    pub fn fail_next_acknowledges(&self, count: u32) {
        self.state().failing_acknowledges = count;
    }

    /// Fail the next `count` dead-letter calls
    pub fn fail_next_dead_letters(&self, count: u32) {
        self.state().failing_dead_letters = count;
    }

    /// Number of enqueue calls made against `queue`, including failed ones
    #[must_use]
    pub fn enqueue_attempts(&self, queue: &str) -> u32 {
        self.state()
            .enqueue_attempts
            .get(queue)
            .copied()
            .unwrap_or(0)
    }

    /// Bodies of every message on `queue`, leased or not, in FIFO order
    #[must_use]
    pub fn messages(&self, queue: &str) -> Vec<Vec<u8>> {
        self.state()
            .queues
            .get(queue)
            .map(|q| q.iter().map(|m| m.body.clone()).collect())
            .unwrap_or_default()
    }

    /// Bodies dead-lettered from `queue`
    #[must_use]
    pub fn dead_letters(&self, queue: &str) -> Vec<Vec<u8>> {
        self.messages(&poison_queue_name(queue))
    }

    /// Number of messages on `queue`, leased or not
    #[must_use]
    pub fn len(&self, queue: &str) -> usize {
        self.state().queues.get(queue).map_or(0, VecDeque::len)
    }

    /// Whether `queue` holds no messages at all
    #[must_use]
    pub fn is_empty(&self, queue: &str) -> bool {
        self.len(queue) == 0
    }

    /// Number of messages on `queue` a consumer could lease right now
    #[must_use]
    pub fn visible_len(&self, queue: &str) -> usize {
        let now = Instant::now();
        self.state()
            .queues
            .get(queue)
            .map_or(0, |q| q.iter().filter(|m| m.is_visible(now)).count())
    }

    /// Expire every outstanding lease on `queue`, as if the visibility
    /// timeout had elapsed. Receipts from those leases stay valid until the
    /// message is leased again.
    pub fn expire_leases(&self, queue: &str) {
        let now = Instant::now();
        if let Some(q) = self.state().queues.get_mut(queue) {
            for lease in q.iter_mut().filter_map(|m| m.lease.as_mut()) {
                lease.expires_at = now;
            }
        }
    }
}

impl QueueTransport for InMemoryQueue {
    fn enqueue(&self, queue: &str, body: &[u8]) -> TransportFuture<'_, ()> {
        let queue = queue.to_string();
        let body = body.to_vec();

        Box::pin(async move {
            let mut state = self.state();
            *state.enqueue_attempts.entry(queue.clone()).or_default() += 1;

            if state.take_enqueue_fault(&queue) {
                return Err(QueueError::EnqueueFailed {
                    queue,
                    reason: "injected failure".to_string(),
                });
            }

            state.push(&queue, body);
            Ok(())
        })
    }

    fn dequeue_lease(
        &self,
        queue: &str,
        visibility_timeout: Duration,
    ) -> TransportFuture<'_, Option<LeasedMessage>> {
        let queue = queue.to_string();

        Box::pin(async move {
            let mut state = self.state();

            if take_fault(&mut state.failing_dequeues) {
                return Err(QueueError::DequeueFailed {
                    queue,
                    reason: "injected failure".to_string(),
                });
            }

            state.next_token += 1;
            let token = state.next_token;
            let now = Instant::now();

            let Some(message) = state
                .queues
                .get_mut(&queue)
                .and_then(|q| q.iter_mut().find(|m| m.is_visible(now)))
            else {
                return Ok(None);
            };

            message.delivery_count += 1;
            message.lease = Some(Lease {
                token,
                expires_at: now + visibility_timeout,
            });

            Ok(Some(LeasedMessage {
                receipt: DeliveryReceipt::new(
                    queue.as_str(),
                    message.id.to_string(),
                    token.to_string(),
                    message.delivery_count,
                ),
                body: message.body.clone(),
            }))
        })
    }

    fn acknowledge(&self, receipt: &DeliveryReceipt) -> TransportFuture<'_, ()> {
        let receipt = receipt.clone();

        Box::pin(async move {
            let mut state = self.state();

            if take_fault(&mut state.failing_acknowledges) {
                return Err(QueueError::AcknowledgeFailed {
                    queue: receipt.queue().to_string(),
                    reason: "injected failure".to_string(),
                });
            }

            let position = state.leased_position(&receipt)?;
            if let Some(q) = state.queues.get_mut(receipt.queue()) {
                q.remove(position);
            }
            Ok(())
        })
    }

    fn dead_letter(&self, receipt: &DeliveryReceipt, body: &[u8]) -> TransportFuture<'_, ()> {
        let receipt = receipt.clone();
        let body = body.to_vec();

        Box::pin(async move {
            let mut state = self.state();

            if take_fault(&mut state.failing_dead_letters) {
                return Err(QueueError::DeadLetterFailed {
                    queue: receipt.queue().to_string(),
                    reason: "injected failure".to_string(),
                });
            }

            let position = state.leased_position(&receipt)?;
            if let Some(q) = state.queues.get_mut(receipt.queue()) {
                q.remove(position);
            }
            state.push(&poison_queue_name(receipt.queue()), body);
            Ok(())
        })
    }
}
