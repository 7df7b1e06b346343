//! Queue transport abstraction.
//!
//! This module provides the [`QueueTransport`] trait through which both
//! pipeline stages talk to the durable queues. The transport is the only
//! synchronization point between intake and processor.
//!
//! # Delivery Semantics
//!
//! - **At-least-once**: a leased message that is not acknowledged before its
//!   visibility timeout expires becomes visible again and is redelivered
//! - **Mutual exclusion per lease**: while leased, a message is hidden from
//!   every other consumer
//! - **Delivery count**: each lease increments the message's delivery count,
//!   exposed on the [`DeliveryReceipt`] so consumers can enforce a budget
//! - **Dead-letter**: a leased message can be moved to the side queue
//!   `<queue>-poison` for offline inspection
//!
//! # Implementations
//!
//! - `InMemoryQueue` (`request-relay-testing`) - fast, deterministic, supports
//!   failure injection
//! - `PostgresQueue` (`request-relay-postgres`) - durable, multi-process
//!
//! # Example
//!
//! ```rust,ignore
//! use request_relay_core::QueueTransport;
//! use std::time::Duration;
//!
//! async fn drain_one(transport: &dyn QueueTransport) -> Result<(), QueueError> {
//!     if let Some(leased) = transport
//!         .dequeue_lease("request_open", Duration::from_secs(30))
//!         .await?
//!     {
//!         handle(&leased.body);
//!         transport.acknowledge(&leased.receipt).await?;
//!     }
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Suffix appended to a queue name to form its dead-letter queue name.
pub const POISON_SUFFIX: &str = "-poison";

/// Name of the dead-letter queue that belongs to `queue`.
///
/// # Examples
///
/// ```
/// use request_relay_core::transport::poison_queue_name;
///
/// assert_eq!(poison_queue_name("request_open"), "request_open-poison");
/// ```
#[must_use]
pub fn poison_queue_name(queue: &str) -> String {
    format!("{queue}{POISON_SUFFIX}")
}

/// Errors that can occur during queue transport operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// Failed to connect to the queue backend
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to enqueue a message
    #[error("Enqueue failed for queue '{queue}': {reason}")]
    EnqueueFailed {
        /// The queue that failed
        queue: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to lease a message
    #[error("Dequeue failed for queue '{queue}': {reason}")]
    DequeueFailed {
        /// The queue that failed
        queue: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to acknowledge a leased message
    #[error("Acknowledge failed for queue '{queue}': {reason}")]
    AcknowledgeFailed {
        /// The queue that failed
        queue: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to move a leased message to the dead-letter queue
    #[error("Dead-letter failed for queue '{queue}': {reason}")]
    DeadLetterFailed {
        /// The queue that failed
        queue: String,
        /// The reason for failure
        reason: String,
    },

    /// The receipt no longer holds the lease (it expired and the message was
    /// leased again, or the message is gone)
    #[error("Lease lost for message '{message_id}' on queue '{queue}'")]
    LeaseLost {
        /// The queue holding the message
        queue: String,
        /// The message whose lease was lost
        message_id: String,
    },

    /// An operation did not complete in time
    #[error("Operation '{operation}' timed out on queue '{queue}'")]
    Timeout {
        /// The operation that timed out
        operation: &'static str,
        /// The queue involved
        queue: String,
    },
}

impl QueueError {
    /// Whether retrying the same operation could succeed.
    ///
    /// Everything is transient except [`QueueError::LeaseLost`]: once the
    /// lease is gone, no amount of retrying with the same receipt helps.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        !matches!(self, Self::LeaseLost { .. })
    }
}

/// Transport handle for one in-flight lease of a message.
///
/// Only valid for the processing attempt that obtained it. Pass it back to
/// [`QueueTransport::acknowledge`] or [`QueueTransport::dead_letter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    queue: String,
    message_id: String,
    lease_token: String,
    delivery_count: u32,
}

impl DeliveryReceipt {
    /// Create a receipt. Intended for transport implementations.
    #[must_use]
    pub fn new(
        queue: impl Into<String>,
        message_id: impl Into<String>,
        lease_token: impl Into<String>,
        delivery_count: u32,
    ) -> Self {
        Self {
            queue: queue.into(),
            message_id: message_id.into(),
            lease_token: lease_token.into(),
            delivery_count,
        }
    }

    /// Queue the message was leased from.
    #[must_use]
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Transport-assigned message identifier.
    #[must_use]
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Token proving ownership of this particular lease.
    #[must_use]
    pub fn lease_token(&self) -> &str {
        &self.lease_token
    }

    /// How many times the message has been leased, including this lease.
    #[must_use]
    pub const fn delivery_count(&self) -> u32 {
        self.delivery_count
    }
}

/// A message body together with the receipt for its lease.
#[derive(Debug, Clone)]
pub struct LeasedMessage {
    /// Receipt for acknowledging or dead-lettering this delivery
    pub receipt: DeliveryReceipt,
    /// Opaque message body
    pub body: Vec<u8>,
}

/// Names of the two queues the pipeline uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueNames {
    /// Queue receiving accepted requests
    pub open: String,
    /// Queue receiving processed results
    pub processed: String,
}

impl Default for QueueNames {
    fn default() -> Self {
        Self {
            open: "request_open".to_string(),
            processed: "request_processed".to_string(),
        }
    }
}

/// Boxed future returned by [`QueueTransport`] operations.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, QueueError>> + Send + 'a>>;

/// Trait for durable queue implementations.
///
/// Message bodies are opaque bytes; the transport never interprets them.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// so it can be shared as `Arc<dyn QueueTransport>` between the intake handler
/// and any number of processor workers.
pub trait QueueTransport: Send + Sync {
    /// Append a message to a queue.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::EnqueueFailed`] (or [`QueueError::ConnectionFailed`])
    /// if the message was not durably stored.
    fn enqueue(&self, queue: &str, body: &[u8]) -> TransportFuture<'_, ()>;

    /// Lease the next visible message, hiding it for `visibility_timeout`.
    ///
    /// Returns `Ok(None)` when no message is currently visible.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::DequeueFailed`] if the backend cannot be read.
    fn dequeue_lease(
        &self,
        queue: &str,
        visibility_timeout: Duration,
    ) -> TransportFuture<'_, Option<LeasedMessage>>;

    /// Remove a leased message permanently.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::LeaseLost`] if the receipt no longer owns the
    /// message, or [`QueueError::AcknowledgeFailed`] on backend failure.
    fn acknowledge(&self, receipt: &DeliveryReceipt) -> TransportFuture<'_, ()>;

    /// Move a leased message to the queue's dead-letter queue, storing `body`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::LeaseLost`] if the receipt no longer owns the
    /// message, or [`QueueError::DeadLetterFailed`] on backend failure.
    fn dead_letter(&self, receipt: &DeliveryReceipt, body: &[u8]) -> TransportFuture<'_, ()>;
}
