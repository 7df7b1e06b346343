//! # Request Relay Core
//!
//! Core types and traits for the request relay pipeline.
//!
//! A synchronous caller is acknowledged immediately while the real work is
//! relayed through two durable queues:
//!
//! ```text
//! caller ──► intake ──► request_open ──► processor ──► request_processed ──► consumer
//! ```
//!
//! This crate holds everything both stages agree on:
//!
//! - **Envelopes**: [`RequestEnvelope`] and [`ResultEnvelope`], joined by a
//!   [`CorrelationId`] that is stable end-to-end
//! - **Codec**: the versioned wire format for payloads and envelopes
//! - **Transport**: the [`QueueTransport`] trait with lease/ack/dead-letter
//!   semantics that every queue backend implements
//! - **Environment**: injected [`Clock`](environment::Clock) and
//!   [`IdGenerator`](environment::IdGenerator) so both stages stay deterministic
//!   under test
//!
//! Nothing here performs I/O. Durability lives entirely in the transport
//! implementations (`request-relay-postgres`, `request-relay-testing`).

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

pub mod codec;
pub mod envelope;
pub mod name;
pub mod transport;

pub use codec::CodecError;
pub use envelope::{CorrelationId, Outcome, RequestEnvelope, ResultEnvelope};
pub use name::NameSource;
pub use transport::{DeliveryReceipt, LeasedMessage, QueueError, QueueNames, QueueTransport};

/// Environment module - Injected dependencies for the pipeline stages
///
/// Intake and processor never read the wall clock or generate identifiers
/// directly; they go through these traits so tests can pin both.
pub mod environment {
    use crate::envelope::CorrelationId;
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use request_relay_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let before = clock.now();
    /// assert!(clock.now() >= before);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }

    /// Source of fresh correlation identifiers.
    ///
    /// Every call must return an identifier that has not been handed out
    /// before by this generator.
    pub trait IdGenerator: Send + Sync {
        /// Produce the next correlation identifier
        fn next_id(&self) -> CorrelationId;
    }

    /// Production generator producing random UUID v4 identifiers.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct UuidGenerator;

    impl IdGenerator for UuidGenerator {
        fn next_id(&self) -> CorrelationId {
            CorrelationId::new(uuid::Uuid::new_v4().to_string())
        }
    }
}
