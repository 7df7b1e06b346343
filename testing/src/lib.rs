//! # Request Relay Testing
//!
//! Testing utilities for the request relay pipeline.
//!
//! This crate provides:
//! - [`InMemoryQueue`]: a lease-based queue transport with failure injection
//! - Deterministic Environment doubles ([`FixedClock`], [`SequentialIdGenerator`])
//! - proptest strategies for caller-supplied names (`properties` feature)
//!
//! ## Example
//!
//! ```ignore
//! use request_relay_testing::{InMemoryQueue, SequentialIdGenerator, test_clock};
//! use request_relay_runtime::IntakeHandler;
//!
//! #[tokio::test]
//! async fn accepted_request_lands_on_the_open_queue() {
//!     let queue = Arc::new(InMemoryQueue::new());
//!     let intake = IntakeHandler::new(
//!         queue.clone(),
//!         Arc::new(test_clock()),
//!         Arc::new(SequentialIdGenerator::new()),
//!         "request_open",
//!     );
//!
//!     intake.submit(NameSource::FromQuery("Ada".into())).await.unwrap();
//!     assert_eq!(queue.len("request_open"), 1);
//! }
//! ```

use chrono::{DateTime, Utc};
use request_relay_core::environment::{Clock, IdGenerator};

pub mod queue;

pub use queue::InMemoryQueue;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, IdGenerator, Utc};
    use request_relay_core::CorrelationId;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use request_relay_testing::mocks::FixedClock;
    /// use request_relay_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// Never in practice; the timestamp is a literal.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// Predictable identifiers: `req-1`, `req-2`, ...
    ///
    /// ```
    /// use request_relay_testing::SequentialIdGenerator;
    /// use request_relay_core::environment::IdGenerator;
    ///
    /// let ids = SequentialIdGenerator::new();
    /// assert_eq!(ids.next_id().as_str(), "req-1");
    /// assert_eq!(ids.next_id().as_str(), "req-2");
    /// ```
    #[derive(Debug, Default)]
    pub struct SequentialIdGenerator {
        next: AtomicU64,
    }

    impl SequentialIdGenerator {
        /// Create a generator starting at `req-1`
        #[must_use]
        pub const fn new() -> Self {
            Self {
                next: AtomicU64::new(0),
            }
        }
    }

    impl IdGenerator for SequentialIdGenerator {
        fn next_id(&self) -> CorrelationId {
            let n = self.next.fetch_add(1, Ordering::Relaxed) + 1;
            CorrelationId::new(format!("req-{n}"))
        }
    }
}

/// Property-based testing utilities using proptest.
#[cfg(feature = "properties")]
pub mod properties {
    use proptest::prelude::*;

    /// Names a caller could plausibly submit: non-blank, no surrounding
    /// whitespace.
    pub fn name_strategy() -> impl Strategy<Value = String> {
        "[A-Za-z][A-Za-z0-9 .'-]{0,30}[A-Za-z0-9]"
    }

    /// Arbitrary queue message bodies, mostly garbage.
    pub fn body_strategy() -> impl Strategy<Value = Vec<u8>> {
        proptest::collection::vec(any::<u8>(), 0..256)
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, SequentialIdGenerator, test_clock};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
    }

    #[test]
    fn sequential_ids_are_unique() {
        let ids = SequentialIdGenerator::new();
        let a = ids.next_id();
        let b = ids.next_id();
        assert_ne!(a, b);
        assert_eq!(b.as_str(), "req-2");
    }
}
