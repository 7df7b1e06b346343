//! # Request Relay Runtime
//!
//! The two pipeline stages and the machinery they share.
//!
//! ## Core Components
//!
//! - **[`IntakeHandler`]**: accepts a request, enqueues it to the open queue,
//!   and returns an acknowledgment without waiting for the result
//! - **[`Processor`]**: leases from the open queue, transforms, publishes the
//!   result downstream, and acknowledges last
//! - **[`retry`]**: exponential backoff shared by both stages
//! - **[`metrics`]**: Prometheus recorder and the relay's metric names
//!
//! ## Example
//!
//! ```ignore
//! use request_relay_runtime::{IntakeHandler, Processor, ProcessorConfig, AppendMarker};
//!
//! let transport: Arc<dyn QueueTransport> = Arc::new(InMemoryQueue::new());
//! let intake = IntakeHandler::new(transport.clone(), clock.clone(), ids, "request_open");
//! let processor = Arc::new(Processor::new(transport, clock, AppendMarker, ProcessorConfig::default()));
//!
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! let workers = processor.spawn_workers(&shutdown_rx);
//!
//! intake.submit(NameSource::FromQuery("Ada".into())).await?;
//! ```

use request_relay_core::QueueError;
use std::future::Future;
use std::time::Duration;

/// Intake stage
pub mod intake;

/// Prometheus metrics for observability
pub mod metrics;

/// Processor stage
pub mod processor;

/// Retry logic with exponential backoff
pub mod retry;

pub use intake::{Acknowledgment, IntakeError, IntakeHandler};
pub use processor::{
    AppendMarker, DeadLetterReason, Disposition, MessageState, Processor, ProcessorConfig,
    Transform, TransformError,
};
pub use retry::RetryPolicy;

/// Run a transport call, failing with [`QueueError::Timeout`] if it takes
/// longer than `timeout`.
pub(crate) async fn bounded<T>(
    operation: &'static str,
    queue: &str,
    timeout: Duration,
    call: impl Future<Output = Result<T, QueueError>>,
) -> Result<T, QueueError> {
    tokio::time::timeout(timeout, call)
        .await
        .unwrap_or_else(|_| {
            Err(QueueError::Timeout {
                operation,
                queue: queue.to_string(),
            })
        })
}
