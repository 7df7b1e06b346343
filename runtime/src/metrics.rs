//! Prometheus metrics for the relay pipeline.
//!
//! Both stages record through [`IntakeMetrics`] and [`ProcessorMetrics`].
//! Recording is a no-op until a recorder is installed, so library users and
//! tests that never start a [`MetricsServer`] pay nothing.
//!
//! # Example
//!
//! ```rust,no_run
//! use request_relay_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // The host serves `server.render()` at http://0.0.0.0:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use request_relay_core::Outcome;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

const INTAKE_ACCEPTED: &str = "relay.intake.accepted";
const INTAKE_REJECTED: &str = "relay.intake.rejected";
const PROCESSOR_ACKED: &str = "relay.processor.acked";
const PROCESSOR_DEAD_LETTERED: &str = "relay.processor.dead_lettered";
const PROCESSOR_RELEASED: &str = "relay.processor.released";
const PROCESSOR_MEMO_HITS: &str = "relay.processor.memo_hits";
const PROCESSOR_DURATION: &str = "relay.processor.duration_seconds";

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus recorder plus the address the host should expose it on.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server for `addr` (e.g., `0.0.0.0:9090`).
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Address the host should serve `/metrics` on.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Describe the relay metrics and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] if the exporter cannot be built or installed.
    /// A recorder that is already installed (common in tests) is tolerated
    /// with a warning; [`render`](Self::render) then returns `None`.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                describe_metrics();
                tracing::info!(addr = %self.addr, "Metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                if message.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(message))
                }
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus text format.
    ///
    /// Returns `None` if this instance did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn describe_metrics() {
    describe_counter!(INTAKE_ACCEPTED, "Requests enqueued to the open queue");
    describe_counter!(INTAKE_REJECTED, "Requests refused at intake (too large to encode or enqueue failed)");
    describe_counter!(PROCESSOR_ACKED, "Messages acknowledged after their result was published");
    describe_counter!(PROCESSOR_DEAD_LETTERED, "Messages moved to the poison queue");
    describe_counter!(PROCESSOR_RELEASED, "Messages left for redelivery after a failure");
    describe_counter!(PROCESSOR_MEMO_HITS, "Redeliveries answered from the result memo");
    describe_histogram!(PROCESSOR_DURATION, "Time from lease to final disposition");
}

/// Intake metrics recorder.
pub struct IntakeMetrics;

impl IntakeMetrics {
    /// Record an accepted request.
    pub fn record_accepted() {
        counter!(INTAKE_ACCEPTED).increment(1);
    }

    /// Record a request refused because it could not be enqueued.
    pub fn record_rejected() {
        counter!(INTAKE_REJECTED).increment(1);
    }
}

/// Processor metrics recorder.
pub struct ProcessorMetrics;

impl ProcessorMetrics {
    /// Record an acknowledged message and how long it took.
    pub fn record_acked(outcome: Outcome, duration: Duration) {
        counter!(PROCESSOR_ACKED, "outcome" => outcome.as_str()).increment(1);
        histogram!(PROCESSOR_DURATION).record(duration.as_secs_f64());
    }

    /// Record a dead-lettered message.
    pub fn record_dead_lettered(reason: &'static str) {
        counter!(PROCESSOR_DEAD_LETTERED, "reason" => reason).increment(1);
    }

    /// Record a message left for redelivery.
    pub fn record_released() {
        counter!(PROCESSOR_RELEASED).increment(1);
    }

    /// Record a redelivery served from the result memo.
    pub fn record_memo_hit() {
        counter!(PROCESSOR_MEMO_HITS).increment(1);
    }
}
