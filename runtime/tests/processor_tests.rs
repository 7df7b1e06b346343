//! Integration tests for the processor stage against the in-memory transport.
//!
//! Covers the happy path, ordering of publish and acknowledge, redelivery,
//! and poison routing.

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::expect_used)] // Tests can expect

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use request_relay_core::environment::Clock;
use request_relay_core::transport::TransportFuture;
use request_relay_core::{
    CorrelationId, DeliveryReceipt, LeasedMessage, NameSource, Outcome, QueueTransport,
    RequestEnvelope, codec,
};
use request_relay_runtime::{
    AppendMarker, DeadLetterReason, Disposition, IntakeHandler, MessageState, Processor,
    ProcessorConfig, RetryPolicy, Transform, TransformError,
};
use request_relay_testing::properties::name_strategy;
use request_relay_testing::{InMemoryQueue, SequentialIdGenerator, test_clock};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const OPEN: &str = "request_open";
const PROCESSED: &str = "request_processed";

fn fast_config() -> ProcessorConfig {
    ProcessorConfig {
        poll_interval: Duration::from_millis(10),
        retry: RetryPolicy::builder()
            .max_retries(2)
            .initial_delay(Duration::from_millis(1))
            .jitter(false)
            .build(),
        ..ProcessorConfig::default()
    }
}

struct Pipeline<T = AppendMarker> {
    queue: Arc<InMemoryQueue>,
    intake: IntakeHandler,
    processor: Processor<T>,
}

fn pipeline(config: ProcessorConfig) -> Pipeline {
    pipeline_with(config, Arc::new(test_clock()), AppendMarker)
}

fn pipeline_with<T: Transform>(
    config: ProcessorConfig,
    clock: Arc<dyn Clock>,
    transform: T,
) -> Pipeline<T> {
    let queue = Arc::new(InMemoryQueue::new());
    let intake = IntakeHandler::new(
        queue.clone(),
        Arc::new(test_clock()),
        Arc::new(SequentialIdGenerator::new()),
        OPEN,
    );
    let processor = Processor::new(queue.clone(), clock, transform, config);
    Pipeline {
        queue,
        intake,
        processor,
    }
}

impl<T: Transform> Pipeline<T> {
    async fn submit(&self, name: &str) -> CorrelationId {
        self.intake
            .submit(NameSource::FromQuery(name.to_string()))
            .await
            .unwrap()
            .correlation_id
    }
}

/// Clock that moves forward one second every time it is read.
struct TickingClock {
    base: DateTime<Utc>,
    ticks: AtomicI64,
}

impl TickingClock {
    fn new() -> Self {
        Self {
            base: test_clock().now(),
            ticks: AtomicI64::new(0),
        }
    }
}

impl Clock for TickingClock {
    fn now(&self) -> DateTime<Utc> {
        let tick = self.ticks.fetch_add(1, Ordering::SeqCst);
        self.base + ChronoDuration::seconds(tick)
    }
}

/// Transform that always fails without classifying the error.
struct Flaky;

impl Transform for Flaky {
    fn apply(&self, _name: Option<&str>) -> Result<Vec<u8>, TransformError> {
        Err(TransformError::Unclassified("downstream dependency down".to_string()))
    }
}

/// Records the order of transport calls, delegating to an in-memory queue.
struct RecordingQueue {
    inner: InMemoryQueue,
    calls: Mutex<Vec<String>>,
}

impl RecordingQueue {
    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl QueueTransport for RecordingQueue {
    fn enqueue(&self, queue: &str, body: &[u8]) -> TransportFuture<'_, ()> {
        self.record(format!("enqueue:{queue}"));
        self.inner.enqueue(queue, body)
    }

    fn dequeue_lease(
        &self,
        queue: &str,
        visibility_timeout: Duration,
    ) -> TransportFuture<'_, Option<LeasedMessage>> {
        self.inner.dequeue_lease(queue, visibility_timeout)
    }

    fn acknowledge(&self, receipt: &DeliveryReceipt) -> TransportFuture<'_, ()> {
        self.record(format!("acknowledge:{}", receipt.queue()));
        self.inner.acknowledge(receipt)
    }

    fn dead_letter(&self, receipt: &DeliveryReceipt, body: &[u8]) -> TransportFuture<'_, ()> {
        self.record(format!("dead_letter:{}", receipt.queue()));
        self.inner.dead_letter(receipt, body)
    }
}

#[tokio::test]
async fn named_request_is_processed_published_and_acked() {
    let p = pipeline(fast_config());
    let id = p.submit("Ada").await;

    let disposition = p.processor.poll_once().await.unwrap();

    assert_eq!(disposition, Disposition::Acked(Outcome::Success));
    assert!(p.queue.is_empty(OPEN));

    let results = p.queue.messages(PROCESSED);
    assert_eq!(results.len(), 1);
    let result = codec::decode_result(&results[0]).unwrap();
    assert_eq!(result.correlation_id(), &id);
    assert_eq!(result.result_text(), Some("Ada got processed"));
    assert_eq!(result.outcome(), Outcome::Success);
    assert_eq!(result.processed_at(), test_clock().now());
}

#[tokio::test]
async fn absent_name_publishes_failure_result() {
    let p = pipeline(fast_config());
    p.intake.submit(NameSource::Absent).await.unwrap();

    let disposition = p.processor.poll_once().await.unwrap();

    assert_eq!(disposition, Disposition::Acked(Outcome::Failure));
    let result = codec::decode_result(&p.queue.messages(PROCESSED)[0]).unwrap();
    assert_eq!(result.outcome(), Outcome::Failure);
    assert_eq!(result.result_text(), Some("no name supplied"));
    assert!(p.queue.is_empty(OPEN));
}

#[tokio::test]
async fn result_is_published_before_the_original_is_acknowledged() {
    let recording = Arc::new(RecordingQueue {
        inner: InMemoryQueue::new(),
        calls: Mutex::new(Vec::new()),
    });
    let intake = IntakeHandler::new(
        recording.clone(),
        Arc::new(test_clock()),
        Arc::new(SequentialIdGenerator::new()),
        OPEN,
    );
    let processor = Processor::new(
        recording.clone(),
        Arc::new(test_clock()),
        AppendMarker,
        fast_config(),
    );

    intake
        .submit(NameSource::FromQuery("Ada".to_string()))
        .await
        .unwrap();
    processor.poll_once().await.unwrap();

    assert_eq!(
        *recording.calls.lock().unwrap(),
        vec![
            format!("enqueue:{OPEN}"),
            format!("enqueue:{PROCESSED}"),
            format!("acknowledge:{OPEN}"),
        ]
    );
}

#[tokio::test]
async fn empty_queue_is_idle() {
    let p = pipeline(fast_config());
    assert_eq!(p.processor.poll_once().await.unwrap(), Disposition::Idle);
}

#[tokio::test]
async fn dequeue_error_is_returned_to_the_loop() {
    let p = pipeline(fast_config());
    p.queue.fail_next_dequeues(1);

    assert!(p.processor.poll_once().await.is_err());
    assert_eq!(p.processor.poll_once().await.unwrap(), Disposition::Idle);
}

#[tokio::test]
async fn publish_failure_leaves_original_unacknowledged() {
    let p = pipeline(fast_config());
    p.submit("Ada").await;
    p.queue.fail_enqueues(PROCESSED);

    let disposition = p.processor.poll_once().await.unwrap();

    assert_eq!(disposition, Disposition::Released(MessageState::Transformed));
    assert_eq!(p.queue.len(OPEN), 1, "original must not be acknowledged");
    assert!(p.queue.is_empty(PROCESSED));
    assert_eq!(p.queue.enqueue_attempts(PROCESSED), 3, "first try plus two retries");

    // Once the downstream queue recovers, the redelivered message completes.
    p.queue.heal_enqueues(PROCESSED);
    p.queue.expire_leases(OPEN);

    let disposition = p.processor.poll_once().await.unwrap();
    assert_eq!(disposition, Disposition::Acked(Outcome::Success));
    assert_eq!(p.queue.len(PROCESSED), 1);
    assert!(p.queue.is_empty(OPEN));
}

#[tokio::test]
async fn transient_publish_failure_is_retried_within_one_delivery() {
    let p = pipeline(fast_config());
    p.submit("Ada").await;
    p.queue.fail_next_enqueues(PROCESSED, 2);

    let disposition = p.processor.poll_once().await.unwrap();

    assert_eq!(disposition, Disposition::Acked(Outcome::Success));
    assert_eq!(p.queue.len(PROCESSED), 1);
}

#[tokio::test]
async fn persistent_publish_failure_ends_in_dead_letter() {
    let config = ProcessorConfig {
        max_delivery_attempts: 2,
        ..fast_config()
    };
    let p = pipeline(config);
    p.submit("Ada").await;
    let original = p.queue.messages(OPEN);
    p.queue.fail_enqueues(PROCESSED);

    for _ in 0..2 {
        let disposition = p.processor.poll_once().await.unwrap();
        assert_eq!(disposition, Disposition::Released(MessageState::Transformed));
        p.queue.expire_leases(OPEN);
    }

    let disposition = p.processor.poll_once().await.unwrap();

    assert_eq!(
        disposition,
        Disposition::DeadLettered(DeadLetterReason::DeliveryBudgetExhausted)
    );
    assert!(p.queue.is_empty(OPEN));
    assert_eq!(p.queue.dead_letters(OPEN), original, "never silently dropped");
}

#[tokio::test]
async fn redelivery_after_failed_ack_republishes_identical_bytes() {
    let p = pipeline_with(fast_config(), Arc::new(TickingClock::new()), AppendMarker);
    p.submit("Ada").await;
    p.queue.fail_next_acknowledges(3);

    let first = p.processor.poll_once().await.unwrap();
    assert_eq!(first, Disposition::Released(MessageState::Published));
    assert_eq!(p.queue.len(OPEN), 1);

    p.queue.expire_leases(OPEN);
    let second = p.processor.poll_once().await.unwrap();
    assert_eq!(second, Disposition::Acked(Outcome::Success));

    let results = p.queue.messages(PROCESSED);
    assert_eq!(results.len(), 2);
    assert_eq!(results[0], results[1], "redelivery must not change the result");
}

#[tokio::test]
async fn without_memo_redelivery_still_carries_same_result_text() {
    let config = ProcessorConfig {
        memo_capacity: 0,
        ..fast_config()
    };
    let p = pipeline_with(config, Arc::new(TickingClock::new()), AppendMarker);
    let id = p.submit("Ada").await;
    p.queue.fail_next_acknowledges(3);

    p.processor.poll_once().await.unwrap();
    p.queue.expire_leases(OPEN);
    p.processor.poll_once().await.unwrap();

    let results: Vec<_> = p
        .queue
        .messages(PROCESSED)
        .iter()
        .map(|bytes| codec::decode_result(bytes).unwrap())
        .collect();
    assert_eq!(results.len(), 2);
    for result in &results {
        assert_eq!(result.correlation_id(), &id);
        assert_eq!(result.result_text(), Some("Ada got processed"));
    }
}

#[tokio::test]
async fn undecodable_message_is_dead_lettered_without_blocking() {
    let p = pipeline(fast_config());
    p.queue.enqueue(OPEN, b"\xde\xad\xbe\xef").await.unwrap();
    p.submit("Ada").await;

    let first = p.processor.poll_once().await.unwrap();
    let second = p.processor.poll_once().await.unwrap();

    assert_eq!(
        first,
        Disposition::DeadLettered(DeadLetterReason::MalformedPayload)
    );
    assert_eq!(second, Disposition::Acked(Outcome::Success));
    assert_eq!(p.queue.dead_letters(OPEN), vec![b"\xde\xad\xbe\xef".to_vec()]);
    assert_eq!(p.queue.len(PROCESSED), 1);
}

#[tokio::test]
async fn malformed_payload_inside_valid_envelope_is_dead_lettered() {
    let p = pipeline(fast_config());
    let envelope = RequestEnvelope::new(
        CorrelationId::new("corr-x"),
        b"Ada".to_vec(),
        test_clock().now(),
    );
    p.queue
        .enqueue(OPEN, &codec::encode_request(&envelope).unwrap())
        .await
        .unwrap();

    let disposition = p.processor.poll_once().await.unwrap();

    assert_eq!(
        disposition,
        Disposition::DeadLettered(DeadLetterReason::MalformedPayload)
    );
    assert!(p.queue.is_empty(PROCESSED));
}

#[tokio::test]
async fn unclassified_transform_error_leaves_message_for_redelivery() {
    let p = pipeline_with(fast_config(), Arc::new(test_clock()), Flaky);
    p.submit("Ada").await;

    let disposition = p.processor.poll_once().await.unwrap();

    assert_eq!(disposition, Disposition::Released(MessageState::Leased));
    assert_eq!(p.queue.len(OPEN), 1);
    assert!(p.queue.is_empty(PROCESSED));
}

#[tokio::test]
async fn failed_dead_letter_leaves_message_for_redelivery() {
    let p = pipeline(fast_config());
    p.queue.enqueue(OPEN, b"garbage").await.unwrap();
    p.queue.fail_next_dead_letters(3);

    let disposition = p.processor.poll_once().await.unwrap();

    assert_eq!(disposition, Disposition::Released(MessageState::Leased));
    assert_eq!(p.queue.len(OPEN), 1);
    assert!(p.queue.dead_letters(OPEN).is_empty());
}

#[tokio::test]
async fn workers_drain_the_queue_and_stop_on_shutdown() {
    let config = ProcessorConfig {
        concurrency: 3,
        ..fast_config()
    };
    let queue = Arc::new(InMemoryQueue::new());
    let intake = IntakeHandler::new(
        queue.clone(),
        Arc::new(test_clock()),
        Arc::new(SequentialIdGenerator::new()),
        OPEN,
    );
    let processor = Arc::new(Processor::new(
        queue.clone(),
        Arc::new(test_clock()),
        AppendMarker,
        config,
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let workers = processor.spawn_workers(&shutdown_rx);
    assert_eq!(workers.len(), 3);

    for n in 0..10 {
        intake
            .submit(NameSource::FromQuery(format!("caller-{n}")))
            .await
            .unwrap();
    }

    tokio::time::timeout(Duration::from_secs(5), async {
        while queue.len(PROCESSED) < 10 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("workers should drain the queue");

    shutdown_tx.send(true).unwrap();
    for worker in workers {
        tokio::time::timeout(Duration::from_secs(1), worker)
            .await
            .expect("worker should stop")
            .unwrap();
    }

    assert!(queue.is_empty(OPEN));
    assert_eq!(queue.len(PROCESSED), 10);
}

proptest::proptest! {
    #[test]
    fn every_name_round_trips_to_its_processed_form(name in name_strategy()) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let p = pipeline(fast_config());
            let id = p.submit(&name).await;
            p.processor.poll_once().await.unwrap();

            let result = codec::decode_result(&p.queue.messages(PROCESSED)[0]).unwrap();
            assert_eq!(result.correlation_id(), &id);
            assert_eq!(result.result_text(), Some(format!("{name} got processed").as_str()));
        });
    }
}
