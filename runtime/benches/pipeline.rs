//! Pipeline benchmarks
//!
//! Measures the per-message overhead of the relay against the in-memory
//! transport:
//! - Codec: envelope encode/decode
//! - Intake: one accepted request
//! - Processor: one request taken from lease to ack
//!
//! Run with: `cargo bench`

#![allow(missing_docs)] // Benchmarks don't need extensive docs
#![allow(clippy::expect_used)] // Benchmarks can use expect for setup

use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use request_relay_core::{CorrelationId, NameSource, RequestEnvelope, codec};
use request_relay_runtime::{AppendMarker, IntakeHandler, Processor, ProcessorConfig};
use request_relay_testing::{InMemoryQueue, SequentialIdGenerator, test_clock};
use std::sync::Arc;

fn benchmark_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");
    group.throughput(Throughput::Elements(1));

    let envelope = RequestEnvelope::new(
        CorrelationId::new("bench"),
        codec::encode_name(Some("Ada")).expect("encode name"),
        chrono::Utc::now(),
    );
    let bytes = codec::encode_request(&envelope).expect("encode envelope");

    group.bench_function("encode_request", |b| {
        b.iter(|| codec::encode_request(black_box(&envelope)));
    });
    group.bench_function("decode_request", |b| {
        b.iter(|| codec::decode_request(black_box(&bytes)));
    });

    group.finish();
}

fn benchmark_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline");
    group.throughput(Throughput::Elements(1));

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build runtime");

    group.bench_function("submit", |b| {
        let queue = Arc::new(InMemoryQueue::new());
        let intake = IntakeHandler::new(
            queue,
            Arc::new(test_clock()),
            Arc::new(SequentialIdGenerator::new()),
            "request_open",
        );

        b.to_async(&runtime).iter(|| async {
            let _ = intake
                .submit(black_box(NameSource::FromQuery("Ada".to_string())))
                .await;
        });
    });

    group.bench_function("submit_and_process", |b| {
        let queue = Arc::new(InMemoryQueue::new());
        let clock = Arc::new(test_clock());
        let intake = IntakeHandler::new(
            queue.clone(),
            clock.clone(),
            Arc::new(SequentialIdGenerator::new()),
            "request_open",
        );
        let processor = Processor::new(queue, clock, AppendMarker, ProcessorConfig::default());

        b.to_async(&runtime).iter(|| async {
            let _ = intake
                .submit(NameSource::FromQuery("Ada".to_string()))
                .await;
            let _ = processor.poll_once().await;
        });
    });

    group.finish();
}

criterion_group!(benches, benchmark_codec, benchmark_pipeline);
criterion_main!(benches);
