//! Performance benchmarks for the gateway's hot paths.
//!
//! These benchmarks track the in-process costs that sit on every request:
//! - Signature verification per payload size
//! - Webhook intake (verify, dedup, enqueue) end to end
//! - Tier selection with many breakers
//! - Queue enqueue/dequeue under partition contention
//! - Backoff calculation

use std::{hint::black_box, sync::Arc, time::Duration};

use chrono::Utc;
use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use tiergate_api::{Config, Gateway};
use tiergate_core::{CircuitState, Clock, TestClock, TierName};
use tiergate_pipeline::{sign, EventQueue, FairnessPolicy, RetryPolicy, SignatureVerifier};
use tiergate_router::{CircuitBreaker, CircuitConfig, TierRouter};
use tiergate_testing::{
    bulk_tier, rest_tier, EventBuilder, OperationBuilder, RecordingCommitter, ScriptedTierClient,
    WebhookBuilder, TEST_SECRET,
};

/// Benchmarks HMAC verification across payload sizes.
fn bench_signature_verification(c: &mut Criterion) {
    let verifier = SignatureVerifier::new(TEST_SECRET, Duration::from_secs(300));
    let mut group = c.benchmark_group("signature");

    for size in [256, 4_096, 65_536, 1_048_576] {
        let payload = vec![b'a'; size];
        let header = sign(&payload, TEST_SECRET).unwrap();
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("verify", size), &payload, |b, payload| {
            b.iter(|| {
                verifier
                    .verify(black_box("stripe"), black_box(payload), Some(&header), Utc::now())
                    .unwrap();
            });
        });
    }

    group.finish();
}

/// Benchmarks full webhook intake through the gateway.
fn bench_webhook_intake(c: &mut Criterion) {
    let mut group = c.benchmark_group("intake");
    group.throughput(Throughput::Elements(1));

    group.bench_function("submit_webhook", |b| {
        b.iter_batched(
            || {
                let config = Config {
                    webhook_secret: TEST_SECRET.to_string(),
                    queue_capacity: 1_000_000,
                    ..Config::default()
                };
                let gateway = Gateway::builder(config, Arc::new(TestClock::new()))
                    .committer(Arc::new(RecordingCommitter::new()))
                    .build()
                    .unwrap();
                let webhook = WebhookBuilder::with_defaults().build().to_raw();
                (gateway, webhook)
            },
            |(gateway, webhook)| black_box(gateway.submit_webhook(webhook)),
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

/// Benchmarks tier selection as the tier count grows.
fn bench_routing(c: &mut Criterion) {
    let mut group = c.benchmark_group("routing");
    let clock: Arc<dyn Clock> = Arc::new(TestClock::new());

    for tiers in [2, 8, 32] {
        let router = (0..tiers)
            .fold(TierRouter::builder(CircuitConfig::default(), clock.clone()), |builder, i| {
                let name = format!("tier_{i}");
                let descriptor =
                    if i % 2 == 0 { rest_tier(&name, i) } else { bulk_tier(&name, i) };
                builder.tier(descriptor, Arc::new(ScriptedTierClient::always_ok()))
            })
            .build()
            .unwrap();
        let operation = OperationBuilder::bulk(100).build();

        group.bench_with_input(BenchmarkId::new("route", tiers), &router, |b, router| {
            b.iter(|| {
                let lease = router.route(black_box(&operation)).unwrap();
                lease.record_success();
            });
        });
    }

    group.finish();
}

/// Benchmarks breaker bookkeeping on the success path.
fn bench_circuit_breaker(c: &mut Criterion) {
    let breaker = CircuitBreaker::new(
        TierName::from("rest"),
        CircuitConfig::default(),
        Arc::new(TestClock::new()),
    );

    c.bench_function("circuit_breaker/acquire_success", |b| {
        b.iter(|| {
            let permit = breaker.try_acquire().unwrap();
            breaker.record_success(permit);
            black_box(breaker.state() == CircuitState::Closed)
        });
    });
}

/// Benchmarks queue throughput with varying partition spread.
fn bench_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue");

    for partitions in [1, 16, 256] {
        let events: Vec<_> = (0..1_000)
            .map(|i| {
                EventBuilder::with_defaults()
                    .id(format!("evt_{i}"))
                    .partition(format!("p_{}", i % partitions))
                    .build()
            })
            .collect();
        group.throughput(Throughput::Elements(events.len() as u64));

        group.bench_with_input(
            BenchmarkId::new("enqueue_drain", partitions),
            &events,
            |b, events| {
                b.iter_batched(
                    || events.clone(),
                    |events| {
                        let queue = EventQueue::new(events.len(), FairnessPolicy::RoundRobin);
                        for event in events {
                            queue.enqueue(event).unwrap();
                        }
                        while !queue.is_empty() {
                            for event in queue.dequeue_batch(64) {
                                queue.release(&event.partition_key);
                            }
                        }
                    },
                    BatchSize::SmallInput,
                );
            },
        );
    }

    group.finish();
}

/// Benchmarks backoff calculation across attempts.
fn bench_backoff_calculation(c: &mut Criterion) {
    let policy = RetryPolicy::default();

    c.bench_function("retry/delay_for", |b| {
        b.iter(|| {
            for attempt in 0..policy.max_attempts {
                black_box(policy.delay_for(black_box(attempt)));
            }
        });
    });
}

criterion_group!(
    benches,
    bench_signature_verification,
    bench_webhook_intake,
    bench_routing,
    bench_circuit_breaker,
    bench_queue,
    bench_backoff_calculation,
);
criterion_main!(benches);
