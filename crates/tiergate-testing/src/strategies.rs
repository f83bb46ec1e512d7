//! Proptest strategies for tiergate domain values.

use std::time::Duration;

use proptest::prelude::*;
use serde_json::json;
use tiergate_core::{Operation, OperationKind, TierDescriptor, TierName};
use tiergate_pipeline::RetryPolicy;

/// Sender-style event ids.
pub fn event_id() -> impl Strategy<Value = String> {
    "evt_[0-9a-f]{12}"
}

/// Either operation kind.
pub fn operation_kind() -> impl Strategy<Value = OperationKind> {
    prop_oneof![Just(OperationKind::SingleRecord), Just(OperationKind::Bulk)]
}

/// Operations with record counts up to 50k.
pub fn operation() -> impl Strategy<Value = Operation> {
    (operation_kind(), 1u64..50_000)
        .prop_map(|(kind, count)| Operation::new(kind, count, json!({"records": count})))
}

/// Tier descriptors with at least one supported kind.
pub fn tier_descriptor() -> impl Strategy<Value = TierDescriptor> {
    let kinds =
        prop::sample::subsequence(vec![OperationKind::SingleRecord, OperationKind::Bulk], 1..=2);

    ("[a-z]{3,8}", 0u32..5, 1u64..20_000, kinds).prop_map(
        |(name, priority, max_records_per_call, supported_kinds)| TierDescriptor {
            name: TierName::from(name),
            priority,
            max_records_per_call,
            supported_kinds,
        },
    )
}

/// Sequence of `(partition, sequence number within partition)` pairs over
/// at most `keys` partitions, in arrival order.
pub fn keyed_arrivals(
    keys: usize,
    max_events: usize,
) -> impl Strategy<Value = Vec<(String, usize)>> {
    prop::collection::vec(0..keys.max(1), 1..=max_events.max(1)).prop_map(|picks| {
        let mut counters = vec![0usize; picks.iter().copied().max().unwrap_or(0) + 1];
        picks
            .into_iter()
            .map(|key| {
                let seq = counters[key];
                counters[key] += 1;
                (format!("acct_{key}"), seq)
            })
            .collect()
    })
}

/// Retry policies within sane operating ranges.
pub fn retry_policy() -> impl Strategy<Value = RetryPolicy> {
    (1u32..12, 1u64..5_000, 1.0f64..4.0, 1u64..600, 0.0f64..=1.0).prop_map(
        |(max_attempts, base_ms, multiplier, max_secs, jitter_factor)| RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(base_ms),
            multiplier,
            max_delay: Duration::from_secs(max_secs),
            jitter_factor,
        },
    )
}

/// Arbitrary bytes biased towards JSON-looking envelopes.
pub fn webhook_body() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        prop::collection::vec(any::<u8>(), 0..256),
        (event_id(), proptest::option::of("[a-z0-9_]{1,12}")).prop_map(|(id, key)| {
            let mut body = json!({"event_id": id, "type": "record.updated"});
            if let Some(key) = key {
                body["partition_key"] = json!(key);
            }
            body.to_string().into_bytes()
        }),
    ]
}
