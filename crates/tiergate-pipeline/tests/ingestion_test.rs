//! Webhook ingestion: verification, deduplication and backpressure.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use std::{sync::Arc, time::Duration};

use tiergate_core::{Clock, EventId};
use tiergate_pipeline::{RejectReason, SubmitOutcome};
use tiergate_testing::{HarnessConfig, PipelineHarness, WebhookBuilder};

fn small_queue(capacity: usize) -> PipelineHarness {
    PipelineHarness::with(
        HarnessConfig { capacity, ..HarnessConfig::default() },
        tiergate_testing::RecordingCommitter::new(),
    )
}

#[tokio::test]
async fn full_queue_rejects_without_consuming_dedup_entry() {
    let harness = small_queue(3);
    for _ in 0..3 {
        let webhook = WebhookBuilder::with_defaults().build();
        assert!(harness.receiver.submit(webhook.to_raw()).is_accepted());
    }

    let overflow = WebhookBuilder::with_defaults().event_id("evt_overflow").build();
    assert_eq!(
        harness.receiver.submit(overflow.to_raw()),
        SubmitOutcome::Rejected(RejectReason::Backpressure)
    );
    assert!(!harness.dedup.contains(&overflow.id()));
    assert_eq!(harness.queue.len(), 3);

    // Draining one event frees a slot; the sender's retry is not a duplicate.
    assert!(harness.engine.process_batch().await > 0);
    assert!(harness.receiver.submit(overflow.to_raw()).is_accepted());
    assert_eq!(harness.receiver.stats().backpressured, 1);
}

#[tokio::test]
async fn redelivery_within_window_is_acknowledged_once() {
    let harness = PipelineHarness::new();
    let webhook = WebhookBuilder::with_defaults().event_id("evt_repeat").build();

    assert!(harness.receiver.submit(webhook.to_raw()).is_accepted());
    harness.run_until_idle(4).await;

    let outcome = harness.receiver.submit(webhook.to_raw());
    assert_eq!(
        outcome,
        SubmitOutcome::Rejected(RejectReason::Duplicate { event_id: EventId::from("evt_repeat") })
    );
    harness.run_until_idle(4).await;
    assert_eq!(harness.committer.times_called(&webhook.id()), 1);
}

#[tokio::test]
async fn expired_dedup_entry_admits_redelivery_and_commit_stays_idempotent() {
    let harness = PipelineHarness::with(
        HarnessConfig { dedup_ttl: Duration::from_secs(60), ..HarnessConfig::default() },
        tiergate_testing::RecordingCommitter::new(),
    );
    let webhook = WebhookBuilder::with_defaults().event_id("evt_late").build();

    assert!(harness.receiver.submit(webhook.to_raw()).is_accepted());
    harness.run_until_idle(4).await;

    harness.clock.advance(Duration::from_secs(61));
    assert!(harness.receiver.submit(webhook.to_raw()).is_accepted());
    harness.run_until_idle(4).await;

    // Delivered twice, applied once.
    assert_eq!(harness.committer.times_called(&webhook.id()), 2);
    assert_eq!(harness.committer.applied().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_duplicates_admit_exactly_one() {
    let PipelineHarness { receiver, queue, .. } = PipelineHarness::new();
    let receiver = Arc::new(receiver);
    let webhook = WebhookBuilder::with_defaults().event_id("evt_race").build();

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let receiver = receiver.clone();
            let raw = webhook.to_raw();
            tokio::spawn(async move { receiver.submit(raw) })
        })
        .collect();

    let mut accepted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            SubmitOutcome::Accepted { .. } => accepted += 1,
            SubmitOutcome::Rejected(reason) => {
                assert!(matches!(reason, RejectReason::Duplicate { .. }), "{reason:?}");
            },
        }
    }

    assert_eq!(accepted, 1);
    assert_eq!(queue.len(), 1);
}

#[tokio::test]
async fn bad_signature_leaves_no_trace() {
    let harness = PipelineHarness::new();
    let forged = WebhookBuilder::with_defaults().secret("not-the-secret").build();
    let unsigned = WebhookBuilder::with_defaults().unsigned().build();

    for webhook in [&forged, &unsigned] {
        assert_eq!(
            harness.receiver.submit(webhook.to_raw()),
            SubmitOutcome::Rejected(RejectReason::InvalidSignature)
        );
        assert!(!harness.dedup.contains(&webhook.id()));
    }
    assert!(harness.queue.is_empty());
    assert_eq!(harness.receiver.stats().invalid_signatures, 2);
}

#[tokio::test]
async fn timestamped_signatures_outside_tolerance_are_rejected() {
    let harness = PipelineHarness::new();
    let now = harness.clock.now_utc();

    let fresh = WebhookBuilder::with_defaults().timestamped(now).build();
    let stale =
        WebhookBuilder::with_defaults().timestamped(now - chrono::Duration::minutes(10)).build();

    assert!(harness.receiver.submit(fresh.to_raw()).is_accepted());
    assert_eq!(
        harness.receiver.submit(stale.to_raw()),
        SubmitOutcome::Rejected(RejectReason::InvalidSignature)
    );
}

#[tokio::test]
async fn ids_from_headers_partition_events() {
    let harness = PipelineHarness::new();
    let webhook = WebhookBuilder::with_defaults()
        .event_id("evt_hdr")
        .partition_key("acct_7")
        .ids_in_headers()
        .build();

    assert!(harness.receiver.submit(webhook.to_raw()).is_accepted());
    harness.run_until_idle(4).await;

    let calls = harness.committer.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].event_id.as_str(), "evt_hdr");
    assert_eq!(calls[0].partition_key.as_str(), "acct_7");
}
