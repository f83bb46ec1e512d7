//! Retry bounds and dead-letter routing through the full pipeline.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use std::time::Duration;

use proptest::prelude::*;
use tiergate_core::{CommitOutcome, EventId};
use tiergate_pipeline::{DeadLetterStore, PipelineConfig, RetryPolicy};
use tiergate_testing::{
    strategies::retry_policy, HarnessConfig, PipelineHarness, RecordingCommitter, WebhookBuilder,
};

fn harness_with(policy: RetryPolicy, committer: RecordingCommitter) -> PipelineHarness {
    PipelineHarness::with(
        HarnessConfig {
            pipeline: PipelineConfig { retry_policy: policy, ..PipelineConfig::default() },
            ..HarnessConfig::default()
        },
        committer,
    )
}

#[tokio::test]
async fn permanent_failure_dead_letters_without_retry() {
    let committer = RecordingCommitter::new().script(
        &EventId::from("evt_bad"),
        [CommitOutcome::permanent("HTTP 422: unknown record")],
    );
    let harness = harness_with(RetryPolicy::default(), committer);
    let webhook = WebhookBuilder::with_defaults().event_id("evt_bad").build();

    assert!(harness.receiver.submit(webhook.to_raw()).is_accepted());
    harness.run_until_idle(4).await;

    assert_eq!(harness.committer.times_called(&webhook.id()), 1);
    let letter = harness.dead_letters.get(&webhook.id()).await.unwrap().expect("dead-lettered");
    assert_eq!(letter.reason, "HTTP 422: unknown record");
    assert_eq!(letter.event.attempt_count, 0);
    assert_eq!(letter.event.raw_payload, webhook.body);
    assert!(harness.queue.is_empty());
}

#[tokio::test]
async fn recovered_event_is_not_dead_lettered() {
    let committer = RecordingCommitter::new().script(
        &EventId::from("evt_flaky"),
        [CommitOutcome::retryable("HTTP 503"), CommitOutcome::retryable("timeout")],
    );
    let harness = harness_with(RetryPolicy::default(), committer);
    let webhook = WebhookBuilder::with_defaults().event_id("evt_flaky").build();

    assert!(harness.receiver.submit(webhook.to_raw()).is_accepted());
    harness.run_until_idle(10).await;

    assert_eq!(harness.committer.times_called(&webhook.id()), 3);
    assert!(harness.committer.applied().contains(&webhook.id()));
    assert_eq!(harness.dead_letters.len().await.unwrap(), 0);

    let stats = harness.engine.stats().await;
    assert_eq!(stats.retries_scheduled, 2);
    assert_eq!(stats.committed, 1);
    // Virtual time moved by the two backoff delays.
    assert!(harness.clock.elapsed() >= Duration::from_secs(2));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// An event that never succeeds is attempted exactly `max_attempts`
    /// times and then dead-lettered once.
    #[test]
    fn retries_are_bounded_by_max_attempts(policy in retry_policy()) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let max_attempts = policy.max_attempts;
            let committer = RecordingCommitter::new()
                .script_all((0..max_attempts + 5).map(|_| CommitOutcome::retryable("HTTP 503")));
            let harness = harness_with(policy, committer);
            let webhook = WebhookBuilder::with_defaults().build();

            prop_assert!(harness.receiver.submit(webhook.to_raw()).is_accepted());
            harness.run_until_idle(2 * max_attempts as usize + 4).await;

            prop_assert_eq!(harness.committer.times_called(&webhook.id()), max_attempts as usize);
            prop_assert_eq!(harness.dead_letters.len().await.unwrap(), 1);

            let letter = harness.dead_letters.get(&webhook.id()).await.unwrap().unwrap();
            prop_assert_eq!(letter.event.attempt_count, max_attempts - 1);
            prop_assert!(harness.queue.is_empty());
            Ok(())
        })?;
    }
}
