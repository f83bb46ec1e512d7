//! Wired-up ingestion pipeline over in-memory collaborators.

use std::{sync::Arc, time::Duration};

use tiergate_core::{Clock, TestClock};
use tiergate_pipeline::{
    DedupCache, EventQueue, FairnessPolicy, InMemoryDeadLetterStore, PipelineConfig,
    PipelineEngine, SignatureVerifier, WebhookReceiver,
};

use crate::{doubles::RecordingCommitter, fixtures::TEST_SECRET};

/// Settings for [`PipelineHarness`].
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Queue capacity.
    pub capacity: usize,
    /// Cross-partition policy.
    pub fairness: FairnessPolicy,
    /// Dedup entry lifetime.
    pub dedup_ttl: Duration,
    /// Worker settings.
    pub pipeline: PipelineConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            capacity: 1_000,
            fairness: FairnessPolicy::RoundRobin,
            dedup_ttl: Duration::from_secs(3600),
            pipeline: PipelineConfig {
                poll_interval: Duration::from_millis(10),
                ..PipelineConfig::default()
            },
        }
    }
}

/// Receiver, queue, engine and doubles sharing one [`TestClock`].
#[derive(Debug)]
pub struct PipelineHarness {
    /// Virtual clock driving dedup expiry and retry timers.
    pub clock: TestClock,
    /// Shared queue.
    pub queue: Arc<EventQueue>,
    /// Dedup cache behind the receiver.
    pub dedup: Arc<DedupCache>,
    /// Receiver signing with [`TEST_SECRET`].
    pub receiver: WebhookReceiver,
    /// Downstream double.
    pub committer: Arc<RecordingCommitter>,
    /// Dead-letter store.
    pub dead_letters: Arc<InMemoryDeadLetterStore>,
    /// Engine, not started.
    pub engine: PipelineEngine,
}

impl PipelineHarness {
    /// Harness with default settings and an always-succeeding committer.
    pub fn new() -> Self {
        Self::with(HarnessConfig::default(), RecordingCommitter::new())
    }

    /// Harness with explicit settings and committer.
    pub fn with(config: HarnessConfig, committer: RecordingCommitter) -> Self {
        let clock = TestClock::new();
        let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let queue = Arc::new(EventQueue::new(config.capacity, config.fairness));
        let dedup = Arc::new(DedupCache::new(config.dedup_ttl, shared_clock.clone()));
        let receiver = WebhookReceiver::new(
            SignatureVerifier::new(TEST_SECRET, Duration::from_secs(300)),
            dedup.clone(),
            queue.clone(),
            shared_clock.clone(),
        );
        let committer = Arc::new(committer);
        let dead_letters = Arc::new(InMemoryDeadLetterStore::with_clock(shared_clock.clone()));
        let engine = PipelineEngine::new(
            queue.clone(),
            committer.clone(),
            dead_letters.clone(),
            config.pipeline,
            shared_clock,
        );

        Self { clock, queue, dedup, receiver, committer, dead_letters, engine }
    }

    /// Processes batches on the calling task, flushing retry timers between
    /// rounds, until the queue is empty or `max_rounds` is reached. Returns
    /// the number of rounds run.
    pub async fn run_until_idle(&self, max_rounds: usize) -> usize {
        for round in 0..max_rounds {
            if self.queue.is_empty() {
                return round;
            }
            if self.engine.process_batch().await == 0 {
                self.engine.drain_retries().await;
            }
        }
        max_rounds
    }
}

impl Default for PipelineHarness {
    fn default() -> Self {
        Self::new()
    }
}
