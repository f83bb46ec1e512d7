//! Pipeline engine and per-event processing.
//!
//! Workers pull batches from the shared [`EventQueue`], hand each event to
//! the [`EventCommitter`] and record exactly one disposition per attempt:
//!
//! ```text
//!                 ┌──────────► Success ───────────► release partition
//!  dequeue ─► commit ──► RetryableFailure ─► RetryScheduler ─► timer ─► requeue
//!                 │                               └─ Exhausted ─┐
//!                 └──────────► PermanentFailure ────────────────┴─► DeadLetterStore ─► release
//! ```
//!
//! Workers never wait out a retry delay. A commit that exceeds
//! `commit_timeout` or panics counts as a retryable failure.

use std::{panic::AssertUnwindSafe, sync::Arc, time::Duration};

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tiergate_core::{
    Clock, CommitOutcome, CommittedEvent, DeadLetter, DeadLetteredEvent, EventHandler,
    InboundEvent, NoOpEventHandler, PipelineEvent, RetryScheduledEvent,
};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    commit::EventCommitter,
    dead_letter::DeadLetterStore,
    error::Result,
    queue::EventQueue,
    retry::{RetryDecision, RetryPolicy, RetryScheduler},
    worker_pool::WorkerPool,
};

/// Worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Number of concurrent workers.
    pub worker_count: usize,

    /// Maximum events claimed per batch.
    pub batch_size: usize,

    /// Longest an idle worker waits before polling the queue again.
    pub poll_interval: Duration,

    /// Deadline for a single commit call.
    pub commit_timeout: Duration,

    /// Backoff for retryable failures.
    pub retry_policy: RetryPolicy,

    /// Maximum time to wait for workers to finish on shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            worker_count: crate::DEFAULT_WORKER_COUNT,
            batch_size: crate::DEFAULT_BATCH_SIZE,
            poll_interval: Duration::from_millis(500),
            commit_timeout: Duration::from_secs(10),
            retry_policy: RetryPolicy::default(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Counters for pipeline monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    /// Workers currently running.
    pub active_workers: usize,
    /// Commit attempts finished.
    pub events_processed: u64,
    /// Successful commits.
    pub committed: u64,
    /// Retries scheduled.
    pub retries_scheduled: u64,
    /// Events dead-lettered.
    pub dead_lettered: u64,
    /// Commits that hit the deadline.
    pub commit_timeouts: u64,
    /// Commits currently running.
    pub in_flight: u64,
}

/// Collaborators shared by every worker.
#[derive(Debug)]
pub(crate) struct WorkerContext {
    pub(crate) queue: Arc<EventQueue>,
    pub(crate) committer: Arc<dyn EventCommitter>,
    pub(crate) dead_letters: Arc<dyn DeadLetterStore>,
    pub(crate) retry: RetryScheduler,
    pub(crate) config: PipelineConfig,
    pub(crate) stats: Arc<RwLock<PipelineStats>>,
    pub(crate) event_handler: Arc<dyn EventHandler>,
    pub(crate) clock: Arc<dyn Clock>,
}

/// Owns the worker pool and retry timers for one queue.
#[derive(Debug)]
pub struct PipelineEngine {
    context: Arc<WorkerContext>,
    cancellation_token: CancellationToken,
    worker_pool: Option<WorkerPool>,
}

impl PipelineEngine {
    /// Creates an engine that reports dispositions nowhere.
    pub fn new(
        queue: Arc<EventQueue>,
        committer: Arc<dyn EventCommitter>,
        dead_letters: Arc<dyn DeadLetterStore>,
        config: PipelineConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_event_handler(
            queue,
            committer,
            dead_letters,
            config,
            clock,
            Arc::new(NoOpEventHandler::new()),
        )
    }

    /// Creates an engine that reports every disposition to `event_handler`.
    pub fn with_event_handler(
        queue: Arc<EventQueue>,
        committer: Arc<dyn EventCommitter>,
        dead_letters: Arc<dyn DeadLetterStore>,
        config: PipelineConfig,
        clock: Arc<dyn Clock>,
        event_handler: Arc<dyn EventHandler>,
    ) -> Self {
        let cancellation_token = CancellationToken::new();
        let retry = RetryScheduler::new(
            config.retry_policy.clone(),
            queue.clone(),
            clock.clone(),
            cancellation_token.clone(),
        );

        let context = Arc::new(WorkerContext {
            queue,
            committer,
            dead_letters,
            retry,
            config,
            stats: Arc::new(RwLock::new(PipelineStats::default())),
            event_handler,
            clock,
        });

        Self { context, cancellation_token, worker_pool: None }
    }

    /// Spawns the configured workers. Returns once they are running.
    ///
    /// # Errors
    ///
    /// Returns error if the pool fails to spawn.
    pub async fn start(&mut self) -> Result<()> {
        info!(
            worker_count = self.context.config.worker_count,
            batch_size = self.context.config.batch_size,
            "starting pipeline engine"
        );

        let mut worker_pool =
            WorkerPool::new(self.context.clone(), self.cancellation_token.clone());
        worker_pool.spawn_workers().await?;
        self.worker_pool = Some(worker_pool);

        info!("pipeline engine started");
        Ok(())
    }

    /// Stops workers, then flushes pending retry timers back into the queue.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::ShutdownTimeout` if workers outlive the
    /// configured shutdown timeout.
    pub async fn shutdown(mut self) -> Result<()> {
        info!("shutting down pipeline engine");

        let result = match self.worker_pool.take() {
            Some(pool) => pool.shutdown_graceful(self.context.config.shutdown_timeout).await,
            None => {
                info!("pipeline engine was not started, shutdown completed immediately");
                self.cancellation_token.cancel();
                Ok(())
            },
        };

        self.context.retry.drain().await;
        result
    }

    /// Current counters.
    pub async fn stats(&self) -> PipelineStats {
        self.context.stats.read().await.clone()
    }

    /// Retry timers still pending.
    pub fn pending_retries(&self) -> usize {
        self.context.retry.pending()
    }

    /// Waits for every pending retry timer to fire.
    pub async fn drain_retries(&self) {
        self.context.retry.drain().await;
    }

    /// Processes exactly one batch on the calling task without starting
    /// background workers. Returns the number of events claimed.
    pub async fn process_batch(&self) -> usize {
        Worker::new(0, self.context.clone(), self.cancellation_token.clone()).process_batch().await
    }
}

/// One worker loop.
#[derive(Debug)]
pub(crate) struct Worker {
    id: usize,
    context: Arc<WorkerContext>,
    cancellation_token: CancellationToken,
}

impl Worker {
    pub(crate) fn new(
        id: usize,
        context: Arc<WorkerContext>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self { id, context, cancellation_token }
    }

    /// Claims and processes batches until cancelled.
    pub(crate) async fn run(&self) {
        info!(worker_id = self.id, "pipeline worker starting");

        loop {
            if self.cancellation_token.is_cancelled() {
                info!(worker_id = self.id, "pipeline worker received shutdown signal");
                break;
            }

            if self.process_batch().await == 0 {
                // Real-time wait: the queue wakes us on new work.
                tokio::select! {
                    () = self.context.queue.notified() => {},
                    () = tokio::time::sleep(self.context.config.poll_interval) => {},
                    () = self.cancellation_token.cancelled() => break,
                }
            }
        }

        info!(worker_id = self.id, "pipeline worker stopped");
    }

    /// Claims one batch and processes it. Events left unprocessed because of
    /// cancellation go back to the front of their partitions untouched.
    pub(crate) async fn process_batch(&self) -> usize {
        let events = self.context.queue.dequeue_batch(self.context.config.batch_size);
        let claimed = events.len();
        if claimed == 0 {
            return 0;
        }

        debug!(worker_id = self.id, batch_size = claimed, "processing event batch");

        for event in events {
            if self.cancellation_token.is_cancelled() {
                self.context.queue.requeue(event);
                continue;
            }
            self.process_event(event).await;
        }

        claimed
    }

    async fn process_event(&self, event: InboundEvent) {
        self.context.stats.write().await.in_flight += 1;

        let outcome = self.commit(&event).await;

        {
            let mut stats = self.context.stats.write().await;
            stats.in_flight -= 1;
            stats.events_processed += 1;
        }

        match outcome {
            CommitOutcome::Success => self.committed(event).await,
            CommitOutcome::RetryableFailure { reason } => {
                self.retry_or_exhaust(event, reason).await;
            },
            CommitOutcome::PermanentFailure { reason } => {
                warn!(
                    worker_id = self.id,
                    event_id = %event.event_id,
                    reason = %reason,
                    "commit failed permanently"
                );
                self.dead_letter(event, reason).await;
            },
        }
    }

    async fn commit(&self, event: &InboundEvent) -> CommitOutcome {
        let timeout = self.context.config.commit_timeout;
        let attempt = AssertUnwindSafe(self.context.committer.commit(event)).catch_unwind();

        match tokio::time::timeout(timeout, attempt).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_panic)) => {
                error!(worker_id = self.id, event_id = %event.event_id, "committer panicked");
                CommitOutcome::retryable("committer panicked")
            },
            Err(_elapsed) => {
                self.context.stats.write().await.commit_timeouts += 1;
                warn!(
                    worker_id = self.id,
                    event_id = %event.event_id,
                    timeout_ms = timeout.as_millis(),
                    "commit timed out"
                );
                let timeout_ms = timeout.as_millis();
                CommitOutcome::retryable(format!("commit timed out after {timeout_ms}ms"))
            },
        }
    }

    async fn committed(&self, event: InboundEvent) {
        self.context.queue.release(&event.partition_key);
        self.context.stats.write().await.committed += 1;

        info!(
            worker_id = self.id,
            event_id = %event.event_id,
            partition_key = %event.partition_key,
            attempt = event.attempt_count,
            "event committed"
        );

        self.context
            .event_handler
            .handle_event(PipelineEvent::Committed(CommittedEvent {
                event_id: event.event_id,
                partition_key: event.partition_key,
                attempt_count: event.attempt_count,
                committed_at: self.context.clock.now_utc(),
            }))
            .await;
    }

    async fn retry_or_exhaust(&self, event: InboundEvent, reason: String) {
        match self.context.retry.schedule(&event) {
            RetryDecision::Retry { after } => {
                let delay_ms = u64::try_from(after.as_millis()).unwrap_or(u64::MAX);
                let scheduled = PipelineEvent::RetryScheduled(RetryScheduledEvent {
                    event_id: event.event_id.clone(),
                    partition_key: event.partition_key.clone(),
                    attempt_count: event.attempt_count.saturating_add(1),
                    delay_ms,
                    reason: reason.clone(),
                });

                warn!(
                    worker_id = self.id,
                    event_id = %event.event_id,
                    attempt = event.attempt_count + 1,
                    delay_ms,
                    reason = %reason,
                    "commit failed, retry scheduled"
                );

                self.context.retry.retry_after(event, after);
                self.context.stats.write().await.retries_scheduled += 1;
                self.context.event_handler.handle_event(scheduled).await;
            },
            RetryDecision::Exhausted { reason: exhausted } => {
                error!(
                    worker_id = self.id,
                    event_id = %event.event_id,
                    attempt = event.attempt_count + 1,
                    reason = %reason,
                    "retries exhausted"
                );
                self.dead_letter(event, format!("{exhausted}; last error: {reason}")).await;
            },
        }
    }

    async fn dead_letter(&self, event: InboundEvent, reason: String) {
        match self.context.dead_letters.record(event.clone(), reason.clone()).await {
            Ok(letter) => dead_lettered(&self.context, letter).await,
            Err(e) => {
                // The disposition stands; only the store write is repeated.
                let interval = self.context.config.retry_policy.max_delay;
                error!(
                    worker_id = self.id,
                    event_id = %event.event_id,
                    error = %e,
                    retry_in_ms = interval.as_millis(),
                    "failed to record dead letter"
                );
                let write = retry_dead_letter(
                    self.context.clone(),
                    event,
                    reason,
                    interval,
                    self.cancellation_token.clone(),
                );
                self.context.retry.track(write);
            },
        }
    }
}

/// Releases the partition of a stored dead letter and reports it.
async fn dead_lettered(context: &WorkerContext, letter: DeadLetter) {
    context.queue.release(&letter.event.partition_key);
    context.stats.write().await.dead_lettered += 1;

    context
        .event_handler
        .handle_event(PipelineEvent::DeadLettered(DeadLetteredEvent {
            event_id: letter.event.event_id,
            partition_key: letter.event.partition_key,
            attempt_count: letter.event.attempt_count,
            reason: letter.reason,
            dead_lettered_at: letter.dead_lettered_at,
        }))
        .await;
}

/// Repeats a failed dead-letter write every `interval` until it lands,
/// holding the partition lock meanwhile. On cancellation one last write is
/// attempted before the partition is released.
async fn retry_dead_letter(
    context: Arc<WorkerContext>,
    event: InboundEvent,
    reason: String,
    interval: Duration,
    cancellation: CancellationToken,
) {
    let mut writes: u32 = 1;
    loop {
        let stopping = tokio::select! {
            () = context.clock.sleep(interval) => false,
            () = cancellation.cancelled() => true,
        };
        writes += 1;

        match context.dead_letters.record(event.clone(), reason.clone()).await {
            Ok(letter) => {
                info!(event_id = %event.event_id, writes, "dead letter recorded after retry");
                dead_lettered(&context, letter).await;
                return;
            },
            Err(e) if stopping => {
                error!(
                    event_id = %event.event_id,
                    partition_key = %event.partition_key,
                    error = %e,
                    "dead letter lost on shutdown"
                );
                context.queue.release(&event.partition_key);
                return;
            },
            Err(e) => {
                warn!(event_id = %event.event_id, error = %e, writes, "dead letter write failed");
            },
        }
    }
}
