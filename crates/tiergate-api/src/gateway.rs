//! Gateway facade tying outbound routing and inbound ingestion together.
//!
//! Callers see three entry points: [`Gateway::route`] / [`Gateway::execute`]
//! for outbound work, [`Gateway::submit_webhook`] for inbound deliveries, and
//! [`Gateway::commit`] for handing a processed event to the downstream
//! collaborator. Everything else is operator surface: dead-letter inspection
//! and replay, breaker snapshots and counters.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::Context;
use tiergate_core::{
    Clock, CommitOutcome, DeadLetter, EventHandler, EventId, GatewayError, InboundEvent,
    NoOpEventHandler, Operation, TierDescriptor,
};
use tiergate_pipeline::{
    DedupCache, DeadLetterStore, EventCommitter, EventQueue, FairnessPolicy,
    InMemoryDeadLetterStore, PipelineConfig, PipelineEngine, PipelineStats, QueueStats,
    RawWebhook, ReceiverStats, RejectReason, SubmitOutcome, WebhookReceiver,
};
use tiergate_router::{CircuitSnapshot, TierClient, TierExecution, TierLease, TierRouter};
use tokio::sync::Mutex;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{info, warn};

use crate::config::Config;

/// Collects the collaborators a [`Gateway`] needs.
///
/// Everything except the tiers and the committer has a default derived from
/// [`Config`].
#[derive(Debug)]
pub struct GatewayBuilder {
    config: Config,
    clock: Arc<dyn Clock>,
    tiers: Vec<(TierDescriptor, Arc<dyn TierClient>)>,
    committer: Option<Arc<dyn EventCommitter>>,
    dead_letters: Option<Arc<dyn DeadLetterStore>>,
    event_handler: Arc<dyn EventHandler>,
    pipeline: Option<PipelineConfig>,
}

impl GatewayBuilder {
    /// Registers a tier. Declaration order breaks routing ties.
    #[must_use]
    pub fn tier(mut self, descriptor: TierDescriptor, client: Arc<dyn TierClient>) -> Self {
        self.tiers.push((descriptor, client));
        self
    }

    /// Sets the downstream commit collaborator.
    #[must_use]
    pub fn committer(mut self, committer: Arc<dyn EventCommitter>) -> Self {
        self.committer = Some(committer);
        self
    }

    /// Replaces the in-memory dead-letter store.
    #[must_use]
    pub fn dead_letters(mut self, store: Arc<dyn DeadLetterStore>) -> Self {
        self.dead_letters = Some(store);
        self
    }

    /// Observer for pipeline dispositions.
    #[must_use]
    pub fn event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = handler;
        self
    }

    /// Overrides the worker settings derived from the configuration.
    #[must_use]
    pub fn pipeline_config(mut self, pipeline: PipelineConfig) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    /// Wires the router, receiver, queue and worker engine.
    ///
    /// # Errors
    ///
    /// Returns error if no committer was supplied or the tiers are invalid.
    pub fn build(self) -> anyhow::Result<Gateway> {
        let Self { config, clock, tiers, committer, dead_letters, event_handler, pipeline } =
            self;
        let committer = committer.context("a commit collaborator is required")?;

        let router = tiers
            .into_iter()
            .fold(
                TierRouter::builder(config.to_circuit_config(), clock.clone()),
                |builder, (descriptor, client)| builder.tier(descriptor, client),
            )
            .build()
            .context("invalid tier configuration")?;

        let queue = Arc::new(EventQueue::new(config.queue_capacity, config.queue_fairness));
        let dedup = Arc::new(DedupCache::new(config.dedup_ttl(), clock.clone()));
        let receiver = WebhookReceiver::new(
            config.to_signature_verifier(),
            dedup.clone(),
            queue.clone(),
            clock.clone(),
        );
        let dead_letters = dead_letters
            .unwrap_or_else(|| Arc::new(InMemoryDeadLetterStore::with_clock(clock.clone())));
        let engine = PipelineEngine::with_event_handler(
            queue.clone(),
            committer.clone(),
            dead_letters.clone(),
            pipeline.unwrap_or_else(|| config.to_pipeline_config()),
            clock.clone(),
            event_handler,
        );

        Ok(Gateway {
            router,
            receiver,
            queue,
            dedup,
            committer,
            dead_letters,
            engine: Mutex::new(Some(engine)),
            started: AtomicBool::new(false),
            clock,
            outbound_timeout: config.outbound_timeout(),
            dedup_sweep_interval: config.dedup_sweep_interval(),
            signature_header: config.webhook_signature_header.to_ascii_lowercase(),
            background: TaskTracker::new(),
            cancellation: CancellationToken::new(),
        })
    }
}

/// Integration gateway: tiered outbound routing plus webhook ingestion.
#[derive(Debug)]
pub struct Gateway {
    router: TierRouter,
    receiver: WebhookReceiver,
    queue: Arc<EventQueue>,
    dedup: Arc<DedupCache>,
    committer: Arc<dyn EventCommitter>,
    dead_letters: Arc<dyn DeadLetterStore>,
    engine: Mutex<Option<PipelineEngine>>,
    started: AtomicBool,
    clock: Arc<dyn Clock>,
    outbound_timeout: Duration,
    dedup_sweep_interval: Duration,
    signature_header: String,
    background: TaskTracker,
    cancellation: CancellationToken,
}

impl Gateway {
    /// Starts a gateway definition from `config`.
    pub fn builder(config: Config, clock: Arc<dyn Clock>) -> GatewayBuilder {
        GatewayBuilder {
            config,
            clock,
            tiers: Vec::new(),
            committer: None,
            dead_letters: None,
            event_handler: Arc::new(NoOpEventHandler::new()),
            pipeline: None,
        }
    }

    /// Picks a tier for `operation` and hands back its lease. The caller
    /// reports the outcome through the lease.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::NoAvailableTier` when no breaker admits the
    /// call.
    pub fn route(&self, operation: &Operation) -> Result<TierLease, GatewayError> {
        self.router.route(operation).map_err(GatewayError::from)
    }

    /// Runs `operation` with failover under the configured outbound timeout.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::InvalidOperation` when a tier rejects the input
    /// and `GatewayError::NoAvailableTier` when every candidate failed.
    pub async fn execute(&self, operation: Operation) -> Result<TierExecution, GatewayError> {
        self.router.execute(operation, self.outbound_timeout).await.map_err(GatewayError::from)
    }

    /// Verifies, deduplicates and enqueues one delivery.
    pub fn submit_webhook(&self, raw: RawWebhook) -> SubmitOutcome {
        self.receiver.submit(raw)
    }

    /// Hands a processed event to the downstream collaborator.
    pub async fn commit(&self, event: &InboundEvent) -> CommitOutcome {
        self.committer.commit(event).await
    }

    /// Maps a rejected submission onto the error taxonomy.
    pub fn rejection_error(&self, reason: RejectReason) -> GatewayError {
        match reason {
            RejectReason::InvalidSignature => GatewayError::InvalidSignature,
            RejectReason::Duplicate { event_id } => GatewayError::DuplicateEvent { event_id },
            RejectReason::Backpressure => {
                GatewayError::QueueFull { capacity: self.queue.capacity() }
            },
            RejectReason::Malformed { detail } => GatewayError::malformed(detail),
            RejectReason::PayloadTooLarge { size_bytes, limit_bytes } => {
                GatewayError::PayloadTooLarge { size_bytes, limit_bytes }
            },
        }
    }

    /// Most recent dead letters first.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::StorageUnavailable` if the store fails.
    pub async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>, GatewayError> {
        Ok(self.dead_letters.list(limit).await?)
    }

    /// Latest dead letter for `event_id`.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::DeadLetterNotFound` for unknown ids.
    pub async fn dead_letter(&self, event_id: &EventId) -> Result<DeadLetter, GatewayError> {
        self.dead_letters
            .get(event_id)
            .await?
            .ok_or_else(|| GatewayError::DeadLetterNotFound { event_id: event_id.clone() })
    }

    /// Puts a dead-lettered event back into the queue as a fresh event.
    ///
    /// The stored delivery was verified when it first arrived and its id may
    /// still be in the dedup window, so replay skips both gates. Capacity
    /// still applies.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::DeadLetterNotFound` for unknown ids and
    /// `GatewayError::QueueFull` when the queue has no room.
    pub async fn replay_dead_letter(
        &self,
        event_id: &EventId,
    ) -> Result<InboundEvent, GatewayError> {
        let letter = self.dead_letter(event_id).await?;
        let event = InboundEvent {
            attempt_count: 0,
            first_failed_at: None,
            received_at: self.clock.now_utc(),
            ..letter.event
        };

        self.queue.enqueue(event.clone()).map_err(|full| {
            warn!(event_id = %event_id, capacity = full.capacity, "replay rejected, queue full");
            GatewayError::QueueFull { capacity: full.capacity }
        })?;

        info!(
            event_id = %event.event_id,
            partition_key = %event.partition_key,
            previous_reason = %letter.reason,
            "dead letter replayed"
        );
        Ok(event)
    }

    /// Breaker snapshots in tier declaration order.
    pub fn circuit_snapshots(&self) -> Vec<CircuitSnapshot> {
        self.router.circuit_snapshots()
    }

    /// True when tiers are configured and every breaker is open.
    pub fn all_circuits_open(&self) -> bool {
        self.router.all_circuits_open()
    }

    /// Registered tiers.
    pub fn tiers(&self) -> Vec<TierDescriptor> {
        self.router.tiers().cloned().collect()
    }

    /// Queue occupancy.
    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    /// Queue scheduling policy.
    pub fn fairness(&self) -> FairnessPolicy {
        self.queue.fairness()
    }

    /// Submission counters.
    pub fn receiver_stats(&self) -> ReceiverStats {
        self.receiver.stats()
    }

    /// Live dedup entries, including expired ones not yet swept.
    pub fn dedup_entries(&self) -> usize {
        self.dedup.len()
    }

    /// Worker counters. Zeroed once the gateway has shut down.
    pub async fn pipeline_stats(&self) -> PipelineStats {
        match self.engine.lock().await.as_ref() {
            Some(engine) => engine.stats().await,
            None => PipelineStats::default(),
        }
    }

    /// Whether workers are running.
    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !self.cancellation.is_cancelled()
    }

    /// Time source shared by every component.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Header the webhook signature is read from, lowercased.
    pub fn signature_header(&self) -> &str {
        &self.signature_header
    }

    /// Starts the workers and the dedup sweeper. Later calls are no-ops.
    ///
    /// # Errors
    ///
    /// Returns error if the worker pool fails to spawn or the gateway has
    /// already shut down.
    pub async fn start(&self) -> Result<(), GatewayError> {
        let mut engine = self.engine.lock().await;
        let engine =
            engine.as_mut().ok_or_else(|| GatewayError::storage("gateway already shut down"))?;
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        engine.start().await?;

        self.background.spawn(
            self.dedup.clone().run_sweeper(self.dedup_sweep_interval, self.cancellation.clone()),
        );

        info!(
            tiers = self.router.tiers().count(),
            capacity = self.queue.capacity(),
            fairness = ?self.queue.fairness(),
            "gateway started"
        );
        Ok(())
    }

    /// Stops workers, flushes retry timers back into the queue and stops
    /// background tasks.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::StorageUnavailable` if workers outlive the
    /// shutdown timeout.
    pub async fn shutdown(&self) -> Result<(), GatewayError> {
        info!("shutting down gateway");
        self.cancellation.cancel();

        let engine = self.engine.lock().await.take();
        let result = match engine {
            Some(engine) => engine.shutdown().await.map_err(GatewayError::from),
            None => Ok(()),
        };

        self.background.close();
        self.background.wait().await;

        info!(live = self.queue.len(), "gateway stopped");
        result
    }
}
