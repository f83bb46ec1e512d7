//! Scripted tier clients and recording committers.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use tiergate_core::{CommitOutcome, EventId, InboundEvent, Operation, OperationId, PartitionKey};
use tiergate_pipeline::EventCommitter;
use tiergate_router::{TierClient, TierError, TierResponse};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Tier client replaying queued results, then a fallback result.
#[derive(Debug)]
pub struct ScriptedTierClient {
    script: Mutex<VecDeque<Result<TierResponse, TierError>>>,
    fallback: Result<TierResponse, TierError>,
    delay: Option<Duration>,
    calls: Mutex<Vec<OperationId>>,
}

impl ScriptedTierClient {
    /// Always answers 200 `{"ok": true}`.
    pub fn always_ok() -> Self {
        Self::with_fallback(Ok(TierResponse { status: 200, body: serde_json::json!({"ok": true}) }))
    }

    /// Always fails with `error`.
    pub fn always_failing(error: TierError) -> Self {
        Self::with_fallback(Err(error))
    }

    fn with_fallback(fallback: Result<TierResponse, TierError>) -> Self {
        Self { script: Mutex::default(), fallback, delay: None, calls: Mutex::default() }
    }

    /// Queues `result` ahead of the fallback.
    #[must_use]
    pub fn then(self, result: Result<TierResponse, TierError>) -> Self {
        lock(&self.script).push_back(result);
        self
    }

    /// Sleeps for `delay` before answering.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Operations received so far.
    pub fn calls(&self) -> Vec<OperationId> {
        lock(&self.calls).clone()
    }

    /// Number of operations received.
    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }
}

#[async_trait]
impl TierClient for ScriptedTierClient {
    async fn execute(&self, operation: &Operation) -> Result<TierResponse, TierError> {
        lock(&self.calls).push(operation.id);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = lock(&self.script).pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

/// One commit call as observed by [`RecordingCommitter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitCall {
    /// Event committed.
    pub event_id: EventId,
    /// Its partition.
    pub partition_key: PartitionKey,
    /// Retries scheduled before this call.
    pub attempt_count: u32,
}

#[derive(Debug, Default)]
struct Recording {
    calls: Vec<CommitCall>,
    applied: HashSet<EventId>,
    applied_log: Vec<CommitCall>,
    scripts: HashMap<EventId, VecDeque<CommitOutcome>>,
    default_script: VecDeque<CommitOutcome>,
    in_flight: HashSet<PartitionKey>,
    overlaps: Vec<PartitionKey>,
}

/// Idempotent in-memory downstream.
///
/// Applies each event id at most once no matter how often it is committed,
/// records every call, and flags any two commits for the same partition that
/// overlap in time.
#[derive(Debug, Default)]
pub struct RecordingCommitter {
    state: Mutex<Recording>,
    delay: Option<Duration>,
}

impl RecordingCommitter {
    /// Committer that succeeds for every event.
    pub fn new() -> Self {
        Self::default()
    }

    /// Holds every commit for `delay`, widening race windows.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queues outcomes for one event id; later calls succeed.
    #[must_use]
    pub fn script(
        self,
        event_id: &EventId,
        outcomes: impl IntoIterator<Item = CommitOutcome>,
    ) -> Self {
        lock(&self.state).scripts.entry(event_id.clone()).or_default().extend(outcomes);
        self
    }

    /// Queues outcomes for any event without its own script.
    #[must_use]
    pub fn script_all(self, outcomes: impl IntoIterator<Item = CommitOutcome>) -> Self {
        lock(&self.state).default_script.extend(outcomes);
        self
    }

    /// Every commit call in order.
    pub fn calls(&self) -> Vec<CommitCall> {
        lock(&self.state).calls.clone()
    }

    /// Ids applied downstream.
    pub fn applied(&self) -> HashSet<EventId> {
        lock(&self.state).applied.clone()
    }

    /// How many commit calls `event_id` received.
    pub fn times_called(&self, event_id: &EventId) -> usize {
        lock(&self.state).calls.iter().filter(|c| &c.event_id == event_id).count()
    }

    /// Event ids of one partition in the order they were first applied.
    pub fn applied_order(&self, partition_key: &PartitionKey) -> Vec<EventId> {
        lock(&self.state)
            .applied_log
            .iter()
            .filter(|c| &c.partition_key == partition_key)
            .map(|c| c.event_id.clone())
            .collect()
    }

    /// Partitions that saw two overlapping commits.
    pub fn overlapping_partitions(&self) -> Vec<PartitionKey> {
        lock(&self.state).overlaps.clone()
    }
}

#[async_trait]
impl EventCommitter for RecordingCommitter {
    async fn commit(&self, event: &InboundEvent) -> CommitOutcome {
        {
            let mut state = lock(&self.state);
            state.calls.push(CommitCall {
                event_id: event.event_id.clone(),
                partition_key: event.partition_key.clone(),
                attempt_count: event.attempt_count,
            });
            if !state.in_flight.insert(event.partition_key.clone()) {
                state.overlaps.push(event.partition_key.clone());
            }
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut guard = lock(&self.state);
        let state = &mut *guard;
        state.in_flight.remove(&event.partition_key);

        let scripted = match state.scripts.get_mut(&event.event_id) {
            Some(script) => script.pop_front(),
            None => state.default_script.pop_front(),
        };
        let outcome = scripted.unwrap_or(CommitOutcome::Success);
        if outcome.is_success() && state.applied.insert(event.event_id.clone()) {
            state.applied_log.push(CommitCall {
                event_id: event.event_id.clone(),
                partition_key: event.partition_key.clone(),
                attempt_count: event.attempt_count,
            });
        }
        outcome
    }
}
