//! Pipeline events for observing event dispositions.
//!
//! Workers report every terminal or intermediate disposition of an inbound
//! event through an [`EventHandler`]. Handlers are observers only: they cannot
//! influence processing and must not block it.
//!
//! ```text
//! ┌────────┐  Committed / RetryScheduled / DeadLettered  ┌──────────────────┐
//! │ Worker │ ──────────────────────────────────────────▶ │ EventHandler(s)  │
//! └────────┘                                             └──────────────────┘
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{EventId, PartitionKey};

/// Disposition reported by the worker pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// The commit collaborator accepted the event.
    Committed(CommittedEvent),
    /// A retryable failure was scheduled for another attempt.
    RetryScheduled(RetryScheduledEvent),
    /// The event reached the dead letter store.
    DeadLettered(DeadLetteredEvent),
}

impl PipelineEvent {
    /// Event id the disposition refers to.
    pub fn event_id(&self) -> &EventId {
        match self {
            Self::Committed(e) => &e.event_id,
            Self::RetryScheduled(e) => &e.event_id,
            Self::DeadLettered(e) => &e.event_id,
        }
    }
}

/// Emitted after a successful commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedEvent {
    /// Committed event.
    pub event_id: EventId,
    /// Its partition.
    pub partition_key: PartitionKey,
    /// Retries it took to get here.
    pub attempt_count: u32,
    /// When the commit completed.
    pub committed_at: DateTime<Utc>,
}

/// Emitted when a retry timer is armed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryScheduledEvent {
    /// Event being retried.
    pub event_id: EventId,
    /// Its partition.
    pub partition_key: PartitionKey,
    /// Attempt count after the increment.
    pub attempt_count: u32,
    /// Backoff before the next attempt, in milliseconds.
    pub delay_ms: u64,
    /// Failure that triggered the retry.
    pub reason: String,
}

/// Emitted when an event is dead-lettered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetteredEvent {
    /// Event that gave up.
    pub event_id: EventId,
    /// Its partition.
    pub partition_key: PartitionKey,
    /// Retries made before giving up.
    pub attempt_count: u32,
    /// Why it was dead-lettered.
    pub reason: String,
    /// When it was dead-lettered.
    pub dead_lettered_at: DateTime<Utc>,
}

/// Observer for pipeline dispositions.
#[async_trait::async_trait]
pub trait EventHandler: Send + Sync + std::fmt::Debug {
    /// Handles one pipeline event. Failures are the handler's own concern.
    async fn handle_event(&self, event: PipelineEvent);
}

/// Handler that discards every event.
#[derive(Debug, Default)]
pub struct NoOpEventHandler;

impl NoOpEventHandler {
    /// Creates a new no-op event handler.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl EventHandler for NoOpEventHandler {
    async fn handle_event(&self, _event: PipelineEvent) {}
}

/// Fans each event out to every registered handler concurrently.
#[derive(Debug, Clone, Default)]
pub struct MulticastEventHandler {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl MulticastEventHandler {
    /// Creates a multicast handler with no subscribers.
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    /// Registers a subscriber.
    pub fn add_subscriber(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.handlers.len()
    }
}

#[async_trait::async_trait]
impl EventHandler for MulticastEventHandler {
    async fn handle_event(&self, event: PipelineEvent) {
        let deliveries = self.handlers.iter().map(|handler| {
            let event = event.clone();
            async move { handler.handle_event(event).await }
        });

        futures::future::join_all(deliveries).await;
    }
}
