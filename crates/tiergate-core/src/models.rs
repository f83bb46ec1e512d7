//! Domain models and strongly-typed identifiers.
//!
//! Covers both directions of traffic through the gateway: outbound
//! [`Operation`]s routed to access tiers described by [`TierDescriptor`], and
//! inbound [`InboundEvent`]s delivered by webhook senders. Newtype wrappers
//! keep event ids, partition keys and tier names from being mixed up.

use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sender-assigned webhook event identifier.
///
/// This is the deduplication key. It is opaque to the gateway: whatever the
/// sender puts in the delivery is used verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub String);

impl EventId {
    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for EventId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for EventId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Key that groups events which must be processed in order.
///
/// Typically the identifier of the external record an event refers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionKey(pub String);

impl PartitionKey {
    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for PartitionKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for PartitionKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<&EventId> for PartitionKey {
    fn from(value: &EventId) -> Self {
        Self(value.0.clone())
    }
}

/// Name of an access tier, unique within a router.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TierName(pub String);

impl TierName {
    /// Returns the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TierName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TierName {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TierName {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Identifier assigned to an outbound operation for log correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(pub Uuid);

impl OperationId {
    /// Creates a new random operation ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Shape of an outbound operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Reads or writes a single record.
    SingleRecord,
    /// Touches many records in one call.
    Bulk,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SingleRecord => write!(f, "single_record"),
            Self::Bulk => write!(f, "bulk"),
        }
    }
}

/// Request for outbound work against the external system.
///
/// Operations are immutable once created. The router takes ownership when
/// executing one, so each operation is consumed exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Correlation identifier.
    #[serde(default)]
    pub id: OperationId,
    /// Single-record or bulk.
    pub kind: OperationKind,
    /// Caller's estimate of how many records the call touches.
    pub estimated_record_count: u64,
    /// Opaque request body forwarded to the tier.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Operation {
    /// Creates an operation with a fresh correlation id.
    pub fn new(
        kind: OperationKind,
        estimated_record_count: u64,
        payload: serde_json::Value,
    ) -> Self {
        Self { id: OperationId::new(), kind, estimated_record_count, payload }
    }
}

/// Static configuration of one access tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierDescriptor {
    /// Unique tier name.
    pub name: TierName,
    /// Lower values are tried first.
    pub priority: u32,
    /// Largest record count a single call may carry.
    pub max_records_per_call: u64,
    /// Operation kinds this tier accepts.
    pub supported_kinds: Vec<OperationKind>,
}

impl TierDescriptor {
    /// Whether this tier can carry an operation of the given kind and size.
    pub fn suitable_for(&self, kind: OperationKind, record_count: u64) -> bool {
        self.supported_kinds.contains(&kind) && record_count <= self.max_records_per_call
    }
}

/// Circuit breaker state for a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls flow normally.
    Closed,
    /// Calls are rejected immediately.
    Open,
    /// A single probe call is admitted to test recovery.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// One webhook delivery accepted into the pipeline.
///
/// `attempt_count` starts at zero and is only ever incremented by the retry
/// scheduler. The event lives until it is committed or dead-lettered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Sender-assigned identifier and dedup key.
    pub event_id: EventId,
    /// Webhook source the delivery arrived on.
    pub source: String,
    /// Ordering group.
    pub partition_key: PartitionKey,
    /// When the gateway accepted the delivery.
    pub received_at: DateTime<Utc>,
    /// Signature header as sent.
    pub signature: String,
    /// Body exactly as received.
    pub raw_payload: Bytes,
    /// Retries scheduled so far.
    pub attempt_count: u32,
    /// When the first attempt failed. Bounds the total time spent retrying.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_failed_at: Option<DateTime<Utc>>,
}

impl InboundEvent {
    /// Size of the raw payload in bytes.
    pub fn payload_size(&self) -> usize {
        self.raw_payload.len()
    }

    /// Time spent in the pipeline as of `now`. Zero if `now` precedes receipt.
    pub fn age(&self, now: DateTime<Utc>) -> std::time::Duration {
        (now - self.received_at).to_std().unwrap_or_default()
    }
}

/// Result of handing an event to the downstream commit collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CommitOutcome {
    /// Downstream state now reflects the event.
    Success,
    /// Temporary failure; the event should be retried.
    RetryableFailure {
        /// Human-readable failure description.
        reason: String,
    },
    /// The event can never be committed.
    PermanentFailure {
        /// Human-readable failure description.
        reason: String,
    },
}

impl CommitOutcome {
    /// Creates a retryable failure.
    pub fn retryable(reason: impl Into<String>) -> Self {
        Self::RetryableFailure { reason: reason.into() }
    }

    /// Creates a permanent failure.
    pub fn permanent(reason: impl Into<String>) -> Self {
        Self::PermanentFailure { reason: reason.into() }
    }

    /// Returns true for [`CommitOutcome::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Terminal record for an event that could not be processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetter {
    /// The event as it was when it gave up.
    pub event: InboundEvent,
    /// Why processing stopped.
    pub reason: String,
    /// When the event was dead-lettered.
    pub dead_lettered_at: DateTime<Utc>,
}
