//! Error taxonomy for gateway operations.
//!
//! Every failure surfaced to callers belongs to one [`ErrorClass`], which
//! decides how the rest of the system reacts: input errors are never retried
//! and never trip breakers, transport errors are retried, exhaustion is
//! terminal, duplicates are success-equivalent and signature failures are
//! rejected outright. Each variant also carries a stable code so HTTP clients
//! can tell failures apart without parsing messages.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::models::{EventId, OperationKind, TierName};

/// Result type alias using `GatewayError`.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Coarse failure class used for retry and breaker decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Caller supplied something invalid.
    Input,
    /// Network, timeout or server-side failure.
    Transport,
    /// Every tier or every retry has been used up.
    Exhaustion,
    /// Event already seen.
    Duplicate,
    /// Webhook authentication failed.
    Signature,
    /// Queue at capacity; the sender should retry later.
    Backpressure,
    /// Storage or other internal failure.
    Internal,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => write!(f, "input"),
            Self::Transport => write!(f, "transport"),
            Self::Exhaustion => write!(f, "exhaustion"),
            Self::Duplicate => write!(f, "duplicate"),
            Self::Signature => write!(f, "signature"),
            Self::Backpressure => write!(f, "backpressure"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// Gateway errors with stable codes.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    // Inbound and caller errors (E1001-E1006)
    /// Webhook signature could not be verified (E1001).
    #[error("[E1001] Invalid signature: webhook authentication failed")]
    InvalidSignature,

    /// Payload exceeds the configured limit (E1002).
    #[error("[E1002] Payload too large: size {size_bytes} bytes exceeds {limit_bytes} byte limit")]
    PayloadTooLarge {
        /// Size of the rejected payload
        size_bytes: usize,
        /// Configured limit
        limit_bytes: usize,
    },

    /// Delivery verified but could not be interpreted (E1003).
    #[error("[E1003] Malformed payload: {reason}")]
    MalformedPayload {
        /// What was missing or invalid
        reason: String,
    },

    /// Event id already accepted within the dedup window (E1004).
    #[error("[E1004] Duplicate event: {event_id} already accepted")]
    DuplicateEvent {
        /// The repeated event id
        event_id: EventId,
    },

    /// A tier rejected the operation as invalid (E1005).
    #[error("[E1005] Invalid operation: tier {tier} rejected request: {reason}")]
    InvalidOperation {
        /// Tier that rejected the call
        tier: TierName,
        /// Rejection detail
        reason: String,
    },

    /// Requested dead letter does not exist (E1006).
    #[error("[E1006] Dead letter not found: {event_id}")]
    DeadLetterNotFound {
        /// Event id that was looked up
        event_id: EventId,
    },

    // Transport errors (E2001-E2003)
    /// Connection-level failure talking to a tier (E2001).
    #[error("[E2001] Transport failure: tier {tier}: {message}")]
    Transport {
        /// Tier that failed
        tier: TierName,
        /// Failure detail
        message: String,
    },

    /// Call exceeded its deadline (E2002).
    #[error("[E2002] Timeout: tier {tier} exceeded {timeout_ms}ms")]
    Timeout {
        /// Tier that timed out
        tier: TierName,
        /// Deadline in milliseconds
        timeout_ms: u64,
    },

    /// Tier answered with a server-side error (E2003).
    #[error("[E2003] Upstream error: tier {tier} returned HTTP {status}")]
    UpstreamServerError {
        /// Tier that failed
        tier: TierName,
        /// HTTP status returned
        status: u16,
    },

    // Exhaustion and capacity (E3001-E3004)
    /// Every tier is open or has failed for this operation (E3001).
    #[error("[E3001] No available tier: {kind} operation, {attempted} tier(s) attempted")]
    NoAvailableTier {
        /// Kind of operation that could not be placed
        kind: OperationKind,
        /// Number of tiers that were tried before giving up
        attempted: usize,
    },

    /// Event used up its retry budget (E3002).
    #[error("[E3002] Retries exhausted: event {event_id} after {attempts} attempts")]
    RetriesExhausted {
        /// Event that was dead-lettered
        event_id: EventId,
        /// Processing attempts made
        attempts: u32,
    },

    /// Ingestion queue is at capacity (E3003).
    #[error("[E3003] Queue full: capacity {capacity} reached")]
    QueueFull {
        /// Configured capacity
        capacity: usize,
    },

    /// Dead letter storage failed (E3004).
    #[error("[E3004] Storage unavailable: {message}")]
    StorageUnavailable {
        /// Failure detail
        message: String,
    },
}

impl GatewayError {
    /// Creates a malformed payload error.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedPayload { reason: reason.into() }
    }

    /// Creates a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::StorageUnavailable { message: message.into() }
    }

    /// Returns the error code (E1001-E3004).
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidSignature => "E1001",
            Self::PayloadTooLarge { .. } => "E1002",
            Self::MalformedPayload { .. } => "E1003",
            Self::DuplicateEvent { .. } => "E1004",
            Self::InvalidOperation { .. } => "E1005",
            Self::DeadLetterNotFound { .. } => "E1006",
            Self::Transport { .. } => "E2001",
            Self::Timeout { .. } => "E2002",
            Self::UpstreamServerError { .. } => "E2003",
            Self::NoAvailableTier { .. } => "E3001",
            Self::RetriesExhausted { .. } => "E3002",
            Self::QueueFull { .. } => "E3003",
            Self::StorageUnavailable { .. } => "E3004",
        }
    }

    /// Returns the failure class.
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidSignature => ErrorClass::Signature,
            Self::PayloadTooLarge { .. }
            | Self::MalformedPayload { .. }
            | Self::InvalidOperation { .. }
            | Self::DeadLetterNotFound { .. } => ErrorClass::Input,
            Self::DuplicateEvent { .. } => ErrorClass::Duplicate,
            Self::Transport { .. } | Self::Timeout { .. } | Self::UpstreamServerError { .. } => {
                ErrorClass::Transport
            },
            Self::NoAvailableTier { .. } | Self::RetriesExhausted { .. } => ErrorClass::Exhaustion,
            Self::QueueFull { .. } => ErrorClass::Backpressure,
            Self::StorageUnavailable { .. } => ErrorClass::Internal,
        }
    }

    /// HTTP status the error maps to at the boundary.
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::InvalidSignature => 401,
            Self::PayloadTooLarge { .. } => 413,
            Self::MalformedPayload { .. } | Self::InvalidOperation { .. } => 400,
            Self::DeadLetterNotFound { .. } => 404,
            Self::DuplicateEvent { .. } => 200,
            Self::Transport { .. } | Self::UpstreamServerError { .. } => 502,
            Self::Timeout { .. } => 504,
            Self::NoAvailableTier { .. } | Self::QueueFull { .. } => 503,
            Self::RetriesExhausted { .. } | Self::StorageUnavailable { .. } => 500,
        }
    }

    /// Returns whether the caller may usefully retry the same request.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::Transport | ErrorClass::Backpressure | ErrorClass::Internal
        )
    }
}
