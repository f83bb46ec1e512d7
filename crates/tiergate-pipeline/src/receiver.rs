//! Webhook admission: signature, envelope, deduplication, enqueue.
//!
//! [`WebhookReceiver::submit`] is a fixed sequence of gates, each of which can
//! end the call with a [`SubmitOutcome`]:
//!
//! 1. payload size and signature
//! 2. envelope: event id and partition key
//! 3. fast duplicate check
//! 4. queue slot reservation (backpressure)
//! 5. dedup insert, which settles races between near-simultaneous duplicates
//! 6. enqueue into the reserved slot
//!
//! A full queue rejects before the dedup cache is written, so a sender
//! retrying after backpressure is never told its new event is a duplicate.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use bytes::Bytes;
use serde::Serialize;
use tiergate_core::{Clock, EventId, InboundEvent, PartitionKey};
use tracing::{debug, info, warn};

use crate::{dedup::DedupCache, queue::EventQueue, signature::SignatureVerifier};

/// Maximum accepted payload size.
pub const MAX_PAYLOAD_SIZE: usize = 10 * 1024 * 1024;

const MAX_ID_LENGTH: usize = 256;

/// Delivery as handed over by the transport.
#[derive(Debug, Clone)]
pub struct RawWebhook {
    /// Source segment of the webhook URL.
    pub source: String,
    /// Signature header value.
    pub signature: Option<String>,
    /// Event id supplied out of band, e.g. an `X-Event-Id` header.
    pub event_id_hint: Option<String>,
    /// Partition key supplied out of band, e.g. an `X-Partition-Key` header.
    pub partition_key_hint: Option<String>,
    /// Body exactly as received.
    pub body: Bytes,
}

impl RawWebhook {
    /// Delivery with a body and signature and no hints.
    pub fn new(
        source: impl Into<String>,
        signature: Option<String>,
        body: impl Into<Bytes>,
    ) -> Self {
        Self {
            source: source.into(),
            signature,
            event_id_hint: None,
            partition_key_hint: None,
            body: body.into(),
        }
    }
}

/// Result of a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Event is in the queue.
    Accepted {
        /// Id the event was accepted under
        event_id: EventId,
    },
    /// Event was not enqueued.
    Rejected(RejectReason),
}

impl SubmitOutcome {
    /// Whether the event was enqueued by this call.
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// Why a submission was not enqueued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    /// Signature missing or wrong. Details stay in the logs.
    InvalidSignature,
    /// Id already accepted within the dedup window. Success for the sender.
    Duplicate {
        /// Duplicate id
        event_id: EventId,
    },
    /// Queue full. The only rejection a sender should retry.
    Backpressure,
    /// Verified delivery without a usable event id.
    Malformed {
        /// What was wrong
        detail: String,
    },
    /// Body over the size limit.
    PayloadTooLarge {
        /// Body size
        size_bytes: usize,
        /// Limit
        limit_bytes: usize,
    },
}

/// Identifiers extracted from a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventEnvelope {
    /// Dedup key.
    pub event_id: EventId,
    /// Ordering group. Defaults to the event id.
    pub partition_key: PartitionKey,
}

impl EventEnvelope {
    /// Extracts identifiers from the JSON body fields `event_id` (or `id`)
    /// and `partition_key` (or `record_id`). Hints only fill fields the body
    /// does not carry, since they sit outside the signed bytes.
    ///
    /// # Errors
    ///
    /// Returns a description when no event id can be found or an id is
    /// unusable.
    pub fn parse(
        body: &[u8],
        event_id_hint: Option<&str>,
        partition_key_hint: Option<&str>,
    ) -> Result<Self, String> {
        let fields = serde_json::from_slice::<serde_json::Value>(body).ok();
        let field = |names: &[&str]| {
            let value = fields.as_ref()?;
            names.iter().find_map(|name| id_value(value.get(*name)?))
        };

        let event_id = match field(&["event_id", "id"]) {
            Some(id) => id,
            None => match non_empty(event_id_hint) {
                Some(hint) => hint.to_string(),
                None if fields.is_none() => {
                    return Err(
                        "payload is not a JSON document and no event id header was sent".into()
                    )
                },
                None => return Err("payload carries no event id".into()),
            },
        };
        let partition_key = field(&["partition_key", "record_id"])
            .or_else(|| non_empty(partition_key_hint).map(str::to_string))
            .unwrap_or_else(|| event_id.clone());

        if event_id.len() > MAX_ID_LENGTH || partition_key.len() > MAX_ID_LENGTH {
            return Err(format!("identifiers are limited to {MAX_ID_LENGTH} bytes"));
        }

        Ok(Self { event_id: EventId(event_id), partition_key: PartitionKey(partition_key) })
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn id_value(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Submission counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReceiverStats {
    /// Enqueued deliveries.
    pub accepted: u64,
    /// Duplicates absorbed.
    pub duplicates: u64,
    /// Signature failures.
    pub invalid_signatures: u64,
    /// Backpressure rejections.
    pub backpressured: u64,
    /// Malformed or oversized deliveries.
    pub malformed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    accepted: AtomicU64,
    duplicates: AtomicU64,
    invalid_signatures: AtomicU64,
    backpressured: AtomicU64,
    malformed: AtomicU64,
}

/// Admits verified, deduplicated deliveries into the queue.
#[derive(Debug)]
pub struct WebhookReceiver {
    verifier: SignatureVerifier,
    dedup: Arc<DedupCache>,
    queue: Arc<EventQueue>,
    clock: Arc<dyn Clock>,
    counters: Counters,
}

impl WebhookReceiver {
    /// Creates a receiver feeding `queue`.
    pub fn new(
        verifier: SignatureVerifier,
        dedup: Arc<DedupCache>,
        queue: Arc<EventQueue>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { verifier, dedup, queue, clock, counters: Counters::default() }
    }

    /// Runs a delivery through every admission gate.
    pub fn submit(&self, raw: RawWebhook) -> SubmitOutcome {
        if raw.body.len() > MAX_PAYLOAD_SIZE {
            self.counters.malformed.fetch_add(1, Ordering::Relaxed);
            return SubmitOutcome::Rejected(RejectReason::PayloadTooLarge {
                size_bytes: raw.body.len(),
                limit_bytes: MAX_PAYLOAD_SIZE,
            });
        }

        let now = self.clock.now_utc();
        let signature = raw.signature.as_deref();
        if let Err(e) = self.verifier.verify(&raw.source, &raw.body, signature, now) {
            warn!(source = %raw.source, error = %e, "webhook signature rejected");
            self.counters.invalid_signatures.fetch_add(1, Ordering::Relaxed);
            return SubmitOutcome::Rejected(RejectReason::InvalidSignature);
        }

        let envelope = match EventEnvelope::parse(
            &raw.body,
            raw.event_id_hint.as_deref(),
            raw.partition_key_hint.as_deref(),
        ) {
            Ok(envelope) => envelope,
            Err(detail) => {
                warn!(source = %raw.source, %detail, "malformed webhook");
                self.counters.malformed.fetch_add(1, Ordering::Relaxed);
                return SubmitOutcome::Rejected(RejectReason::Malformed { detail });
            },
        };

        if self.dedup.contains(&envelope.event_id) {
            return self.duplicate(envelope.event_id);
        }

        let Ok(reservation) = self.queue.reserve() else {
            warn!(
                event_id = %envelope.event_id,
                capacity = self.queue.capacity(),
                "queue full, applying backpressure"
            );
            self.counters.backpressured.fetch_add(1, Ordering::Relaxed);
            return SubmitOutcome::Rejected(RejectReason::Backpressure);
        };

        if !self.dedup.insert_if_absent(&envelope.event_id) {
            return self.duplicate(envelope.event_id);
        }

        let event_id = envelope.event_id.clone();
        reservation.commit(InboundEvent {
            event_id: envelope.event_id,
            source: raw.source,
            partition_key: envelope.partition_key,
            received_at: now,
            signature: raw.signature.unwrap_or_default(),
            raw_payload: raw.body,
            attempt_count: 0,
            first_failed_at: None,
        });
        self.counters.accepted.fetch_add(1, Ordering::Relaxed);
        debug!(event_id = %event_id, "webhook accepted");

        SubmitOutcome::Accepted { event_id }
    }

    fn duplicate(&self, event_id: EventId) -> SubmitOutcome {
        info!(event_id = %event_id, "duplicate webhook absorbed");
        self.counters.duplicates.fetch_add(1, Ordering::Relaxed);
        SubmitOutcome::Rejected(RejectReason::Duplicate { event_id })
    }

    /// Submission counters so far.
    pub fn stats(&self) -> ReceiverStats {
        ReceiverStats {
            accepted: self.counters.accepted.load(Ordering::Relaxed),
            duplicates: self.counters.duplicates.load(Ordering::Relaxed),
            invalid_signatures: self.counters.invalid_signatures.load(Ordering::Relaxed),
            backpressured: self.counters.backpressured.load(Ordering::Relaxed),
            malformed: self.counters.malformed.load(Ordering::Relaxed),
        }
    }
}
