//! Builders for webhooks, events, operations and tiers with sensible
//! defaults.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tiergate_core::{
    EventId, InboundEvent, Operation, OperationKind, PartitionKey, TierDescriptor, TierName,
};
use tiergate_pipeline::{sign, sign_timestamped, RawWebhook};
use uuid::Uuid;

/// Secret used by [`WebhookBuilder`] unless overridden.
pub const TEST_SECRET: &str = "whsec_test_secret";

/// How a built webhook is signed.
#[derive(Debug, Clone)]
enum Signing {
    Plain,
    Timestamped(i64),
    Raw(String),
    Unsigned,
}

/// Builder for signed webhook deliveries.
#[derive(Debug, Clone)]
pub struct WebhookBuilder {
    source: String,
    event_id: Option<String>,
    partition_key: Option<String>,
    extra: Value,
    body: Option<Bytes>,
    secret: String,
    signing: Signing,
    id_in_headers: bool,
}

/// Built delivery, ready to submit directly or over HTTP.
#[derive(Debug, Clone)]
pub struct TestWebhook {
    /// Source path segment.
    pub source: String,
    /// Event id, if one was set.
    pub event_id: Option<String>,
    /// Partition key, if one was set.
    pub partition_key: Option<String>,
    /// Body bytes.
    pub body: Bytes,
    /// Signature header value.
    pub signature: Option<String>,
    /// Whether ids travel as headers instead of body fields.
    pub id_in_headers: bool,
}

impl WebhookBuilder {
    /// Builder with a random event id, source `crm` and the test secret.
    pub fn with_defaults() -> Self {
        Self {
            source: "crm".to_string(),
            event_id: Some(format!("evt_{}", Uuid::new_v4().simple())),
            partition_key: None,
            extra: json!({"type": "record.updated"}),
            body: None,
            secret: TEST_SECRET.to_string(),
            signing: Signing::Plain,
            id_in_headers: false,
        }
    }

    /// Sets the source.
    #[must_use]
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Sets the event id.
    #[must_use]
    pub fn event_id(mut self, id: impl Into<String>) -> Self {
        self.event_id = Some(id.into());
        self
    }

    /// Drops the event id entirely.
    #[must_use]
    pub fn without_event_id(mut self) -> Self {
        self.event_id = None;
        self
    }

    /// Sets the partition key.
    #[must_use]
    pub fn partition_key(mut self, key: impl Into<String>) -> Self {
        self.partition_key = Some(key.into());
        self
    }

    /// Sends ids as `X-Event-Id` / `X-Partition-Key` rather than in the body.
    #[must_use]
    pub fn ids_in_headers(mut self) -> Self {
        self.id_in_headers = true;
        self
    }

    /// Adds a field to the generated JSON body.
    #[must_use]
    pub fn field(mut self, key: &str, value: Value) -> Self {
        if let Value::Object(map) = &mut self.extra {
            map.insert(key.to_string(), value);
        }
        self
    }

    /// Uses `body` verbatim instead of the generated JSON.
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Signs with `secret`.
    #[must_use]
    pub fn secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = secret.into();
        self
    }

    /// Uses the `t=<timestamp>,v1=<hex>` format.
    #[must_use]
    pub fn timestamped(mut self, at: DateTime<Utc>) -> Self {
        self.signing = Signing::Timestamped(at.timestamp());
        self
    }

    /// Sends `header` as the signature verbatim.
    #[must_use]
    pub fn signature(mut self, header: impl Into<String>) -> Self {
        self.signing = Signing::Raw(header.into());
        self
    }

    /// Sends no signature header.
    #[must_use]
    pub fn unsigned(mut self) -> Self {
        self.signing = Signing::Unsigned;
        self
    }

    /// Builds the delivery.
    pub fn build(self) -> TestWebhook {
        let body = self.body.clone().unwrap_or_else(|| self.json_body());

        // Test secrets are never empty, so signing cannot fail.
        let signature = match &self.signing {
            Signing::Plain => sign(&body, &self.secret).ok().map(|hex| format!("sha256={hex}")),
            Signing::Timestamped(ts) => sign_timestamped(&body, &self.secret, *ts).ok(),
            Signing::Raw(header) => Some(header.clone()),
            Signing::Unsigned => None,
        };

        TestWebhook {
            source: self.source,
            event_id: self.event_id,
            partition_key: self.partition_key,
            body,
            signature,
            id_in_headers: self.id_in_headers,
        }
    }

    fn json_body(&self) -> Bytes {
        let mut body = self.extra.clone();
        if !self.id_in_headers {
            if let Value::Object(map) = &mut body {
                if let Some(id) = &self.event_id {
                    map.insert("event_id".to_string(), json!(id));
                }
                if let Some(key) = &self.partition_key {
                    map.insert("partition_key".to_string(), json!(key));
                }
            }
        }
        Bytes::from(body.to_string())
    }
}

impl TestWebhook {
    /// Delivery as handed to the receiver.
    pub fn to_raw(&self) -> RawWebhook {
        RawWebhook {
            source: self.source.clone(),
            signature: self.signature.clone(),
            event_id_hint: self.event_id.clone().filter(|_| self.id_in_headers),
            partition_key_hint: self.partition_key.clone().filter(|_| self.id_in_headers),
            body: self.body.clone(),
        }
    }

    /// Event id as a typed id.
    ///
    /// # Panics
    ///
    /// Panics if the webhook was built without an event id.
    pub fn id(&self) -> EventId {
        EventId::from(self.event_id.clone().expect("webhook built without event id"))
    }

    /// Request path for the HTTP surface.
    pub fn path(&self) -> String {
        format!("/webhooks/{}", self.source)
    }

    /// Header pairs to send with the body over HTTP.
    pub fn headers(&self, signature_header: &str) -> Vec<(String, String)> {
        let mut headers = vec![("content-type".to_string(), "application/json".to_string())];
        if let Some(signature) = &self.signature {
            headers.push((signature_header.to_string(), signature.clone()));
        }
        if self.id_in_headers {
            if let Some(id) = &self.event_id {
                headers.push(("x-event-id".to_string(), id.clone()));
            }
            if let Some(key) = &self.partition_key {
                headers.push(("x-partition-key".to_string(), key.clone()));
            }
        }
        headers
    }
}

/// Builder for inbound events that skip the receiver.
#[derive(Debug, Clone)]
pub struct EventBuilder {
    event: InboundEvent,
}

impl EventBuilder {
    /// Event with a random id, partitioned by its own id.
    pub fn with_defaults() -> Self {
        let id = format!("evt_{}", Uuid::new_v4().simple());
        Self {
            event: InboundEvent {
                event_id: EventId::from(id.as_str()),
                source: "crm".to_string(),
                partition_key: PartitionKey::from(id.as_str()),
                received_at: Utc::now(),
                signature: String::new(),
                raw_payload: Bytes::from(json!({"event_id": id}).to_string()),
                attempt_count: 0,
                first_failed_at: None,
            },
        }
    }

    /// Sets the event id.
    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.event.event_id = EventId::from(id.into());
        self
    }

    /// Sets the partition key.
    #[must_use]
    pub fn partition(mut self, key: impl Into<String>) -> Self {
        self.event.partition_key = PartitionKey::from(key.into());
        self
    }

    /// Sets the receipt time.
    #[must_use]
    pub fn received_at(mut self, at: DateTime<Utc>) -> Self {
        self.event.received_at = at;
        self
    }

    /// Sets retries already scheduled.
    #[must_use]
    pub fn attempt_count(mut self, count: u32) -> Self {
        self.event.attempt_count = count;
        self
    }

    /// Sets the raw payload.
    #[must_use]
    pub fn payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.event.raw_payload = payload.into();
        self
    }

    /// Builds the event.
    pub fn build(self) -> InboundEvent {
        self.event
    }
}

/// Builder for outbound operations.
#[derive(Debug, Clone)]
pub struct OperationBuilder {
    kind: OperationKind,
    count: u64,
    payload: Value,
}

impl OperationBuilder {
    /// Single-record operation for one record.
    pub fn single() -> Self {
        Self { kind: OperationKind::SingleRecord, count: 1, payload: json!({"record_id": "rec_1"}) }
    }

    /// Bulk operation for `count` records.
    pub fn bulk(count: u64) -> Self {
        Self { kind: OperationKind::Bulk, count, payload: json!({"records": count}) }
    }

    /// Sets the payload.
    #[must_use]
    pub fn payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Builds the operation with a fresh id.
    pub fn build(self) -> Operation {
        Operation::new(self.kind, self.count, self.payload)
    }
}

/// Tier that accepts `kinds` up to `max_records` records per call.
pub fn tier(
    name: &str,
    priority: u32,
    max_records: u64,
    kinds: &[OperationKind],
) -> TierDescriptor {
    TierDescriptor {
        name: TierName::from(name),
        priority,
        max_records_per_call: max_records,
        supported_kinds: kinds.to_vec(),
    }
}

/// Single-record tier.
pub fn rest_tier(name: &str, priority: u32) -> TierDescriptor {
    tier(name, priority, 1, &[OperationKind::SingleRecord])
}

/// Tier accepting both kinds up to 10k records.
pub fn bulk_tier(name: &str, priority: u32) -> TierDescriptor {
    tier(name, priority, 10_000, &[OperationKind::SingleRecord, OperationKind::Bulk])
}
