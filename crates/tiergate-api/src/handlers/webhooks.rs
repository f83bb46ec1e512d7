//! Webhook intake: `POST /webhooks/{source}`.
//!
//! The receiver decides; this handler only maps its outcome onto HTTP.
//! Duplicates answer `200` because the sender's goal (the event is in) has
//! already been met.

use axum::{
    extract::{rejection::BytesRejection, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde::Serialize;
use tiergate_core::GatewayError;
use tiergate_pipeline::{RawWebhook, RejectReason, SubmitOutcome, MAX_PAYLOAD_SIZE};
use tracing::{debug, instrument, warn};

use super::error_response;
use crate::server::AppState;

/// Header carrying an event id for bodies that lack one.
pub const EVENT_ID_HEADER: &str = "x-event-id";

/// Header carrying a partition key for bodies that lack one.
pub const PARTITION_KEY_HEADER: &str = "x-partition-key";

/// Body of a successful intake.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Id the event is known under
    pub event_id: String,
    /// Whether this call enqueued it
    pub status: WebhookStatus,
}

/// Intake result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookStatus {
    /// Enqueued by this request.
    Accepted,
    /// Already enqueued earlier.
    Duplicate,
}

/// Receives one webhook delivery.
///
/// # Errors
///
/// Returns appropriate HTTP status codes:
/// - 400: Verified delivery without a usable event id
/// - 401: Missing or invalid signature
/// - 413: Payload over 10 MiB
/// - 503: Queue full, with `Retry-After`
#[instrument(
    name = "receive_webhook",
    skip(state, headers, body),
    fields(
        source = %source,
        content_length = content_length(&headers).unwrap_or_default(),
    )
)]
pub async fn receive_webhook(
    State(state): State<AppState>,
    Path(source): Path<String>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let body = match body {
        Ok(body) => body,
        Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            let size_bytes = content_length(&headers).unwrap_or(MAX_PAYLOAD_SIZE + 1);
            warn!(size_bytes, limit = MAX_PAYLOAD_SIZE, "payload exceeds size limit");
            return error_response(&GatewayError::PayloadTooLarge {
                size_bytes,
                limit_bytes: MAX_PAYLOAD_SIZE,
            });
        },
        Err(rejection) => {
            warn!(error = %rejection, "failed to read webhook body");
            return error_response(&GatewayError::malformed(rejection.body_text()));
        },
    };

    let raw = RawWebhook {
        source,
        signature: header_str(&headers, state.gateway.signature_header()),
        event_id_hint: header_str(&headers, EVENT_ID_HEADER),
        partition_key_hint: header_str(&headers, PARTITION_KEY_HEADER),
        body,
    };

    match state.gateway.submit_webhook(raw) {
        SubmitOutcome::Accepted { event_id } => {
            debug!(event_id = %event_id, "webhook accepted");
            (
                StatusCode::ACCEPTED,
                Json(WebhookResponse {
                    event_id: event_id.to_string(),
                    status: WebhookStatus::Accepted,
                }),
            )
                .into_response()
        },
        SubmitOutcome::Rejected(RejectReason::Duplicate { event_id }) => {
            debug!(event_id = %event_id, "duplicate webhook acknowledged");
            (
                StatusCode::OK,
                Json(WebhookResponse {
                    event_id: event_id.to_string(),
                    status: WebhookStatus::Duplicate,
                }),
            )
                .into_response()
        },
        SubmitOutcome::Rejected(reason) => error_response(&state.gateway.rejection_error(reason)),
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string)
}

fn content_length(headers: &HeaderMap) -> Option<usize> {
    headers.get("content-length").and_then(|v| v.to_str().ok()).and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn missing_or_non_ascii_headers_are_absent() {
        let mut headers = HeaderMap::new();
        headers.insert(EVENT_ID_HEADER, HeaderValue::from_static("evt_1"));
        headers.insert(
            PARTITION_KEY_HEADER,
            HeaderValue::from_bytes(&[0xfa, 0xfb]).expect("opaque header value"),
        );

        assert_eq!(header_str(&headers, EVENT_ID_HEADER).as_deref(), Some("evt_1"));
        assert_eq!(header_str(&headers, PARTITION_KEY_HEADER), None);
        assert_eq!(header_str(&headers, "x-webhook-signature"), None);
    }

    #[test]
    fn content_length_parses_numeric_values_only() {
        let mut headers = HeaderMap::new();
        assert_eq!(content_length(&headers), None);

        headers.insert("content-length", HeaderValue::from_static("11534336"));
        assert_eq!(content_length(&headers), Some(11_534_336));

        headers.insert("content-length", HeaderValue::from_static("lots"));
        assert_eq!(content_length(&headers), None);
    }
}
