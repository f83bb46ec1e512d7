//! Operator access to the dead-letter store.
//!
//! Listing and inspection are read-only; replay re-enqueues the stored
//! delivery as a fresh event.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tiergate_core::{DeadLetter, EventId};
use tracing::{info, instrument};

use super::ApiError;
use crate::server::AppState;

/// Entries returned when no limit is given.
pub const DEFAULT_LIST_LIMIT: usize = 50;

/// Largest page a single request may ask for.
pub const MAX_LIST_LIMIT: usize = 1000;

/// Query parameters for listing.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    /// Maximum entries to return
    pub limit: Option<usize>,
}

/// Dead letter as shown to operators.
#[derive(Debug, Serialize)]
pub struct DeadLetterView {
    /// Event id
    pub event_id: String,
    /// Webhook source
    pub source: String,
    /// Partition key
    pub partition_key: String,
    /// Retries made before giving up
    pub attempt_count: u32,
    /// Original receipt time
    pub received_at: DateTime<Utc>,
    /// When the event was dead-lettered
    pub dead_lettered_at: DateTime<Utc>,
    /// Why processing stopped
    pub reason: String,
    /// Payload, lossily decoded as UTF-8
    pub payload: String,
}

impl From<DeadLetter> for DeadLetterView {
    fn from(letter: DeadLetter) -> Self {
        let event = letter.event;
        Self {
            event_id: event.event_id.0,
            source: event.source,
            partition_key: event.partition_key.0,
            attempt_count: event.attempt_count,
            received_at: event.received_at,
            dead_lettered_at: letter.dead_lettered_at,
            reason: letter.reason,
            payload: String::from_utf8_lossy(&event.raw_payload).into_owned(),
        }
    }
}

/// Page of dead letters.
#[derive(Debug, Serialize)]
pub struct DeadLetterList {
    /// Entries, most recent first
    pub dead_letters: Vec<DeadLetterView>,
    /// Number of entries in this page
    pub count: usize,
}

/// Body of a successful replay.
#[derive(Debug, Serialize)]
pub struct ReplayResponse {
    /// Replayed event id
    pub event_id: String,
    /// Always `requeued`
    pub status: &'static str,
}

/// `GET /dead-letters?limit=N`
#[instrument(name = "list_dead_letters", skip(state))]
pub async fn list_dead_letters(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<DeadLetterList>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
    let dead_letters: Vec<DeadLetterView> =
        state.gateway.dead_letters(limit).await?.into_iter().map(DeadLetterView::from).collect();

    Ok(Json(DeadLetterList { count: dead_letters.len(), dead_letters }))
}

/// `GET /dead-letters/{event_id}`
#[instrument(name = "get_dead_letter", skip(state))]
pub async fn get_dead_letter(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> Result<Json<DeadLetterView>, ApiError> {
    let letter = state.gateway.dead_letter(&EventId(event_id)).await?;
    Ok(Json(letter.into()))
}

/// `POST /dead-letters/{event_id}/replay`
///
/// # Errors
///
/// Returns appropriate HTTP status codes:
/// - 404: No dead letter under this id
/// - 503: Queue full, with `Retry-After`
#[instrument(name = "replay_dead_letter", skip(state))]
pub async fn replay_dead_letter(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> Result<Response, ApiError> {
    let event = state.gateway.replay_dead_letter(&EventId(event_id)).await?;
    info!(event_id = %event.event_id, "operator replayed dead letter");

    Ok((
        StatusCode::ACCEPTED,
        Json(ReplayResponse { event_id: event.event_id.0, status: "requeued" }),
    )
        .into_response())
}
