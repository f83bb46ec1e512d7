//! Terminal storage for events that could not be committed.
//!
//! The store is append-only. Nothing here reprocesses events; operators list
//! and inspect entries, and replay goes back through the gateway as a fresh
//! enqueue. An event replayed and dead-lettered again gets a second entry;
//! [`DeadLetterStore::get`] returns the most recent one.

use std::{
    fmt::Debug,
    sync::{Arc, Mutex, PoisonError},
};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tiergate_core::{Clock, DeadLetter, EventId, InboundEvent, PartitionKey, RealClock};
use tracing::{info, warn};

use crate::error::Result;

/// Append-only record of dead-lettered events.
#[async_trait]
pub trait DeadLetterStore: Send + Sync + Debug {
    /// Appends `event` with the reason processing stopped.
    async fn record(&self, event: InboundEvent, reason: String) -> Result<DeadLetter>;

    /// Most recent entries first, at most `limit`.
    async fn list(&self, limit: usize) -> Result<Vec<DeadLetter>>;

    /// Latest entry for `event_id`, if any.
    async fn get(&self, event_id: &EventId) -> Result<Option<DeadLetter>>;

    /// Total entries recorded.
    async fn len(&self) -> Result<usize>;
}

/// Process-local store. Contents are lost on restart.
#[derive(Debug)]
pub struct InMemoryDeadLetterStore {
    entries: Mutex<Vec<DeadLetter>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryDeadLetterStore {
    /// Creates an empty store stamped with the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(RealClock::new()))
    }

    /// Creates an empty store stamped with `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { entries: Mutex::new(Vec::new()), clock }
    }
}

impl Default for InMemoryDeadLetterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeadLetterStore for InMemoryDeadLetterStore {
    async fn record(&self, event: InboundEvent, reason: String) -> Result<DeadLetter> {
        let letter = DeadLetter { event, reason, dead_lettered_at: self.clock.now_utc() };
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).push(letter.clone());
        Ok(letter)
    }

    async fn list(&self, limit: usize) -> Result<Vec<DeadLetter>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.iter().rev().take(limit).cloned().collect())
    }

    async fn get(&self, event_id: &EventId) -> Result<Option<DeadLetter>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.iter().rev().find(|letter| &letter.event.event_id == event_id).cloned())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.entries.lock().unwrap_or_else(PoisonError::into_inner).len())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct DeadLetterRow {
    event_id: String,
    source: String,
    partition_key: String,
    received_at: DateTime<Utc>,
    signature: String,
    payload: Vec<u8>,
    attempt_count: i32,
    reason: String,
    dead_lettered_at: DateTime<Utc>,
}

impl From<DeadLetterRow> for DeadLetter {
    fn from(row: DeadLetterRow) -> Self {
        Self {
            event: InboundEvent {
                event_id: EventId(row.event_id),
                source: row.source,
                partition_key: PartitionKey(row.partition_key),
                received_at: row.received_at,
                signature: row.signature,
                raw_payload: Bytes::from(row.payload),
                attempt_count: u32::try_from(row.attempt_count).unwrap_or_default(),
                first_failed_at: None,
            },
            reason: row.reason,
            dead_lettered_at: row.dead_lettered_at,
        }
    }
}

const SELECT_COLUMNS: &str = "event_id, source, partition_key, received_at, signature, payload, \
                              attempt_count, reason, dead_lettered_at";

/// PostgreSQL-backed store.
#[derive(Debug, Clone)]
pub struct PostgresDeadLetterStore {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl PostgresDeadLetterStore {
    /// Creates a store over `pool`. Call [`ensure_schema`](Self::ensure_schema)
    /// before first use.
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// Creates the table and index if they do not exist.
    ///
    /// # Errors
    ///
    /// Returns error if the DDL fails.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS dead_letters (
                id BIGSERIAL PRIMARY KEY,
                event_id TEXT NOT NULL,
                source TEXT NOT NULL,
                partition_key TEXT NOT NULL,
                received_at TIMESTAMPTZ NOT NULL,
                signature TEXT NOT NULL,
                payload BYTEA NOT NULL,
                attempt_count INTEGER NOT NULL,
                reason TEXT NOT NULL,
                dead_lettered_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_dead_letters_event_id ON dead_letters (event_id, id)",
        )
        .execute(&self.pool)
        .await?;

        info!("dead letter schema ready");
        Ok(())
    }
}

#[async_trait]
impl DeadLetterStore for PostgresDeadLetterStore {
    async fn record(&self, event: InboundEvent, reason: String) -> Result<DeadLetter> {
        let dead_lettered_at = self.clock.now_utc();
        let attempt_count = i32::try_from(event.attempt_count).unwrap_or(i32::MAX);

        sqlx::query(
            r#"
            INSERT INTO dead_letters (
                event_id, source, partition_key, received_at, signature,
                payload, attempt_count, reason, dead_lettered_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(event.event_id.as_str())
        .bind(&event.source)
        .bind(event.partition_key.as_str())
        .bind(event.received_at)
        .bind(&event.signature)
        .bind(event.raw_payload.as_ref())
        .bind(attempt_count)
        .bind(&reason)
        .bind(dead_lettered_at)
        .execute(&self.pool)
        .await
        .inspect_err(|e| {
            warn!(event_id = %event.event_id, error = %e, "failed to persist dead letter");
        })?;

        Ok(DeadLetter { event, reason, dead_lettered_at })
    }

    async fn list(&self, limit: usize) -> Result<Vec<DeadLetter>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, DeadLetterRow>(&format!(
            "SELECT {SELECT_COLUMNS} FROM dead_letters ORDER BY id DESC LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(DeadLetter::from).collect())
    }

    async fn get(&self, event_id: &EventId) -> Result<Option<DeadLetter>> {
        let row = sqlx::query_as::<_, DeadLetterRow>(&format!(
            "SELECT {SELECT_COLUMNS} FROM dead_letters WHERE event_id = $1 ORDER BY id DESC LIMIT 1"
        ))
        .bind(event_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(DeadLetter::from))
    }

    async fn len(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM dead_letters")
            .fetch_one(&self.pool)
            .await?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}
