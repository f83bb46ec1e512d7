//! PostgreSQL dead-letter store.
//!
//! Runs only when `DATABASE_URL` points at a reachable database; otherwise
//! each test returns early.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use std::sync::Arc;

use sqlx::PgPool;
use tiergate_core::{EventId, TestClock};
use tiergate_pipeline::{DeadLetterStore, PostgresDeadLetterStore};
use tiergate_testing::EventBuilder;
use uuid::Uuid;

async fn store() -> Option<PostgresDeadLetterStore> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let pool = PgPool::connect(&url).await.expect("DATABASE_URL is set but unreachable");
    let store = PostgresDeadLetterStore::new(pool, Arc::new(TestClock::new()));
    store.ensure_schema().await.expect("schema");
    Some(store)
}

#[tokio::test]
async fn records_and_reads_back_latest_entry() {
    let Some(store) = store().await else {
        return;
    };
    let id = format!("evt_{}", Uuid::new_v4().simple());
    let event = EventBuilder::with_defaults().id(&id).partition("acct_pg").attempt_count(5).build();

    store.record(event.clone(), "maximum attempts (6) reached".to_string()).await.unwrap();
    let mut replayed = event.clone();
    replayed.attempt_count = 0;
    store.record(replayed, "HTTP 422".to_string()).await.unwrap();

    let latest = store.get(&EventId::from(id.as_str())).await.unwrap().expect("entry");
    assert_eq!(latest.reason, "HTTP 422");
    assert_eq!(latest.event.attempt_count, 0);
    assert_eq!(latest.event.partition_key.as_str(), "acct_pg");
    assert_eq!(latest.event.raw_payload, event.raw_payload);

    let newest = store.list(1).await.unwrap();
    assert_eq!(newest.len(), 1);
    assert!(store.len().await.unwrap() >= 2);
}

#[tokio::test]
async fn unknown_event_is_absent() {
    let Some(store) = store().await else {
        return;
    };

    let missing = store.get(&EventId::from("evt_never_recorded_anywhere")).await.unwrap();
    assert!(missing.is_none());
}
