//! Reliable webhook ingestion pipeline.
//!
//! Inbound deliveries are verified, deduplicated and queued by the
//! [`WebhookReceiver`], then committed downstream by a pool of workers run by
//! the [`PipelineEngine`]. Events sharing a partition key are committed
//! strictly in order; failures back off through the [`RetryScheduler`] and
//! end in the [`DeadLetterStore`] once retries run out.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐   ┌────────────┐   ┌──────────────┐   ┌───────────────┐
//! │ WebhookReceiver │──▶│ EventQueue │──▶│ Worker Pool  │──▶│ EventCommitter│
//! └─────────────────┘   └────────────┘   └──────────────┘   └───────────────┘
//!    │         │              ▲                 │
//!    ▼         ▼              │                 ▼
//! ┌───────┐ ┌───────┐   ┌─────┴─────┐    ┌─────────────────┐
//! │ HMAC  │ │ Dedup │   │ Retry     │◀───│ DeadLetterStore │
//! └───────┘ └───────┘   │ timers    │    └─────────────────┘
//!                       └───────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//!
//! use tiergate_core::RealClock;
//! use tiergate_pipeline::{
//!     DedupCache, EventQueue, FairnessPolicy, HttpCommitter, HttpCommitterConfig,
//!     InMemoryDeadLetterStore, PipelineConfig, PipelineEngine, PipelineError, RawWebhook,
//!     SignatureVerifier, WebhookReceiver,
//! };
//!
//! # async fn example() -> Result<(), PipelineError> {
//! let clock = Arc::new(RealClock::new());
//! let queue = Arc::new(EventQueue::new(10_000, FairnessPolicy::RoundRobin));
//! let dedup = Arc::new(DedupCache::new(Duration::from_secs(3600), clock.clone()));
//! let receiver = WebhookReceiver::new(
//!     SignatureVerifier::new("whsec", Duration::from_secs(300)),
//!     dedup,
//!     queue.clone(),
//!     clock.clone(),
//! );
//!
//! let committer =
//!     HttpCommitter::new("https://crm.example.com/commit", &HttpCommitterConfig::default())?;
//! let mut engine = PipelineEngine::new(
//!     queue,
//!     Arc::new(committer),
//!     Arc::new(InMemoryDeadLetterStore::new()),
//!     PipelineConfig::default(),
//!     clock,
//! );
//! engine.start().await?;
//!
//! let outcome = receiver.submit(RawWebhook::new("crm", Some("sha256=...".into()), "{}"));
//! println!("{outcome:?}");
//! engine.shutdown().await
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod commit;
pub mod dead_letter;
pub mod dedup;
pub mod error;
pub mod queue;
pub mod receiver;
pub mod retry;
pub mod signature;
mod worker;
mod worker_pool;

pub use commit::{EventCommitter, HttpCommitter, HttpCommitterConfig};
pub use dead_letter::{DeadLetterStore, InMemoryDeadLetterStore, PostgresDeadLetterStore};
pub use dedup::{DedupCache, MAX_DEDUP_TTL};
pub use error::{PipelineError, Result};
pub use queue::{EventQueue, FairnessPolicy, QueueFull, QueueStats, Reservation};
pub use receiver::{
    EventEnvelope, RawWebhook, ReceiverStats, RejectReason, SubmitOutcome, WebhookReceiver,
    MAX_PAYLOAD_SIZE,
};
pub use retry::{RetryDecision, RetryPolicy, RetryScheduler};
pub use signature::{parse_signature, sign, sign_timestamped, SignatureError, SignatureVerifier};
pub use worker::{PipelineConfig, PipelineEngine, PipelineStats};
pub use worker_pool::WorkerPool;

/// Default number of concurrent pipeline workers.
pub const DEFAULT_WORKER_COUNT: usize = 4;

/// Default number of events claimed per batch.
pub const DEFAULT_BATCH_SIZE: usize = 10;
