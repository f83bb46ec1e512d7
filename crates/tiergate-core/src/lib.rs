//! Core domain types shared by every tiergate crate.
//!
//! Holds the strongly-typed identifiers, the inbound event and outbound
//! operation models, the coded error taxonomy, the injectable clock, and the
//! observer hooks the ingestion pipeline reports dispositions through. The
//! router, pipeline and HTTP crates all build on these definitions.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod events;
pub mod models;
pub mod time;

pub use error::{ErrorClass, GatewayError, Result};
pub use events::{
    CommittedEvent, DeadLetteredEvent, EventHandler, MulticastEventHandler, NoOpEventHandler,
    PipelineEvent, RetryScheduledEvent,
};
pub use models::{
    CircuitState, CommitOutcome, DeadLetter, EventId, InboundEvent, Operation, OperationId,
    OperationKind, PartitionKey, TierDescriptor, TierName,
};
pub use time::{Clock, RealClock, TestClock};
