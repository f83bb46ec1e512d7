//! Test infrastructure for tiergate.
//!
//! Fixture builders for webhooks, events, operations and tiers; scripted
//! tier clients and an idempotent recording committer; a wired-up
//! [`PipelineHarness`] driven by a virtual clock; and proptest strategies.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod doubles;
pub mod fixtures;
pub mod harness;
pub mod strategies;

pub use doubles::{CommitCall, RecordingCommitter, ScriptedTierClient};
pub use fixtures::{
    bulk_tier, rest_tier, tier, EventBuilder, OperationBuilder, TestWebhook, WebhookBuilder,
    TEST_SECRET,
};
pub use harness::{HarnessConfig, PipelineHarness};
pub use tiergate_core::TestClock;
