//! Uniform contract every access tier implements.

use serde::{Deserialize, Serialize};
use tiergate_core::Operation;

use crate::error::TierError;

/// Successful answer from a tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierResponse {
    /// Status reported by the tier (HTTP status for HTTP tiers).
    pub status: u16,
    /// Response body.
    pub body: serde_json::Value,
}

impl TierResponse {
    /// A 200 response carrying `body`.
    pub fn ok(body: serde_json::Value) -> Self {
        Self { status: 200, body }
    }
}

/// Client for one access tier of the external system.
///
/// Implementations perform the I/O; the router decides which tier to call
/// and feeds the outcome back into that tier's breaker. Errors must be
/// classified so that caller mistakes come back as [`TierError::Rejected`].
#[async_trait::async_trait]
pub trait TierClient: Send + Sync + std::fmt::Debug {
    /// Executes the operation against this tier.
    async fn execute(&self, operation: &Operation) -> Result<TierResponse, TierError>;
}
