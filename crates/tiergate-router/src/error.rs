//! Error types for tier calls and routing decisions.
//!
//! [`TierError`] is what a single tier call can fail with; its classification
//! decides whether the failure counts against the tier's circuit breaker.
//! [`RouterError`] is what a routing request as a whole can fail with.

use std::fmt;

use thiserror::Error;
use tiergate_core::{GatewayError, OperationId, OperationKind, TierName};

/// Failure of one call against one tier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TierError {
    /// Connection could not be established or was lost.
    #[error("network failure: {message}")]
    Network {
        /// Error message describing the failure
        message: String,
    },

    /// Call exceeded its deadline.
    #[error("request timeout after {timeout_ms}ms")]
    Timeout {
        /// Deadline in milliseconds
        timeout_ms: u64,
    },

    /// Tier answered with a server-side or capacity error (5xx, 408, 429).
    #[error("server error: HTTP {status_code}")]
    Server {
        /// HTTP status code
        status_code: u16,
        /// Response body content
        body: String,
    },

    /// Tier rejected the request itself (4xx other than 408 and 429).
    #[error("request rejected: HTTP {status_code}")]
    Rejected {
        /// HTTP status code
        status_code: u16,
        /// Response body content
        body: String,
    },
}

impl TierError {
    /// Creates a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }

    /// Creates a server error.
    pub fn server(status_code: u16, body: impl Into<String>) -> Self {
        Self::Server { status_code, body: body.into() }
    }

    /// Creates an input rejection.
    pub fn rejected(status_code: u16, body: impl Into<String>) -> Self {
        Self::Rejected { status_code, body: body.into() }
    }

    /// Classifies an HTTP status that was not a success.
    pub fn from_status(status_code: u16, body: impl Into<String>) -> Self {
        match status_code {
            408 | 429 => Self::server(status_code, body),
            400..=499 => Self::rejected(status_code, body),
            _ => Self::server(status_code, body),
        }
    }

    /// Transport, timeout and server errors count toward the breaker; input
    /// rejections do not.
    pub fn counts_toward_breaker(&self) -> bool {
        !self.is_input()
    }

    /// Whether the caller sent something the tier will never accept.
    pub fn is_input(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }

    /// Converts into the gateway taxonomy, attributing the failure to `tier`.
    pub fn into_gateway_error(self, tier: TierName) -> GatewayError {
        match self {
            Self::Network { message } => GatewayError::Transport { tier, message },
            Self::Timeout { timeout_ms } => GatewayError::Timeout { tier, timeout_ms },
            Self::Server { status_code, .. } => {
                GatewayError::UpstreamServerError { tier, status: status_code }
            },
            Self::Rejected { status_code, body } => GatewayError::InvalidOperation {
                tier,
                reason: format!("HTTP {status_code}: {body}"),
            },
        }
    }
}

/// Failure of a routing request.
#[derive(Debug, Clone, Error)]
pub enum RouterError {
    /// No tier could take the operation.
    #[error(
        "no available tier for {kind} operation {operation_id} (attempted: {})",
        TierList(.attempted)
    )]
    NoAvailableTier {
        /// Operation that could not be placed
        operation_id: OperationId,
        /// Its kind
        kind: OperationKind,
        /// Tiers that were called and failed, in order
        attempted: Vec<TierName>,
        /// Error from the last tier called, if any
        last_error: Option<TierError>,
    },

    /// A tier rejected the operation as invalid; no other tier was tried.
    #[error("tier {tier} rejected operation: {source}")]
    Rejected {
        /// Tier that rejected the call
        tier: TierName,
        /// Rejection detail
        #[source]
        source: TierError,
    },

    /// Two tiers were registered under the same name.
    #[error("duplicate tier name: {0}")]
    DuplicateTier(TierName),

    /// A tier client could not be constructed.
    #[error("invalid tier configuration: {message}")]
    Configuration {
        /// Configuration error message
        message: String,
    },
}

impl RouterError {
    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }
}

impl From<RouterError> for GatewayError {
    fn from(error: RouterError) -> Self {
        match error {
            RouterError::NoAvailableTier { kind, attempted, .. } => {
                Self::NoAvailableTier { kind, attempted: attempted.len() }
            },
            RouterError::Rejected { tier, source } => source.into_gateway_error(tier),
            RouterError::DuplicateTier(tier) => {
                Self::storage(format!("router misconfigured: duplicate tier {tier}"))
            },
            RouterError::Configuration { message } => Self::storage(message),
        }
    }
}

struct TierList<'a>(&'a [TierName]);

impl fmt::Display for TierList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "none");
        }
        for (i, tier) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{tier}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tiergate_core::ErrorClass;

    use super::*;

    #[test]
    fn status_classification() {
        assert!(TierError::from_status(400, "bad").is_input());
        assert!(TierError::from_status(404, "missing").is_input());
        assert!(TierError::from_status(429, "slow down").counts_toward_breaker());
        assert!(TierError::from_status(408, "timeout").counts_toward_breaker());
        assert!(TierError::from_status(503, "down").counts_toward_breaker());
    }

    #[test]
    fn gateway_conversion_keeps_class() {
        let transport = TierError::network("refused").into_gateway_error(TierName::from("rest"));
        assert_eq!(transport.class(), ErrorClass::Transport);

        let input = TierError::rejected(422, "invalid field").into_gateway_error("rest".into());
        assert_eq!(input.class(), ErrorClass::Input);
        assert_eq!(input.code(), "E1005");
    }

    #[test]
    fn no_available_tier_lists_attempts() {
        let error = RouterError::NoAvailableTier {
            operation_id: OperationId::new(),
            kind: OperationKind::Bulk,
            attempted: vec![TierName::from("bulk"), TierName::from("export")],
            last_error: Some(TierError::timeout(500)),
        };

        assert!(error.to_string().ends_with("(attempted: bulk, export)"));
        let gateway: GatewayError = error.into();
        assert_eq!(gateway.code(), "E3001");
    }
}
