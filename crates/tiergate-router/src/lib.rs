//! Tiered outbound routing with per-tier circuit breakers.
//!
//! The external system is reachable through several access tiers with
//! different cost, latency and availability. This crate picks a tier for each
//! outbound [`Operation`](tiergate_core::Operation), fails fast on tiers whose
//! breaker is open, and cascades to the next tier when a call fails.
//!
//! # Example
//!
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//!
//! use tiergate_core::{Operation, OperationKind, RealClock, TierDescriptor, TierName};
//! use tiergate_router::{CircuitConfig, HttpClientConfig, HttpTierClient, TierRouter};
//!
//! # async fn example() -> Result<(), tiergate_router::RouterError> {
//! let rest = TierDescriptor {
//!     name: TierName::from("rest"),
//!     priority: 1,
//!     max_records_per_call: 1,
//!     supported_kinds: vec![OperationKind::SingleRecord],
//! };
//! let client = HttpTierClient::new(
//!     rest.name.clone(),
//!     "https://api.example.com/records",
//!     HttpClientConfig::default(),
//! )?;
//!
//! let router = TierRouter::builder(CircuitConfig::default(), Arc::new(RealClock::new()))
//!     .tier(rest, Arc::new(client))
//!     .build()?;
//!
//! let operation = Operation::new(OperationKind::SingleRecord, 1, serde_json::json!({}));
//! let execution = router.execute(operation, Duration::from_secs(5)).await?;
//! println!("served by {}", execution.tier);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod circuit;
pub mod client;
pub mod error;
pub mod router;
pub mod tier;

pub use circuit::{CircuitBreaker, CircuitConfig, CircuitSnapshot, Permit};
pub use client::{HttpClientConfig, HttpTierClient};
pub use error::{RouterError, TierError};
pub use router::{TierExecution, TierLease, TierRouter, TierRouterBuilder};
pub use tier::{TierClient, TierResponse};
