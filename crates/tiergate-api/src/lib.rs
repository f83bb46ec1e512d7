//! Tiergate gateway facade and HTTP API.
//!
//! [`Gateway`] wires the tier router and the ingestion pipeline behind three
//! entry points (`route`, `submit_webhook`, `commit`). The server module puts
//! it on the network: webhook intake, outbound operations, operator access to
//! dead letters and breakers, and health probes.
//!
//! ```text
//!  POST /webhooks/{source} ──▶ submit_webhook ──▶ queue ──▶ workers ──▶ commit
//!  POST /operations        ──▶ execute        ──▶ TierRouter ──▶ tier client
//!  /dead-letters, /dead-letters/{id}/replay, /circuits, /operations: bearer token
//!  GET  /health, /ready, /live
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod gateway;
pub mod handlers;
pub mod middleware;
pub mod server;

pub use config::{Config, TierConfig};
pub use gateway::{Gateway, GatewayBuilder};
pub use server::{create_router, shutdown_signal, start_server, AppState};
