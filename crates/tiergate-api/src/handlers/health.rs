//! Health check handlers for service monitoring.
//!
//! Health is derived from in-process state only: breaker states and queue
//! occupancy. No handler here calls a tier.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tiergate_core::CircuitState;
use tiergate_pipeline::{QueueStats, ReceiverStats};
use tiergate_router::CircuitSnapshot;
use tracing::{debug, instrument};

use crate::{server::AppState, Gateway};

/// Queue occupancy above which the service reports itself degraded.
const QUEUE_DEGRADED_RATIO: f64 = 0.9;

/// Health check response structure.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall service health status
    pub status: HealthStatus,
    /// Timestamp when health check was performed
    pub timestamp: DateTime<Utc>,
    /// Per-tier breaker snapshots
    pub tiers: Vec<CircuitSnapshot>,
    /// Queue occupancy
    pub queue: QueueStats,
    /// Intake counters
    pub webhooks: ReceiverStats,
    /// Whether workers are running
    pub workers_running: bool,
    /// Service version information
    pub version: String,
}

/// Overall health status enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All systems operational
    Healthy,
    /// Some tiers failing or the queue nearly full
    Degraded,
    /// Every tier is open
    Unhealthy,
}

/// Breaker snapshots for operators.
#[derive(Debug, Serialize)]
pub struct CircuitsResponse {
    /// Snapshots in tier declaration order
    pub circuits: Vec<CircuitSnapshot>,
}

/// Assesses the gateway's current health.
pub fn assess(gateway: &Gateway) -> HealthResponse {
    let tiers = gateway.circuit_snapshots();
    let queue = gateway.queue_stats();

    let status = if gateway.all_circuits_open() {
        HealthStatus::Unhealthy
    } else if tiers.iter().any(|t| t.state != CircuitState::Closed) || queue_pressured(&queue) {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    };

    HealthResponse {
        status,
        timestamp: gateway.clock().now_utc(),
        tiers,
        queue,
        webhooks: gateway.receiver_stats(),
        workers_running: gateway.is_running(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }
}

fn queue_pressured(queue: &QueueStats) -> bool {
    queue.capacity > 0 && queue.live as f64 >= queue.capacity as f64 * QUEUE_DEGRADED_RATIO
}

/// Health check endpoint handler.
///
/// `503` when every tier's breaker is open; `200` otherwise, including
/// while degraded.
#[instrument(name = "health_check", skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Response {
    let response = assess(&state.gateway);

    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    debug!(status = ?response.status, live = response.queue.live, "Health check completed");

    (status_code, Json(response)).into_response()
}

/// Readiness check endpoint for Kubernetes probes.
///
/// Ready once workers run, some tier admits calls and the queue has room.
#[instrument(name = "readiness_check", skip(state))]
pub async fn readiness_check(State(state): State<AppState>) -> Response {
    let gateway = &state.gateway;
    let queue = gateway.queue_stats();
    let ready = gateway.is_running() && !gateway.all_circuits_open() && queue.live < queue.capacity;

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    let response = serde_json::json!({
        "status": if ready { "ready" } else { "not_ready" },
        "timestamp": gateway.clock().now_utc(),
    });

    (status_code, Json(response)).into_response()
}

/// Liveness check endpoint for Kubernetes probes.
///
/// Returns a simple response indicating the service process is alive.
#[instrument(name = "liveness_check", skip(state))]
pub async fn liveness_check(State(state): State<AppState>) -> Response {
    debug!("Performing liveness check");

    let response = serde_json::json!({
        "status": "alive",
        "timestamp": state.gateway.clock().now_utc(),
        "service": "tiergate"
    });

    (StatusCode::OK, Json(response)).into_response()
}

/// `GET /circuits`
#[instrument(name = "list_circuits", skip(state))]
pub async fn list_circuits(State(state): State<AppState>) -> Json<CircuitsResponse> {
    Json(CircuitsResponse { circuits: state.gateway.circuit_snapshots() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_pressure_threshold() {
        let stats = |live| QueueStats { capacity: 100, live, pending: live, locked_partitions: 0 };

        assert!(!queue_pressured(&stats(89)));
        assert!(queue_pressured(&stats(90)));
        assert!(queue_pressured(&stats(100)));
    }
}
