//! Outbound execution: `POST /operations`.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tiergate_core::{GatewayError, Operation, TierName};
use tracing::{info, instrument, warn};

use super::error_response;
use crate::server::AppState;

/// Body of a served operation.
#[derive(Debug, Serialize)]
pub struct OperationResponse {
    /// Correlation id of the operation
    pub operation_id: String,
    /// Tier that served it
    pub tier: TierName,
    /// Tiers that failed before it, in order
    pub failed_over: Vec<TierName>,
    /// Status reported by the tier
    pub status: u16,
    /// Tier response body
    pub body: serde_json::Value,
}

/// Routes and executes one operation with failover.
///
/// Expects `{"kind": "single_record" | "bulk", "estimated_record_count": n,
/// "payload": {...}}`; an `id` is generated when omitted.
///
/// # Errors
///
/// Returns appropriate HTTP status codes:
/// - 400: Unparseable request or a tier rejected the input
/// - 503: No tier could serve the operation (`E3001`)
#[instrument(name = "execute_operation", skip(state, request))]
pub async fn execute_operation(
    State(state): State<AppState>,
    request: Result<Json<Operation>, JsonRejection>,
) -> Response {
    let operation = match request {
        Ok(Json(operation)) => operation,
        Err(rejection) => {
            warn!(error = %rejection, "invalid operation request");
            return error_response(&GatewayError::malformed(rejection.body_text()));
        },
    };
    let operation_id = operation.id;

    match state.gateway.execute(operation).await {
        Ok(execution) => {
            info!(
                operation_id = %operation_id,
                tier = %execution.tier,
                failed_over = execution.failed_over.len(),
                "operation served"
            );
            (
                StatusCode::OK,
                Json(OperationResponse {
                    operation_id: operation_id.to_string(),
                    tier: execution.tier,
                    failed_over: execution.failed_over,
                    status: execution.response.status,
                    body: execution.response.body,
                }),
            )
                .into_response()
        },
        Err(error) => {
            warn!(operation_id = %operation_id, error = %error, "operation failed");
            error_response(&error)
        },
    }
}
