//! HTTP request handlers for the tiergate API.
//!
//! Handlers stay thin: they translate HTTP into calls on the
//! [`Gateway`](crate::Gateway) and translate outcomes back.
//!
//! # Error Handling
//!
//! Every failure is rendered by [`error_response`] as
//! `{"error": {"code", "class", "message"}}` with the status the
//! [`GatewayError`] maps to. Backpressure responses also carry
//! `Retry-After`.

pub mod dead_letters;
pub mod health;
pub mod operations;
pub mod webhooks;

use axum::{
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tiergate_core::{ErrorClass, GatewayError};

pub use dead_letters::{get_dead_letter, list_dead_letters, replay_dead_letter};
pub use health::{health_check, list_circuits, liveness_check, readiness_check};
pub use operations::execute_operation;
pub use webhooks::receive_webhook;

/// Seconds a sender is asked to wait after backpressure.
pub const RETRY_AFTER_SECONDS: u64 = 5;

/// Error response with code and message.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error details including code and message
    pub error: ErrorDetail,
}

/// Detailed error information.
#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    /// Error code from the taxonomy (E1001-E3004)
    pub code: String,
    /// Failure class
    pub class: ErrorClass,
    /// Human-readable error description
    pub message: String,
}

/// Creates a standardized error response.
pub fn error_response(error: &GatewayError) -> Response {
    let status =
        StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let message = match error {
        // Verification details stay in the logs.
        GatewayError::InvalidSignature => "webhook authentication failed".to_string(),
        other => other.to_string(),
    };
    let body = ErrorResponse {
        error: ErrorDetail { code: error.code().to_string(), class: error.class(), message },
    };

    let mut response = (status, Json(body)).into_response();
    if status == StatusCode::SERVICE_UNAVAILABLE {
        response.headers_mut().insert(RETRY_AFTER, HeaderValue::from(RETRY_AFTER_SECONDS));
    }
    response
}

/// [`GatewayError`] as an axum response.
#[derive(Debug)]
pub struct ApiError(pub GatewayError);

impl From<GatewayError> for ApiError {
    fn from(error: GatewayError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error_response(&self.0)
    }
}
