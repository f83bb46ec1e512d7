//! HTTP implementation of [`TierClient`].
//!
//! Posts each operation as JSON to the tier's endpoint and classifies the
//! response for breaker accounting: 2xx succeeds, 408/429/5xx and transport
//! failures count against the tier, and any other 4xx is an input rejection.

use std::time::{Duration, Instant};

use reqwest::Response;
use serde::{Deserialize, Serialize};
use tiergate_core::{Operation, TierName};
use tracing::{debug, info_span, warn, Instrument};

use crate::{
    error::{RouterError, TierError},
    tier::{TierClient, TierResponse},
};

const MAX_ERROR_BODY_SIZE: usize = 1024;

/// Settings for HTTP tier clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpClientConfig {
    /// Transport-level timeout. The router applies its own per-call deadline
    /// on top of this.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(30), user_agent: "Tiergate/0.1".to_string() }
    }
}

/// Tier reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTierClient {
    tier: TierName,
    endpoint: String,
    client: reqwest::Client,
    config: HttpClientConfig,
}

#[derive(Serialize)]
struct OperationRequest<'a> {
    operation_id: String,
    kind: tiergate_core::OperationKind,
    estimated_record_count: u64,
    payload: &'a serde_json::Value,
}

impl HttpTierClient {
    /// Creates a client posting to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns `RouterError::Configuration` if the HTTP client cannot be
    /// built.
    pub fn new(
        tier: TierName,
        endpoint: impl Into<String>,
        config: HttpClientConfig,
    ) -> Result<Self, RouterError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| RouterError::configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { tier, endpoint: endpoint.into(), client, config })
    }

    /// Endpoint this client posts to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn into_tier_response(response: Response) -> Result<TierResponse, TierError> {
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| TierError::network(format!("failed to read response body: {e}")))?;

        if status.is_success() {
            let body = serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                serde_json::Value::String(String::from_utf8_lossy(&bytes).into_owned())
            });
            return Ok(TierResponse { status: status.as_u16(), body });
        }

        let end = bytes.len().min(MAX_ERROR_BODY_SIZE);
        Err(TierError::from_status(status.as_u16(), String::from_utf8_lossy(&bytes[..end])))
    }
}

#[async_trait::async_trait]
impl TierClient for HttpTierClient {
    async fn execute(&self, operation: &Operation) -> Result<TierResponse, TierError> {
        let span = info_span!(
            "tier_call",
            tier = %self.tier,
            operation_id = %operation.id,
            kind = %operation.kind,
        );

        async move {
            let started = Instant::now();
            let request = OperationRequest {
                operation_id: operation.id.to_string(),
                kind: operation.kind,
                estimated_record_count: operation.estimated_record_count,
                payload: &operation.payload,
            };

            let response = match self
                .client
                .post(&self.endpoint)
                .header("X-Operation-Id", operation.id.to_string())
                .json(&request)
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    warn!(
                        duration_ms = started.elapsed().as_millis(),
                        error = %e,
                        "tier request failed"
                    );
                    if e.is_timeout() {
                        let timeout_ms =
                            u64::try_from(self.config.timeout.as_millis()).unwrap_or(u64::MAX);
                        return Err(TierError::timeout(timeout_ms));
                    }
                    return Err(TierError::network(e.to_string()));
                },
            };

            debug!(
                status = response.status().as_u16(),
                duration_ms = started.elapsed().as_millis(),
                "tier responded"
            );

            Self::into_tier_response(response).await
        }
        .instrument(span)
        .await
    }
}
