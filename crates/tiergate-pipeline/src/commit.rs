//! Downstream commit collaborator.
//!
//! Committing applies an inbound event to downstream state. Implementations
//! must be idempotent per event id: the pipeline delivers at least once, so
//! the same event can be committed again after a retry or a replay.

use std::{fmt::Debug, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tiergate_core::{CommitOutcome, InboundEvent};
use tracing::{debug, info_span, warn, Instrument};

use crate::error::{PipelineError, Result};

const MAX_REASON_BODY_SIZE: usize = 512;

/// Applies an event downstream.
#[async_trait]
pub trait EventCommitter: Send + Sync + Debug {
    /// Commits one event. Must be idempotent by `event.event_id`.
    async fn commit(&self, event: &InboundEvent) -> CommitOutcome;
}

/// Settings for [`HttpCommitter`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpCommitterConfig {
    /// Request timeout.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
}

impl Default for HttpCommitterConfig {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(10), user_agent: "Tiergate/0.1".to_string() }
    }
}

/// Forwards raw payloads to a downstream HTTP endpoint.
///
/// 2xx commits. 408, 429, 5xx and transport failures are retryable; any
/// other 4xx is permanent.
#[derive(Debug, Clone)]
pub struct HttpCommitter {
    url: String,
    client: reqwest::Client,
}

impl HttpCommitter {
    /// Creates a committer posting to `url`.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Configuration` if the HTTP client cannot be
    /// built.
    pub fn new(url: impl Into<String>, config: &HttpCommitterConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| {
                PipelineError::Configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { url: url.into(), client })
    }

    /// Endpoint events are committed to.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl EventCommitter for HttpCommitter {
    async fn commit(&self, event: &InboundEvent) -> CommitOutcome {
        let span = info_span!(
            "commit",
            event_id = %event.event_id,
            partition_key = %event.partition_key,
            attempt = event.attempt_count,
        );

        async move {
            let response = match self
                .client
                .post(&self.url)
                .header("content-type", "application/json")
                .header("X-Event-Id", event.event_id.as_str())
                .header("X-Partition-Key", event.partition_key.as_str())
                .header("X-Attempt-Count", event.attempt_count.to_string())
                .body(event.raw_payload.clone())
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    warn!(error = %e, "commit request failed");
                    return CommitOutcome::retryable(format!("commit request failed: {e}"));
                },
            };

            let status = response.status();
            if status.is_success() {
                debug!(status = status.as_u16(), "event committed");
                return CommitOutcome::Success;
            }

            let body = response.text().await.unwrap_or_default();
            let reason = format!("HTTP {}: {}", status.as_u16(), truncate(&body));
            match status.as_u16() {
                408 | 429 => CommitOutcome::retryable(reason),
                400..=499 => CommitOutcome::permanent(reason),
                _ => CommitOutcome::retryable(reason),
            }
        }
        .instrument(span)
        .await
    }
}

fn truncate(body: &str) -> &str {
    if body.len() <= MAX_REASON_BODY_SIZE {
        return body;
    }
    let mut end = MAX_REASON_BODY_SIZE;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}
