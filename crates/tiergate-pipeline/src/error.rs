//! Error types for the ingestion pipeline.

use std::time::Duration;

use thiserror::Error;
use tiergate_core::GatewayError;

use crate::queue::QueueFull;

/// Pipeline-level failures.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Queue has no free capacity.
    #[error(transparent)]
    QueueFull(#[from] QueueFull),

    /// Dead-letter storage failed.
    #[error("dead-letter storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Workers did not stop within the shutdown deadline.
    #[error("graceful shutdown timed out after {timeout:?}")]
    ShutdownTimeout {
        /// Deadline that elapsed
        timeout: Duration,
    },

    /// A worker task panicked or was aborted.
    #[error("worker {worker_id} failed: {error}")]
    WorkerPanic {
        /// Worker index
        worker_id: usize,
        /// Join error text
        error: String,
    },

    /// Committer could not be constructed.
    #[error("committer configuration error: {0}")]
    Configuration(String),
}

/// Result alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

impl From<PipelineError> for GatewayError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::QueueFull(full) => Self::QueueFull { capacity: full.capacity },
            PipelineError::Storage(e) => Self::storage(e.to_string()),
            other => Self::storage(other.to_string()),
        }
    }
}
