//! Worker pool lifecycle: spawn, supervise, shut down.

use std::{sync::Arc, time::Duration};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    error::{PipelineError, Result},
    worker::{Worker, WorkerContext},
};

/// Supervised set of pipeline workers sharing one queue.
///
/// Call [`shutdown_graceful`](Self::shutdown_graceful) before dropping;
/// dropping a running pool cancels its workers and logs an error.
#[derive(Debug)]
pub struct WorkerPool {
    context: Arc<WorkerContext>,
    cancellation_token: CancellationToken,
    worker_handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub(crate) fn new(context: Arc<WorkerContext>, cancellation_token: CancellationToken) -> Self {
        Self { context, cancellation_token, worker_handles: Vec::new() }
    }

    /// Spawns the configured number of workers.
    ///
    /// # Errors
    ///
    /// Currently never fails; the signature leaves room for spawn-time
    /// validation.
    pub async fn spawn_workers(&mut self) -> Result<()> {
        let worker_count = self.context.config.worker_count;
        info!(worker_count, "spawning pipeline workers");

        self.context.stats.write().await.active_workers = worker_count;

        for worker_id in 0..worker_count {
            let worker =
                Worker::new(worker_id, self.context.clone(), self.cancellation_token.clone());
            self.worker_handles.push(tokio::spawn(async move { worker.run().await }));
        }

        info!(spawned_workers = self.worker_handles.len(), "all pipeline workers spawned");
        Ok(())
    }

    /// Cancels workers and waits for their in-flight events to finish.
    ///
    /// # Errors
    ///
    /// Returns `ShutdownTimeout` if workers are still running after
    /// `timeout`, or `WorkerPanic` for the first worker that panicked.
    pub async fn shutdown_graceful(mut self, timeout: Duration) -> Result<()> {
        info!(
            worker_count = self.worker_handles.len(),
            timeout_seconds = timeout.as_secs(),
            "initiating graceful worker shutdown"
        );

        self.cancellation_token.cancel();
        let handles = std::mem::take(&mut self.worker_handles);

        let join_all = async {
            let mut first_panic = None;
            for (worker_id, handle) in handles.into_iter().enumerate() {
                if let Err(join_error) = handle.await {
                    error!(worker_id, error = %join_error, "worker task panicked during shutdown");
                    first_panic.get_or_insert(PipelineError::WorkerPanic {
                        worker_id,
                        error: join_error.to_string(),
                    });
                }
            }
            self.context.stats.write().await.active_workers = 0;
            first_panic
        };

        match tokio::time::timeout(timeout, join_all).await {
            Ok(None) => {
                info!("worker pool shutdown completed");
                Ok(())
            },
            Ok(Some(panic)) => Err(panic),
            Err(_elapsed) => {
                error!(
                    timeout_seconds = timeout.as_secs(),
                    "worker shutdown timed out, some workers may still be running"
                );
                Err(PipelineError::ShutdownTimeout { timeout })
            },
        }
    }

    /// Whether any worker task is still running.
    pub fn has_active_workers(&self) -> bool {
        self.worker_handles.iter().any(|h| !h.is_finished())
    }

    /// Number of spawned worker tasks.
    pub fn worker_count(&self) -> usize {
        self.worker_handles.len()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        let active_count = self.worker_handles.iter().filter(|h| !h.is_finished()).count();

        if active_count > 0 && !self.cancellation_token.is_cancelled() {
            error!(active_workers = active_count, "worker pool dropped while workers active");
            self.cancellation_token.cancel();
            warn!("call shutdown_graceful() before dropping the worker pool");
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use bytes::Bytes;
    use tiergate_core::{
        CommitOutcome, EventId, InboundEvent, NoOpEventHandler, PartitionKey, RealClock,
    };
    use tokio::sync::RwLock;

    use super::*;
    use crate::{
        commit::EventCommitter,
        dead_letter::InMemoryDeadLetterStore,
        queue::{EventQueue, FairnessPolicy},
        retry::{RetryPolicy, RetryScheduler},
        worker::{PipelineConfig, PipelineStats},
    };

    #[derive(Debug)]
    struct AlwaysCommits;

    #[async_trait]
    impl EventCommitter for AlwaysCommits {
        async fn commit(&self, _event: &InboundEvent) -> CommitOutcome {
            CommitOutcome::Success
        }
    }

    fn pool(worker_count: usize) -> (WorkerPool, Arc<EventQueue>) {
        let queue = Arc::new(EventQueue::new(64, FairnessPolicy::RoundRobin));
        let token = CancellationToken::new();
        let clock = Arc::new(RealClock::new());
        let config = PipelineConfig {
            worker_count,
            poll_interval: Duration::from_millis(20),
            ..PipelineConfig::default()
        };
        let context = Arc::new(WorkerContext {
            queue: queue.clone(),
            committer: Arc::new(AlwaysCommits),
            dead_letters: Arc::new(InMemoryDeadLetterStore::new()),
            retry: RetryScheduler::new(
                RetryPolicy::default(),
                queue.clone(),
                clock.clone(),
                token.clone(),
            ),
            config,
            stats: Arc::new(RwLock::new(PipelineStats::default())),
            event_handler: Arc::new(NoOpEventHandler::new()),
            clock,
        });
        (WorkerPool::new(context, token), queue)
    }

    #[tokio::test]
    async fn spawns_configured_number_of_workers() {
        let (mut pool, _) = pool(3);

        pool.spawn_workers().await.unwrap();

        assert_eq!(pool.worker_count(), 3);
        assert_eq!(pool.context.stats.read().await.active_workers, 3);
        pool.shutdown_graceful(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn workers_drain_queue_then_shut_down() {
        let (mut pool, queue) = pool(2);
        let stats = pool.context.stats.clone();
        pool.spawn_workers().await.unwrap();

        for i in 0..10 {
            queue
                .enqueue(InboundEvent {
                    event_id: EventId::from(format!("e{i}")),
                    source: "crm".to_string(),
                    partition_key: PartitionKey::from(format!("p{}", i % 3)),
                    received_at: chrono::Utc::now(),
                    signature: String::new(),
                    raw_payload: Bytes::new(),
                    attempt_count: 0,
                    first_failed_at: None,
                })
                .unwrap();
        }

        tokio::time::timeout(Duration::from_secs(5), async {
            while !queue.is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("workers should drain the queue");

        pool.shutdown_graceful(Duration::from_secs(1)).await.unwrap();
        let stats = stats.read().await;
        assert_eq!(stats.committed, 10);
        assert_eq!(stats.active_workers, 0);
    }

    #[tokio::test]
    async fn shutdown_without_spawn_succeeds() {
        let (pool, _) = pool(2);
        assert!(pool.shutdown_graceful(Duration::from_millis(1)).await.is_ok());
    }
}
