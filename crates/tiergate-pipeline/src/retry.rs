//! Exponential backoff for failed commits, with timer-driven re-enqueue.
//!
//! `attempt_count` on an event counts retries already scheduled, so a failure
//! means `attempt_count + 1` attempts have been made. The next delay is
//! `base_delay * multiplier^attempt_count` with ±jitter, capped at
//! `max_delay`. Workers never wait out the delay themselves: the
//! [`RetryScheduler`] parks the event in a timer task and puts it back at the
//! front of its partition when the timer fires.
//!
//! The overall retry window of `max_attempts * max_delay` starts at the first
//! failed attempt, so time spent waiting in the queue does not count.

use std::{future::Future, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tiergate_core::{Clock, InboundEvent};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, warn};

use crate::queue::EventQueue;

/// Backoff and attempt ceiling for failed commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total processing attempts, including the first.
    pub max_attempts: u32,

    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Growth factor per retry.
    pub multiplier: f64,

    /// Upper bound on any single delay.
    pub max_delay: Duration,

    /// Jitter fraction (0.0 to 1.0) applied in both directions.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.2,
        }
    }
}

/// Outcome of scheduling a failed event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after the delay.
    Retry {
        /// Backoff before the next attempt
        after: Duration,
    },
    /// Give up and dead-letter.
    Exhausted {
        /// Why no further attempt is made
        reason: String,
    },
}

impl RetryPolicy {
    /// Decides what happens to `event` after a failed attempt at `now`.
    pub fn schedule(&self, event: &InboundEvent, now: DateTime<Utc>) -> RetryDecision {
        let attempts_made = event.attempt_count.saturating_add(1);
        if attempts_made >= self.max_attempts {
            return RetryDecision::Exhausted {
                reason: format!("maximum attempts ({}) reached", self.max_attempts),
            };
        }

        let window = self.max_lifetime();
        let retrying_since = event.first_failed_at.unwrap_or(now);
        if (now - retrying_since).to_std().unwrap_or_default() >= window {
            return RetryDecision::Exhausted {
                reason: format!("retry window of {}s exceeded", window.as_secs()),
            };
        }

        RetryDecision::Retry { after: self.delay_for(event.attempt_count) }
    }

    /// Delay before retry number `attempt_count + 1`, without jitter.
    pub fn backoff(&self, attempt_count: u32) -> Duration {
        self.capped(self.raw_backoff_secs(attempt_count))
    }

    /// Delay before retry number `attempt_count + 1`, with jitter.
    pub fn delay_for(&self, attempt_count: u32) -> Duration {
        let raw = self.raw_backoff_secs(attempt_count);
        self.capped(apply_jitter(raw, self.jitter_factor))
    }

    /// Upper bound on the time an event spends retrying after its first
    /// failure.
    pub fn max_lifetime(&self) -> Duration {
        self.max_delay.saturating_mul(self.max_attempts)
    }

    fn raw_backoff_secs(&self, attempt_count: u32) -> f64 {
        let exponent = i32::try_from(attempt_count).unwrap_or(i32::MAX);
        self.base_delay.as_secs_f64() * self.multiplier.powi(exponent)
    }

    fn capped(&self, secs: f64) -> Duration {
        if !secs.is_finite() {
            return self.max_delay;
        }
        Duration::try_from_secs_f64(secs.max(0.0)).map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

/// Randomizes `secs` by ±`jitter_factor`.
fn apply_jitter(secs: f64, jitter_factor: f64) -> f64 {
    if jitter_factor <= 0.0 || !secs.is_finite() || secs <= 0.0 {
        return secs;
    }

    let range = secs * jitter_factor.clamp(0.0, 1.0);
    secs + rand::rng().random_range(-range..=range)
}

/// Applies a [`RetryPolicy`] and owns the timers for scheduled retries.
#[derive(Debug, Clone)]
pub struct RetryScheduler {
    policy: RetryPolicy,
    queue: Arc<EventQueue>,
    clock: Arc<dyn Clock>,
    timers: TaskTracker,
    cancellation: CancellationToken,
}

impl RetryScheduler {
    /// Creates a scheduler that re-enqueues into `queue`.
    pub fn new(
        policy: RetryPolicy,
        queue: Arc<EventQueue>,
        clock: Arc<dyn Clock>,
        cancellation: CancellationToken,
    ) -> Self {
        Self { policy, queue, clock, timers: TaskTracker::new(), cancellation }
    }

    /// Policy in effect.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Decides what happens to a failed event.
    pub fn schedule(&self, event: &InboundEvent) -> RetryDecision {
        self.policy.schedule(event, self.clock.now_utc())
    }

    /// Increments the event's attempt count and re-enqueues it after `after`.
    /// The first retry stamps `first_failed_at`.
    ///
    /// The event keeps its queue slot and its partition stays locked until
    /// the timer fires. On cancellation the event is put back immediately so
    /// it is not stranded.
    pub fn retry_after(&self, mut event: InboundEvent, after: Duration) {
        event.attempt_count = event.attempt_count.saturating_add(1);
        event.first_failed_at.get_or_insert_with(|| self.clock.now_utc());

        let queue = self.queue.clone();
        let clock = self.clock.clone();
        let cancellation = self.cancellation.clone();

        self.timers.spawn(async move {
            tokio::select! {
                () = clock.sleep(after) => {
                    debug!(
                        event_id = %event.event_id,
                        partition_key = %event.partition_key,
                        attempt = event.attempt_count,
                        "retry timer fired"
                    );
                },
                () = cancellation.cancelled() => {
                    warn!(event_id = %event.event_id, "retry timer cancelled; re-enqueueing now");
                },
            }
            queue.requeue(event);
        });
    }

    /// Runs `task` alongside the retry timers so [`drain`](Self::drain)
    /// waits for it too.
    pub(crate) fn track<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.timers.spawn(task);
    }

    /// Number of retry timers still running.
    pub fn pending(&self) -> usize {
        self.timers.len()
    }

    /// Waits for every running retry timer to finish.
    pub async fn drain(&self) {
        self.timers.close();
        self.timers.wait().await;
        self.timers.reopen();
    }
}
