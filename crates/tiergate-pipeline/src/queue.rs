//! Bounded event queue with per-partition ordering.
//!
//! Events sharing a partition key are handed out one at a time: once an event
//! is dequeued its partition is locked until the worker records a
//! disposition with [`EventQueue::release`] (commit or dead letter) or
//! [`EventQueue::requeue`] (retry). A retried event goes back to the front of
//! its partition, and the partition stays locked while the retry timer runs.
//!
//! Capacity counts every live event from acceptance to terminal disposition,
//! including claimed events and events waiting on a retry timer. Admission
//! fails fast when full, and a requeue can never fail.
//!
//! Which ready partition is served next is governed by [`FairnessPolicy`].

use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tiergate_core::{InboundEvent, PartitionKey};
use tokio::sync::{futures::Notified, Notify};
use tracing::{trace, warn};

/// Cross-partition scheduling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FairnessPolicy {
    /// Serve the partition whose head event was accepted earliest.
    Fifo,
    /// Rotate across ready partitions so a busy key cannot starve others.
    #[default]
    RoundRobin,
}

/// Queue is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("queue full: capacity {capacity} reached")]
pub struct QueueFull {
    /// Configured capacity.
    pub capacity: usize,
}

/// Point-in-time queue counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Maximum live events.
    pub capacity: usize,
    /// Live events: pending, claimed or awaiting retry.
    pub live: usize,
    /// Events waiting to be dequeued.
    pub pending: usize,
    /// Partitions currently locked by a worker or retry timer.
    pub locked_partitions: usize,
}

#[derive(Debug)]
struct QueuedEvent {
    seq: u64,
    event: InboundEvent,
}

#[derive(Debug, Default)]
struct Partition {
    events: VecDeque<QueuedEvent>,
    locked: bool,
    ready_slot: Option<u64>,
}

#[derive(Debug, Default)]
struct QueueState {
    partitions: HashMap<PartitionKey, Partition>,
    ready: BTreeMap<u64, PartitionKey>,
    next_seq: u64,
    next_turn: u64,
    pending: usize,
    locked: usize,
}

impl QueueState {
    fn mark_ready_if_eligible(&mut self, key: &PartitionKey, fairness: FairnessPolicy) -> bool {
        let Some(partition) = self.partitions.get_mut(key) else {
            return false;
        };
        if partition.locked || partition.ready_slot.is_some() {
            return false;
        }
        let Some(head) = partition.events.front() else {
            return false;
        };

        let slot = match fairness {
            FairnessPolicy::Fifo => head.seq,
            FairnessPolicy::RoundRobin => {
                self.next_turn += 1;
                self.next_turn
            },
        };
        partition.ready_slot = Some(slot);
        self.ready.insert(slot, key.clone());
        true
    }
}

/// Shared ingestion queue.
#[derive(Debug)]
pub struct EventQueue {
    capacity: usize,
    fairness: FairnessPolicy,
    occupancy: AtomicUsize,
    state: Mutex<QueueState>,
    notify: Notify,
}

/// Claimed capacity for one event not yet pushed.
///
/// Dropping an unused reservation returns the slot.
#[derive(Debug)]
#[must_use = "an unused reservation is released on drop"]
pub struct Reservation<'a> {
    queue: &'a EventQueue,
    armed: bool,
}

impl Reservation<'_> {
    /// Pushes `event` into the reserved slot.
    pub fn commit(mut self, event: InboundEvent) {
        self.armed = false;
        self.queue.push_back(event);
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.queue.release_slot();
        }
    }
}

impl EventQueue {
    /// Creates an empty queue.
    pub fn new(capacity: usize, fairness: FairnessPolicy) -> Self {
        Self {
            capacity,
            fairness,
            occupancy: AtomicUsize::new(0),
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    /// Maximum number of live events.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Cross-partition policy in effect.
    pub fn fairness(&self) -> FairnessPolicy {
        self.fairness
    }

    /// Live events: pending, claimed or awaiting retry.
    pub fn len(&self) -> usize {
        self.occupancy.load(Ordering::Acquire)
    }

    /// Whether no events are live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Claims one slot of capacity without pushing anything yet.
    ///
    /// # Errors
    ///
    /// Returns `QueueFull` when every slot is taken.
    pub fn reserve(&self) -> Result<Reservation<'_>, QueueFull> {
        self.occupancy
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                (live < self.capacity).then_some(live + 1)
            })
            .map_err(|_| QueueFull { capacity: self.capacity })?;
        Ok(Reservation { queue: self, armed: true })
    }

    /// Appends an event to its partition.
    ///
    /// # Errors
    ///
    /// Returns `QueueFull` without enqueueing when at capacity.
    pub fn enqueue(&self, event: InboundEvent) -> Result<(), QueueFull> {
        self.reserve()?.commit(event);
        Ok(())
    }

    /// Takes up to `max` events, at most one per partition, locking each
    /// partition served.
    pub fn dequeue_batch(&self, max: usize) -> Vec<InboundEvent> {
        let mut state = self.lock();
        let mut batch = Vec::with_capacity(max.min(state.pending));

        while batch.len() < max {
            let Some((_, key)) = state.ready.pop_first() else {
                break;
            };
            let Some(partition) = state.partitions.get_mut(&key) else {
                continue;
            };
            partition.ready_slot = None;
            let Some(queued) = partition.events.pop_front() else {
                continue;
            };
            partition.locked = true;
            state.pending -= 1;
            state.locked += 1;
            batch.push(queued.event);
        }

        if !batch.is_empty() {
            trace!(claimed = batch.len(), pending = state.pending, "dequeued batch");
        }
        batch
    }

    /// Records a terminal disposition for the partition's claimed event and
    /// unlocks the partition.
    pub fn release(&self, key: &PartitionKey) {
        let became_ready = {
            let mut state = self.lock();
            let Some(partition) = state.partitions.get_mut(key) else {
                warn!(partition_key = %key, "release for unknown partition");
                return;
            };
            if !partition.locked {
                warn!(partition_key = %key, "release for partition that is not locked");
                return;
            }
            partition.locked = false;
            state.locked -= 1;

            if state.partitions.get(key).is_some_and(|p| p.events.is_empty()) {
                state.partitions.remove(key);
                false
            } else {
                state.mark_ready_if_eligible(key, self.fairness)
            }
        };

        self.release_slot();
        if became_ready {
            self.notify.notify_one();
        }
    }

    /// Puts a claimed event back at the front of its partition and unlocks
    /// the partition. Never fails: the event already holds its slot.
    pub fn requeue(&self, event: InboundEvent) {
        {
            let mut state = self.lock();
            let seq = state.next_seq;
            state.next_seq += 1;
            let key = event.partition_key.clone();

            let partition = state.partitions.entry(key.clone()).or_default();
            let was_locked = partition.locked;
            partition.locked = false;
            partition.events.push_front(QueuedEvent { seq, event });
            if was_locked {
                state.locked -= 1;
            }
            state.pending += 1;
            state.mark_ready_if_eligible(&key, self.fairness);
        }
        self.notify.notify_one();
    }

    /// Resolves when new work may be available.
    pub fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }

    /// Queue counters.
    pub fn stats(&self) -> QueueStats {
        let state = self.lock();
        QueueStats {
            capacity: self.capacity,
            live: self.len(),
            pending: state.pending,
            locked_partitions: state.locked,
        }
    }

    fn push_back(&self, event: InboundEvent) {
        {
            let mut state = self.lock();
            let seq = state.next_seq;
            state.next_seq += 1;
            let key = event.partition_key.clone();

            let partition = state.partitions.entry(key.clone()).or_default();
            partition.events.push_back(QueuedEvent { seq, event });
            state.pending += 1;
            state.mark_ready_if_eligible(&key, self.fairness);
        }
        self.notify.notify_one();
    }

    fn release_slot(&self) {
        let _ = self.occupancy.fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
            live.checked_sub(1)
        });
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use chrono::Utc;
    use tiergate_core::EventId;

    use super::*;

    fn event(id: &str, key: &str) -> InboundEvent {
        InboundEvent {
            event_id: EventId::from(id),
            source: "crm".to_string(),
            partition_key: PartitionKey::from(key),
            received_at: Utc::now(),
            signature: String::new(),
            raw_payload: Bytes::from_static(b"{}"),
            attempt_count: 0,
            first_failed_at: None,
        }
    }

    fn ids(events: &[InboundEvent]) -> Vec<&str> {
        events.iter().map(|e| e.event_id.as_str()).collect()
    }

    #[test]
    fn enqueue_fails_fast_at_capacity() {
        let queue = EventQueue::new(2, FairnessPolicy::Fifo);
        queue.enqueue(event("e1", "a")).unwrap();
        queue.enqueue(event("e2", "b")).unwrap();

        assert_eq!(queue.enqueue(event("e3", "c")), Err(QueueFull { capacity: 2 }));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn partition_locked_until_release() {
        let queue = EventQueue::new(10, FairnessPolicy::Fifo);
        queue.enqueue(event("e1", "a")).unwrap();
        queue.enqueue(event("e2", "a")).unwrap();

        assert_eq!(ids(&queue.dequeue_batch(10)), vec!["e1"]);
        assert!(queue.dequeue_batch(10).is_empty());

        queue.release(&PartitionKey::from("a"));
        assert_eq!(ids(&queue.dequeue_batch(10)), vec!["e2"]);
    }

    #[test]
    fn batch_spans_partitions_one_event_each() {
        let queue = EventQueue::new(10, FairnessPolicy::Fifo);
        for (id, key) in [("e1", "a"), ("e2", "a"), ("e3", "b"), ("e4", "c")] {
            queue.enqueue(event(id, key)).unwrap();
        }

        assert_eq!(ids(&queue.dequeue_batch(10)), vec!["e1", "e3", "e4"]);
        assert_eq!(queue.stats().locked_partitions, 3);
        assert_eq!(queue.stats().pending, 1);
    }

    #[test]
    fn requeue_returns_event_to_front_of_partition() {
        let queue = EventQueue::new(10, FairnessPolicy::Fifo);
        queue.enqueue(event("e1", "a")).unwrap();
        queue.enqueue(event("e2", "a")).unwrap();

        let mut claimed = queue.dequeue_batch(1);
        let mut retried = claimed.remove(0);
        retried.attempt_count += 1;
        queue.requeue(retried);

        let again = queue.dequeue_batch(10);
        assert_eq!(ids(&again), vec!["e1"]);
        assert_eq!(again[0].attempt_count, 1);
        assert_eq!(queue.len(), 2, "requeue keeps the slot");
    }

    #[test]
    fn release_frees_capacity() {
        let queue = EventQueue::new(1, FairnessPolicy::Fifo);
        queue.enqueue(event("e1", "a")).unwrap();
        queue.dequeue_batch(1);
        assert!(queue.enqueue(event("e2", "b")).is_err());

        queue.release(&PartitionKey::from("a"));

        assert!(queue.is_empty());
        assert!(queue.enqueue(event("e2", "b")).is_ok());
    }

    #[test]
    fn dropped_reservation_returns_slot() {
        let queue = EventQueue::new(1, FairnessPolicy::Fifo);

        let reservation = queue.reserve().unwrap();
        assert!(queue.reserve().is_err());
        drop(reservation);

        assert!(queue.reserve().is_ok());
    }

    #[test]
    fn round_robin_interleaves_busy_partition() {
        let queue = EventQueue::new(20, FairnessPolicy::RoundRobin);
        for i in 0..3 {
            queue.enqueue(event(&format!("a{i}"), "a")).unwrap();
        }
        queue.enqueue(event("b0", "b")).unwrap();

        let first = queue.dequeue_batch(1);
        assert_eq!(ids(&first), vec!["a0"]);
        queue.release(&PartitionKey::from("a"));

        // "a" went to the back of the rotation behind "b".
        assert_eq!(ids(&queue.dequeue_batch(1)), vec!["b0"]);
        assert_eq!(ids(&queue.dequeue_batch(1)), vec!["a1"]);
    }

    #[test]
    fn fifo_serves_oldest_head_first() {
        let queue = EventQueue::new(20, FairnessPolicy::Fifo);
        queue.enqueue(event("a0", "a")).unwrap();
        queue.enqueue(event("b0", "b")).unwrap();
        queue.enqueue(event("a1", "a")).unwrap();

        assert_eq!(ids(&queue.dequeue_batch(1)), vec!["a0"]);
        queue.release(&PartitionKey::from("a"));

        assert_eq!(ids(&queue.dequeue_batch(2)), vec!["b0", "a1"]);
    }
}
