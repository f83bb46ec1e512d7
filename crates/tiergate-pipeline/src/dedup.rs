//! TTL-bounded record of event ids already accepted.
//!
//! Backed by a sharded concurrent map so check-and-insert for one id is
//! atomic without serializing unrelated ids. Entries are write-once and only
//! disappear by expiring; [`DedupCache::sweep_expired`] reclaims them.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use dashmap::{mapref::entry::Entry, DashMap};
use tiergate_core::{Clock, EventId};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Longest accepted entry lifetime (30 days).
pub const MAX_DEDUP_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Seen-id set with per-entry expiry.
#[derive(Debug)]
pub struct DedupCache {
    entries: DashMap<EventId, Instant>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl DedupCache {
    /// Creates an empty cache whose entries live for `ttl`.
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self { entries: DashMap::new(), ttl, clock }
    }

    /// Records `event_id` unless a live entry already exists.
    ///
    /// Returns `true` if this call inserted the id and `false` if it was a
    /// duplicate. An expired entry is replaced as if absent.
    pub fn insert_if_absent(&self, event_id: &EventId) -> bool {
        let now = self.clock.now();
        let expires_at = expiry(now, self.ttl);

        match self.entries.entry(event_id.clone()) {
            Entry::Occupied(mut existing) => {
                if *existing.get() > now {
                    return false;
                }
                existing.insert(expires_at);
                true
            },
            Entry::Vacant(slot) => {
                slot.insert(expires_at);
                true
            },
        }
    }

    /// Whether `event_id` has a live entry.
    pub fn contains(&self, event_id: &EventId) -> bool {
        let now = self.clock.now();
        self.entries.get(event_id).is_some_and(|expires_at| *expires_at > now)
    }

    /// Drops expired entries and returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, expires_at| *expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    /// Number of entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Runs [`sweep_expired`](Self::sweep_expired) every `interval` until
    /// cancelled.
    pub async fn run_sweeper(self: Arc<Self>, interval: Duration, cancellation: CancellationToken) {
        info!(interval_ms = interval.as_millis(), "dedup sweeper started");
        loop {
            tokio::select! {
                () = tokio::time::sleep(interval) => {
                    let removed = self.sweep_expired();
                    if removed > 0 {
                        debug!(removed, remaining = self.len(), "swept expired dedup entries");
                    }
                }
                () = cancellation.cancelled() => break,
            }
        }
        info!("dedup sweeper stopped");
    }
}

/// `now + ttl`, saturating at the furthest representable instant.
fn expiry(now: Instant, ttl: Duration) -> Instant {
    if let Some(at) = now.checked_add(ttl) {
        return at;
    }

    let mut furthest = now;
    let mut step = ttl;
    while !step.is_zero() {
        if let Some(next) = furthest.checked_add(step) {
            furthest = next;
        } else {
            step /= 2;
        }
    }
    furthest
}
