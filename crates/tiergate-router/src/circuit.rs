//! Per-tier circuit breaker.
//!
//! Each tier owns one [`CircuitBreaker`]. The breaker fails fast while a tier
//! is unhealthy and lets a single probe through to test recovery.
//!
//! # State Machine
//!
//! ```text
//!                     ┌──────────────────────────┐
//!                     │          CLOSED          │
//!                     │ ● all calls admitted     │
//!                     │ ● counts failure streak  │
//!                     └──────────────────────────┘
//!                        │                    ▲
//!   threshold consecutive│                    │ probe succeeds
//!   failures in window   │                    │
//!                        ▼                    │
//!  ┌──────────────────────────┐  reset   ┌──────────────────────────┐
//!  │           OPEN           │ timeout  │        HALF-OPEN         │
//!  │ ● calls rejected         │ ───────▶ │ ● exactly one probe      │
//!  │                          │ ◀─────── │ ● others rejected        │
//!  └──────────────────────────┘  probe   └──────────────────────────┘
//!                                fails
//! ```
//!
//! Callers obtain a [`Permit`] from [`CircuitBreaker::try_acquire`] and hand
//! it back with the call's outcome. Permits remember the breaker generation
//! they were issued in; outcomes reported on a permit from an earlier
//! generation update totals only and never drive transitions.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use tiergate_core::{CircuitState, Clock, TierName};
use tracing::{debug, info, warn};

/// Breaker thresholds shared by every tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// A failure streak older than this restarts from zero.
    pub failure_window: Duration,
    /// How long the circuit stays open before admitting a probe.
    pub reset_timeout: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window: Duration::from_secs(60),
            reset_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PermitKind {
    Normal,
    Probe,
}

/// Admission ticket for one call through a breaker.
#[must_use = "a permit must be resolved with record_success, record_failure or release"]
#[derive(Debug, PartialEq, Eq)]
pub struct Permit {
    kind: PermitKind,
    generation: u64,
}

impl Permit {
    /// Whether this permit is the half-open probe.
    pub fn is_probe(&self) -> bool {
        self.kind == PermitKind::Probe
    }
}

/// Point-in-time view of a breaker for health reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitSnapshot {
    /// Tier the breaker guards.
    pub tier: TierName,
    /// Current state.
    pub state: CircuitState,
    /// Length of the current failure streak.
    pub consecutive_failures: u32,
    /// Successful calls since startup.
    pub total_successes: u64,
    /// Breaker-countable failures since startup.
    pub total_failures: u64,
    /// Successes over all counted calls; 1.0 before any call.
    pub success_ratio: f64,
    /// Whether the half-open probe is outstanding.
    pub probe_in_flight: bool,
    /// Time spent in the current state, in milliseconds.
    pub state_age_ms: u64,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    generation: u64,
    consecutive_failures: u32,
    streak_started_at: Option<Instant>,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
    total_successes: u64,
    total_failures: u64,
    last_state_change: Instant,
}

impl BreakerState {
    fn success_ratio(&self) -> f64 {
        let total = self.total_successes + self.total_failures;
        if total == 0 {
            1.0
        } else {
            self.total_successes as f64 / total as f64
        }
    }
}

/// Failure counter and state machine for one tier.
///
/// All transitions happen under the breaker's own mutex, and the lock is
/// never held across the guarded call.
#[derive(Debug)]
pub struct CircuitBreaker {
    tier: TierName,
    config: CircuitConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Creates a closed breaker for `tier`.
    pub fn new(tier: TierName, config: CircuitConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            tier,
            config,
            clock,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                generation: 0,
                consecutive_failures: 0,
                streak_started_at: None,
                opened_at: None,
                probe_in_flight: false,
                total_successes: 0,
                total_failures: 0,
                last_state_change: now,
            }),
        }
    }

    /// Tier this breaker guards.
    pub fn tier(&self) -> &TierName {
        &self.tier
    }

    /// Requests admission for one call.
    ///
    /// Returns `None` while open, or while half-open with the probe already
    /// out. An open breaker whose reset timeout has elapsed moves to half-open
    /// here and hands out the probe.
    #[allow(clippy::significant_drop_tightening)] // check and claim must be one critical section
    pub fn try_acquire(&self) -> Option<Permit> {
        let now = self.clock.now();
        let mut inner = self.lock();
        self.refresh(&mut inner, now);

        match inner.state {
            CircuitState::Closed => {
                Some(Permit { kind: PermitKind::Normal, generation: inner.generation })
            },
            CircuitState::Open => None,
            CircuitState::HalfOpen if inner.probe_in_flight => None,
            CircuitState::HalfOpen => {
                inner.probe_in_flight = true;
                debug!(tier = %self.tier, "admitting half-open probe");
                Some(Permit { kind: PermitKind::Probe, generation: inner.generation })
            },
        }
    }

    /// Records a successful call.
    pub fn record_success(&self, permit: Permit) {
        let now = self.clock.now();
        let mut inner = self.lock();
        inner.total_successes += 1;

        if permit.generation != inner.generation {
            return;
        }

        match (inner.state, permit.kind) {
            (CircuitState::Closed, _) => {
                inner.consecutive_failures = 0;
                inner.streak_started_at = None;
            },
            (CircuitState::HalfOpen, PermitKind::Probe) => {
                self.transition_to_closed(&mut inner, now);
            },
            _ => {},
        }
    }

    /// Records a breaker-countable failure (transport, timeout, 5xx).
    pub fn record_failure(&self, permit: Permit) {
        let now = self.clock.now();
        let mut inner = self.lock();
        inner.total_failures += 1;

        if permit.generation != inner.generation {
            return;
        }

        match (inner.state, permit.kind) {
            (CircuitState::Closed, _) => {
                let window = self.config.failure_window;
                let streak_expired = inner
                    .streak_started_at
                    .is_some_and(|started| now.duration_since(started) > window);
                if streak_expired {
                    inner.consecutive_failures = 0;
                    inner.streak_started_at = None;
                }
                if inner.consecutive_failures == 0 {
                    inner.streak_started_at = Some(now);
                }
                inner.consecutive_failures += 1;

                if inner.consecutive_failures >= self.config.failure_threshold {
                    self.transition_to_open(&mut inner, now);
                }
            },
            (CircuitState::HalfOpen, PermitKind::Probe) => self.transition_to_open(&mut inner, now),
            _ => {},
        }
    }

    /// Returns a permit without an outcome that counts.
    ///
    /// Used for input errors and abandoned calls. A released probe frees the
    /// half-open slot so the next caller can probe.
    pub fn release(&self, permit: Permit) {
        let mut inner = self.lock();
        if permit.generation == inner.generation
            && permit.kind == PermitKind::Probe
            && inner.state == CircuitState::HalfOpen
        {
            inner.probe_in_flight = false;
        }
    }

    /// Current state, applying a pending open to half-open transition.
    pub fn state(&self) -> CircuitState {
        let now = self.clock.now();
        let mut inner = self.lock();
        self.refresh(&mut inner, now);
        inner.state
    }

    /// Successes over all counted calls; 1.0 before any call.
    pub fn success_ratio(&self) -> f64 {
        self.lock().success_ratio()
    }

    /// Health snapshot.
    pub fn snapshot(&self) -> CircuitSnapshot {
        let now = self.clock.now();
        let mut inner = self.lock();
        self.refresh(&mut inner, now);

        CircuitSnapshot {
            tier: self.tier.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            total_successes: inner.total_successes,
            total_failures: inner.total_failures,
            success_ratio: inner.success_ratio(),
            probe_in_flight: inner.probe_in_flight,
            state_age_ms: duration_ms(now.duration_since(inner.last_state_change)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn refresh(&self, inner: &mut BreakerState, now: Instant) {
        if inner.state != CircuitState::Open {
            return;
        }
        let elapsed = inner.opened_at.map_or(Duration::MAX, |opened| now.duration_since(opened));
        if elapsed >= self.config.reset_timeout {
            self.transition_to_half_open(inner, now);
        }
    }

    fn transition_to_open(&self, inner: &mut BreakerState, now: Instant) {
        warn!(
            tier = %self.tier,
            from = %inner.state,
            consecutive_failures = inner.consecutive_failures,
            reset_timeout_ms = duration_ms(self.config.reset_timeout),
            "circuit breaker opening"
        );

        inner.state = CircuitState::Open;
        inner.generation += 1;
        inner.opened_at = Some(now);
        inner.probe_in_flight = false;
        inner.last_state_change = now;
    }

    fn transition_to_half_open(&self, inner: &mut BreakerState, now: Instant) {
        info!(tier = %self.tier, "circuit breaker half-open, awaiting probe");

        inner.state = CircuitState::HalfOpen;
        inner.generation += 1;
        inner.probe_in_flight = false;
        inner.last_state_change = now;
    }

    fn transition_to_closed(&self, inner: &mut BreakerState, now: Instant) {
        info!(tier = %self.tier, "circuit breaker closed, tier recovered");

        inner.state = CircuitState::Closed;
        inner.generation += 1;
        inner.consecutive_failures = 0;
        inner.streak_started_at = None;
        inner.opened_at = None;
        inner.probe_in_flight = false;
        inner.last_state_change = now;
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
