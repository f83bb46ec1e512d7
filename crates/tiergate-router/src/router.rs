//! Tier selection with failover.
//!
//! The router holds the tiers fixed at startup, each paired with its client
//! and breaker. [`TierRouter::route`] picks a tier and returns a
//! [`TierLease`]; the caller reports the call's outcome through the lease.
//! [`TierRouter::execute`] wraps route, call and report, cascading to the
//! next tier when a call fails in a way that counts against the breaker.
//!
//! Selection order is ascending priority, then higher success ratio, then
//! declaration order. A tier is skipped when its breaker refuses admission or
//! when it cannot carry the operation. If nothing suitable is admissible the
//! lowest-priority tier is tried regardless of fit.

use std::{sync::Arc, time::Duration};

use tiergate_core::{CircuitState, Clock, Operation, TierDescriptor, TierName};
use tracing::{debug, info, warn};

use crate::{
    circuit::{CircuitBreaker, CircuitConfig, CircuitSnapshot, Permit},
    error::{RouterError, TierError},
    tier::{TierClient, TierResponse},
};

#[derive(Debug)]
struct TierSlot {
    descriptor: TierDescriptor,
    client: Arc<dyn TierClient>,
    breaker: CircuitBreaker,
    declared_at: usize,
}

/// Builder for a [`TierRouter`].
#[derive(Debug)]
pub struct TierRouterBuilder {
    config: CircuitConfig,
    clock: Arc<dyn Clock>,
    tiers: Vec<(TierDescriptor, Arc<dyn TierClient>)>,
}

impl TierRouterBuilder {
    /// Registers a tier. Declaration order breaks remaining selection ties.
    #[must_use]
    pub fn tier(mut self, descriptor: TierDescriptor, client: Arc<dyn TierClient>) -> Self {
        self.tiers.push((descriptor, client));
        self
    }

    /// Builds the router.
    ///
    /// # Errors
    ///
    /// Returns `RouterError::DuplicateTier` if two tiers share a name.
    pub fn build(self) -> Result<TierRouter, RouterError> {
        let mut slots: Vec<Arc<TierSlot>> = Vec::with_capacity(self.tiers.len());

        for (declared_at, (descriptor, client)) in self.tiers.into_iter().enumerate() {
            if slots.iter().any(|slot| slot.descriptor.name == descriptor.name) {
                return Err(RouterError::DuplicateTier(descriptor.name));
            }
            let breaker = CircuitBreaker::new(
                descriptor.name.clone(),
                self.config.clone(),
                self.clock.clone(),
            );
            slots.push(Arc::new(TierSlot { descriptor, client, breaker, declared_at }));
        }

        info!(tier_count = slots.len(), "tier router initialized");
        Ok(TierRouter { slots })
    }
}

/// Routes outbound operations across access tiers.
#[derive(Debug)]
pub struct TierRouter {
    slots: Vec<Arc<TierSlot>>,
}

/// Selected tier plus its breaker permit.
///
/// Dropping a lease without reporting an outcome releases the permit
/// neutrally.
#[derive(Debug)]
pub struct TierLease {
    slot: Arc<TierSlot>,
    permit: Option<Permit>,
}

/// Successful routed call.
#[derive(Debug, Clone, PartialEq)]
pub struct TierExecution {
    /// Tier that served the call.
    pub tier: TierName,
    /// Its response.
    pub response: TierResponse,
    /// Tiers that failed before this one, in order.
    pub failed_over: Vec<TierName>,
}

impl TierRouter {
    /// Starts a router definition.
    pub fn builder(config: CircuitConfig, clock: Arc<dyn Clock>) -> TierRouterBuilder {
        TierRouterBuilder { config, clock, tiers: Vec::new() }
    }

    /// Picks a tier for `operation`.
    ///
    /// # Errors
    ///
    /// Returns `RouterError::NoAvailableTier` when no tier admits the call.
    pub fn route(&self, operation: &Operation) -> Result<TierLease, RouterError> {
        self.select(operation, &[]).ok_or_else(|| RouterError::NoAvailableTier {
            operation_id: operation.id,
            kind: operation.kind,
            attempted: Vec::new(),
            last_error: None,
        })
    }

    /// Routes and runs `operation`, failing over between tiers.
    ///
    /// Each call is bounded by `timeout`; a timeout counts against the tier.
    /// Input rejections end the request immediately. Every other failure
    /// moves on to the next admissible tier that has not been tried.
    ///
    /// # Errors
    ///
    /// Returns `RouterError::Rejected` for input errors and
    /// `RouterError::NoAvailableTier` once no untried tier is admissible.
    pub async fn execute(
        &self,
        operation: Operation,
        timeout: Duration,
    ) -> Result<TierExecution, RouterError> {
        let mut attempted: Vec<TierName> = Vec::new();
        let mut last_error = None;

        while let Some(lease) = self.select(&operation, &attempted) {
            let tier = lease.tier_name().clone();

            match lease.execute(&operation, timeout).await {
                Ok(response) => {
                    if !attempted.is_empty() {
                        info!(
                            operation_id = %operation.id,
                            tier = %tier,
                            failed_over = attempted.len(),
                            "operation served after failover"
                        );
                    }
                    return Ok(TierExecution { tier, response, failed_over: attempted });
                },
                Err(error) if error.is_input() => {
                    debug!(
                        operation_id = %operation.id,
                        tier = %tier,
                        error = %error,
                        "tier rejected operation"
                    );
                    return Err(RouterError::Rejected { tier, source: error });
                },
                Err(error) => {
                    warn!(
                        operation_id = %operation.id,
                        tier = %tier,
                        error = %error,
                        "tier call failed, cascading"
                    );
                    attempted.push(tier);
                    last_error = Some(error);
                },
            }
        }

        warn!(
            operation_id = %operation.id,
            kind = %operation.kind,
            attempted = attempted.len(),
            "no available tier"
        );
        Err(RouterError::NoAvailableTier {
            operation_id: operation.id,
            kind: operation.kind,
            attempted,
            last_error,
        })
    }

    /// Registered tiers in declaration order.
    pub fn tiers(&self) -> impl Iterator<Item = &TierDescriptor> {
        self.slots.iter().map(|slot| &slot.descriptor)
    }

    /// Breaker snapshots in declaration order.
    pub fn circuit_snapshots(&self) -> Vec<CircuitSnapshot> {
        self.slots.iter().map(|slot| slot.breaker.snapshot()).collect()
    }

    /// True when tiers exist and every breaker is open.
    pub fn all_circuits_open(&self) -> bool {
        !self.slots.is_empty()
            && self.slots.iter().all(|slot| slot.breaker.state() == CircuitState::Open)
    }

    fn ordered(&self) -> Vec<(Arc<TierSlot>, f64)> {
        let mut ordered: Vec<_> = self
            .slots
            .iter()
            .map(|slot| (slot.clone(), slot.breaker.success_ratio()))
            .collect();

        ordered.sort_by(|(a, a_ratio), (b, b_ratio)| {
            a.descriptor
                .priority
                .cmp(&b.descriptor.priority)
                .then_with(|| b_ratio.total_cmp(a_ratio))
                .then_with(|| a.declared_at.cmp(&b.declared_at))
        });
        ordered
    }

    fn select(&self, operation: &Operation, excluded: &[TierName]) -> Option<TierLease> {
        let ordered = self.ordered();
        let untried = |slot: &TierSlot| !excluded.contains(&slot.descriptor.name);

        for (slot, _) in ordered.iter().filter(|(slot, _)| untried(slot)) {
            if !slot.descriptor.suitable_for(operation.kind, operation.estimated_record_count) {
                continue;
            }
            if let Some(permit) = slot.breaker.try_acquire() {
                debug!(
                    operation_id = %operation.id,
                    tier = %slot.descriptor.name,
                    probe = permit.is_probe(),
                    "tier selected"
                );
                return Some(TierLease { slot: slot.clone(), permit: Some(permit) });
            }
            debug!(
                operation_id = %operation.id,
                tier = %slot.descriptor.name,
                "circuit not admitting calls"
            );
        }

        let fallback = ordered
            .iter()
            .map(|(slot, _)| slot)
            .min_by(|a, b| b.descriptor.priority.cmp(&a.descriptor.priority))
            .filter(|slot| untried(slot))
            .filter(|slot| {
                !slot.descriptor.suitable_for(operation.kind, operation.estimated_record_count)
            })?;

        let permit = fallback.breaker.try_acquire()?;
        warn!(
            operation_id = %operation.id,
            tier = %fallback.descriptor.name,
            kind = %operation.kind,
            records = operation.estimated_record_count,
            "no suitable tier available, falling back to lowest-priority tier"
        );
        Some(TierLease { slot: fallback.clone(), permit: Some(permit) })
    }
}

impl TierLease {
    /// Name of the selected tier.
    pub fn tier_name(&self) -> &TierName {
        &self.slot.descriptor.name
    }

    /// Descriptor of the selected tier.
    pub fn descriptor(&self) -> &TierDescriptor {
        &self.slot.descriptor
    }

    /// Client for the selected tier.
    pub fn client(&self) -> Arc<dyn TierClient> {
        self.slot.client.clone()
    }

    /// Whether this call is the half-open probe for its tier.
    pub fn is_probe(&self) -> bool {
        self.permit.as_ref().is_some_and(Permit::is_probe)
    }

    /// Reports a successful call.
    pub fn record_success(mut self) {
        if let Some(permit) = self.permit.take() {
            self.slot.breaker.record_success(permit);
        }
    }

    /// Reports a failed call. Input rejections leave the breaker untouched.
    pub fn record_failure(mut self, error: &TierError) {
        if let Some(permit) = self.permit.take() {
            if error.counts_toward_breaker() {
                self.slot.breaker.record_failure(permit);
            } else {
                self.slot.breaker.release(permit);
            }
        }
    }

    /// Calls the tier under `timeout` and reports the outcome.
    ///
    /// # Errors
    ///
    /// Returns the tier's error, or `TierError::Timeout` if the deadline
    /// passed first.
    pub async fn execute(
        self,
        operation: &Operation,
        timeout: Duration,
    ) -> Result<TierResponse, TierError> {
        let call = self.slot.client.execute(operation);
        let result = match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_elapsed) => {
                Err(TierError::timeout(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)))
            },
        };

        match &result {
            Ok(_) => self.record_success(),
            Err(error) => self.record_failure(error),
        }
        result
    }
}

impl Drop for TierLease {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            self.slot.breaker.release(permit);
        }
    }
}
