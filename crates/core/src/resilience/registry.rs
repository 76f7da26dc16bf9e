//! Per-target invoker registry
//!
//! Holds one [`ResilientInvoker`] per [`TargetId`], created on first use
//! from the registry defaults plus any per-target override. Invokers are
//! shared through `Arc`, so every caller of a target sees the same breaker
//! and bulkhead.

use std::sync::Arc;

use bulwark_common::time::{Clock, SystemClock};
use bulwark_domain::{ConfigResult, ResilienceConfig, ResilienceConfigOverride, TargetId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info};

use super::bulkhead::BulkheadMetrics;
use super::circuit_breaker::CircuitBreakerMetrics;
use super::invoker::{ResilientInvoker, ResilientInvokerBuilder};
use crate::dead_letter_ports::DeadLetterSink;
use crate::observer_ports::{NoopObserver, ResilienceObserver};

/// Point-in-time view of one target
#[derive(Debug, Clone)]
pub struct TargetSnapshot {
    pub target: TargetId,
    pub breaker: CircuitBreakerMetrics,
    pub bulkhead: BulkheadMetrics,
}

/// Registry of invokers keyed by target
pub struct ResilienceRegistry<C: Clock + Clone = SystemClock> {
    defaults: ResilienceConfig,
    overrides: DashMap<TargetId, ResilienceConfigOverride>,
    invokers: DashMap<TargetId, Arc<ResilientInvoker<C>>>,
    clock: C,
    sink: Option<Arc<dyn DeadLetterSink>>,
    observer: Arc<dyn ResilienceObserver>,
}

impl ResilienceRegistry<SystemClock> {
    pub fn new(defaults: ResilienceConfig) -> Self {
        Self::with_clock(defaults, SystemClock)
    }
}

impl<C: Clock + Clone> ResilienceRegistry<C> {
    pub fn with_clock(defaults: ResilienceConfig, clock: C) -> Self {
        Self {
            defaults,
            overrides: DashMap::new(),
            invokers: DashMap::new(),
            clock,
            sink: None,
            observer: Arc::new(NoopObserver),
        }
    }

    /// Sink shared by every invoker created afterwards.
    #[must_use]
    pub fn with_dead_letter_sink(mut self, sink: Arc<dyn DeadLetterSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Observer shared by every invoker created afterwards.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn ResilienceObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn defaults(&self) -> &ResilienceConfig {
        &self.defaults
    }

    /// Register an override for `target`. It is validated against the
    /// defaults now and applies to invokers created afterwards; an existing
    /// invoker keeps its configuration until [`remove`](Self::remove)d.
    pub fn configure(
        &self,
        target: impl Into<TargetId>,
        overrides: ResilienceConfigOverride,
    ) -> ConfigResult<()> {
        let target = target.into();
        self.defaults.with_override(&overrides)?;
        debug!(%target, "Registered target override");
        self.overrides.insert(target, overrides);
        Ok(())
    }

    /// Resolved configuration for `target`.
    pub fn config_for(&self, target: &TargetId) -> ConfigResult<ResilienceConfig> {
        match self.overrides.get(target) {
            Some(overrides) => self.defaults.with_override(overrides.value()),
            None => Ok(self.defaults.clone()),
        }
    }

    /// The invoker for `target`, creating it on first use.
    pub fn get_or_create(&self, target: impl Into<TargetId>) -> ConfigResult<Arc<ResilientInvoker<C>>> {
        let target = target.into();
        if let Some(existing) = self.invokers.get(&target) {
            return Ok(Arc::clone(existing.value()));
        }

        match self.invokers.entry(target) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let invoker = Arc::new(self.build(entry.key())?);
                info!(target = %entry.key(), "Created resilient invoker");
                Ok(Arc::clone(entry.insert(invoker).value()))
            }
        }
    }

    pub fn get(&self, target: &TargetId) -> Option<Arc<ResilientInvoker<C>>> {
        self.invokers.get(target).map(|entry| Arc::clone(entry.value()))
    }

    /// Drop the invoker for `target`; the next `get_or_create` starts fresh.
    pub fn remove(&self, target: &TargetId) -> Option<Arc<ResilientInvoker<C>>> {
        self.invokers.remove(target).map(|(_, invoker)| invoker)
    }

    /// Targets with a live invoker, sorted.
    pub fn targets(&self) -> Vec<TargetId> {
        let mut targets: Vec<TargetId> = self.invokers.iter().map(|entry| entry.key().clone()).collect();
        targets.sort();
        targets
    }

    /// Breaker and bulkhead metrics for every live target, sorted by target.
    pub fn snapshot(&self) -> Vec<TargetSnapshot> {
        let mut snapshot: Vec<TargetSnapshot> = self
            .invokers
            .iter()
            .map(|entry| TargetSnapshot {
                target: entry.key().clone(),
                breaker: entry.value().breaker().metrics(),
                bulkhead: entry.value().bulkhead().metrics(),
            })
            .collect();
        snapshot.sort_by(|a, b| a.target.cmp(&b.target));
        snapshot
    }

    fn build(&self, target: &TargetId) -> ConfigResult<ResilientInvoker<C>> {
        let mut builder = ResilientInvokerBuilder::new(target.clone(), self.config_for(target)?)
            .clock(self.clock.clone())
            .observer(Arc::clone(&self.observer));
        if let Some(sink) = &self.sink {
            builder = builder.dead_letter_sink(Arc::clone(sink));
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bulwark_common::error::ClassifiedError;
    use bulwark_common::time::MockClock;
    use bulwark_domain::{CircuitState, Profile};

    use super::*;

    fn registry() -> ResilienceRegistry<MockClock> {
        let defaults = ResilienceConfig::resolve(Profile::Test, &ResilienceConfigOverride::default())
            .expect("test profile is valid");
        ResilienceRegistry::with_clock(defaults, MockClock::new())
    }

    #[test]
    fn test_get_or_create_returns_shared_instance() {
        let registry = registry();

        let first = registry.get_or_create("payments").expect("created");
        let second = registry.get_or_create("payments").expect("reused");

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.targets(), vec![TargetId::from("payments")]);
    }

    #[test]
    fn test_override_applies_to_new_instances() {
        let registry = registry();
        let mut layer = ResilienceConfigOverride::default();
        layer.bulkhead.max_concurrent = Some(2);
        registry.configure("search", layer).expect("valid override");

        let search = registry.get_or_create("search").expect("created");
        let other = registry.get_or_create("other").expect("created");

        assert_eq!(search.config().bulkhead.max_concurrent, 2);
        assert_eq!(other.config().bulkhead.max_concurrent, registry.defaults().bulkhead.max_concurrent);
    }

    #[test]
    fn test_invalid_override_is_rejected_up_front() {
        let registry = registry();
        let mut layer = ResilienceConfigOverride::default();
        layer.circuit_breaker.failure_threshold = Some(0);

        let err = registry.configure("search", layer).unwrap_err();
        assert_eq!(err.fields(), vec!["circuit_breaker.failure_threshold"]);
        assert!(registry.get_or_create("search").is_ok());
    }

    #[test]
    fn test_remove_starts_fresh() {
        let registry = registry();
        let first = registry.get_or_create("payments").expect("created");
        first.breaker().force_open();

        assert!(registry.remove(&TargetId::from("payments")).is_some());
        assert!(registry.get(&TargetId::from("payments")).is_none());

        let fresh = registry.get_or_create("payments").expect("recreated");
        assert_eq!(fresh.breaker().state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_snapshot_reports_each_target() {
        let registry = registry();
        let billing = registry.get_or_create("billing").expect("created");
        registry.get_or_create("auth").expect("created");

        let _ = billing
            .invoke(|| async { Err::<(), _>(ClassifiedError::permanent("declined")) })
            .await;

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].target.as_str(), "auth");
        assert_eq!(snapshot[1].target.as_str(), "billing");
        assert_eq!(snapshot[1].breaker.consecutive_failures, 1);
        assert_eq!(snapshot[1].bulkhead.admitted, 1);
        assert_eq!(snapshot[1].bulkhead.in_flight, 0);
    }

    #[test]
    fn test_shared_clock_drives_every_breaker() {
        let clock = MockClock::new();
        let defaults = ResilienceConfig::builder()
            .profile(Profile::Test)
            .reset_timeout(Duration::from_millis(100))
            .build()
            .expect("valid");
        let registry = ResilienceRegistry::with_clock(defaults, clock.clone());
        let invoker = registry.get_or_create("payments").expect("created");

        invoker.breaker().force_open();
        clock.advance(Duration::from_millis(150));

        assert_eq!(invoker.breaker().state(), CircuitState::HalfOpen);
    }
}
