use std::sync::Arc;
use std::time::Duration;

use bulwark_core::{Rejection, ResilienceObserver, RetryAttempt};
use bulwark_domain::{CircuitState, DeadLetterRecord, TargetId};

/// Forwards every event to each inner observer, in insertion order.
#[derive(Clone, Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn ResilienceObserver>>,
}

impl std::fmt::Debug for CompositeObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeObserver").field("observers", &self.observers.len()).finish()
    }
}

impl CompositeObserver {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, observer: Arc<dyn ResilienceObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn push(&mut self, observer: Arc<dyn ResilienceObserver>) {
        self.observers.push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl ResilienceObserver for CompositeObserver {
    fn state_changed(&self, target: &TargetId, from: CircuitState, to: CircuitState) {
        for observer in &self.observers {
            observer.state_changed(target, from, to);
        }
    }

    fn retry_scheduled(&self, target: &TargetId, attempt: &RetryAttempt) {
        for observer in &self.observers {
            observer.retry_scheduled(target, attempt);
        }
    }

    fn timed_out(&self, target: &TargetId, timeout: Duration) {
        for observer in &self.observers {
            observer.timed_out(target, timeout);
        }
    }

    fn rejected(&self, target: &TargetId, reason: Rejection) {
        for observer in &self.observers {
            observer.rejected(target, reason);
        }
    }

    fn dead_lettered(&self, record: &DeadLetterRecord) {
        for observer in &self.observers {
            observer.dead_lettered(record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::MetricsObserver;

    #[test]
    fn test_fans_out_to_every_observer() {
        let first = Arc::new(MetricsObserver::new());
        let second = Arc::new(MetricsObserver::new());
        let composite = CompositeObserver::new().with(first.clone()).with(second.clone());
        assert_eq!(composite.len(), 2);

        composite.rejected(&TargetId::from("svc"), Rejection::BulkheadFull);

        assert_eq!(first.stats().rejected_bulkhead_full, 1);
        assert_eq!(second.stats().rejected_bulkhead_full, 1);
    }

    #[test]
    fn test_empty_composite_is_a_noop() {
        let composite = CompositeObserver::new();
        assert!(composite.is_empty());
        composite.timed_out(&TargetId::from("svc"), Duration::from_millis(1));
    }
}
