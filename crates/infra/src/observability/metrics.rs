//! Counter-based observer
//!
//! Tracks resilience events with plain atomics and exposes them as a
//! [`ResilienceStats`] snapshot that serializes straight to JSON for a
//! health or debug endpoint.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bulwark_core::{Rejection, ResilienceObserver, RetryAttempt};
use bulwark_domain::{CircuitState, DeadLetterRecord, TargetId};

/// Snapshot of resilience counters at a point in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ResilienceStats {
    /// Breaker transitions of any kind
    pub state_changes: u64,
    /// Transitions into `Open`
    pub circuits_opened: u64,
    /// Transitions into `Closed`
    pub circuits_closed: u64,
    pub retries_scheduled: u64,
    /// Sum of scheduled backoff sleeps in milliseconds
    pub retry_delay_ms: u64,
    pub timeouts: u64,
    pub rejected_circuit_open: u64,
    pub rejected_bulkhead_full: u64,
    pub rejected_queue_timeout: u64,
    pub dead_letters: u64,
}

impl ResilienceStats {
    /// Rejections of every kind
    pub fn rejected(&self) -> u64 {
        self.rejected_circuit_open + self.rejected_bulkhead_full + self.rejected_queue_timeout
    }
}

#[derive(Debug, Default)]
pub struct MetricsObserver {
    state_changes: AtomicU64,
    circuits_opened: AtomicU64,
    circuits_closed: AtomicU64,
    retries_scheduled: AtomicU64,
    retry_delay_ms: AtomicU64,
    timeouts: AtomicU64,
    rejected_circuit_open: AtomicU64,
    rejected_bulkhead_full: AtomicU64,
    rejected_queue_timeout: AtomicU64,
    dead_letters: AtomicU64,
}

impl MetricsObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> ResilienceStats {
        ResilienceStats {
            state_changes: self.state_changes.load(Ordering::Relaxed),
            circuits_opened: self.circuits_opened.load(Ordering::Relaxed),
            circuits_closed: self.circuits_closed.load(Ordering::Relaxed),
            retries_scheduled: self.retries_scheduled.load(Ordering::Relaxed),
            retry_delay_ms: self.retry_delay_ms.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            rejected_circuit_open: self.rejected_circuit_open.load(Ordering::Relaxed),
            rejected_bulkhead_full: self.rejected_bulkhead_full.load(Ordering::Relaxed),
            rejected_queue_timeout: self.rejected_queue_timeout.load(Ordering::Relaxed),
            dead_letters: self.dead_letters.load(Ordering::Relaxed),
        }
    }

    /// Zero every counter.
    pub fn reset(&self) {
        for counter in [
            &self.state_changes,
            &self.circuits_opened,
            &self.circuits_closed,
            &self.retries_scheduled,
            &self.retry_delay_ms,
            &self.timeouts,
            &self.rejected_circuit_open,
            &self.rejected_bulkhead_full,
            &self.rejected_queue_timeout,
            &self.dead_letters,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl ResilienceObserver for MetricsObserver {
    fn state_changed(&self, _target: &TargetId, _from: CircuitState, to: CircuitState) {
        self.state_changes.fetch_add(1, Ordering::Relaxed);
        match to {
            CircuitState::Open => {
                self.circuits_opened.fetch_add(1, Ordering::Relaxed);
            }
            CircuitState::Closed => {
                self.circuits_closed.fetch_add(1, Ordering::Relaxed);
            }
            CircuitState::HalfOpen => {}
        }
    }

    fn retry_scheduled(&self, _target: &TargetId, attempt: &RetryAttempt) {
        self.retries_scheduled.fetch_add(1, Ordering::Relaxed);
        let delay_ms = u64::try_from(attempt.delay.as_millis()).unwrap_or(u64::MAX);
        // Saturate instead of wrapping on absurd delays.
        let _ = self.retry_delay_ms.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |total| {
            Some(total.saturating_add(delay_ms))
        });
    }

    fn timed_out(&self, _target: &TargetId, _timeout: Duration) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    fn rejected(&self, _target: &TargetId, reason: Rejection) {
        let counter = match reason {
            Rejection::CircuitOpen { .. } => &self.rejected_circuit_open,
            Rejection::BulkheadFull => &self.rejected_bulkhead_full,
            Rejection::QueueTimeout => &self.rejected_queue_timeout,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn dead_lettered(&self, _record: &DeadLetterRecord) {
        self.dead_letters.fetch_add(1, Ordering::Relaxed);
    }
}
