//! Observation hooks for telemetry.
//!
//! A [`ResilienceObserver`] receives breaker transitions, scheduled retries,
//! attempt timeouts, gate rejections and dead letters. Hooks are
//! fire-and-forget: they run inline on the call path, must not block, and
//! never influence control flow. A panicking observer is caught and logged.
//!
//! # Example
//!
//! ```no_run
//! use bulwark_core::{ResilienceObserver, RetryAttempt};
//! use bulwark_domain::TargetId;
//!
//! struct PrintRetries;
//!
//! impl ResilienceObserver for PrintRetries {
//!     fn retry_scheduled(&self, target: &TargetId, attempt: &RetryAttempt) {
//!         eprintln!("{target}: retry #{} in {:?}", attempt.index + 1, attempt.delay);
//!     }
//! }
//! ```

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use bulwark_domain::{CircuitState, DeadLetterRecord, TargetId};
use tracing::error;

use crate::resilience::retry::RetryAttempt;

/// Why a call was turned away before any work ran
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The circuit was open
    CircuitOpen { retry_after: Duration },
    /// No free slot and no room in the queue
    BulkheadFull,
    /// Queued, but no slot freed up within the queue timeout
    QueueTimeout,
}

/// Port for telemetry on the resilience core. Every method defaults to a
/// no-op, so implementors override only the events they care about.
pub trait ResilienceObserver: Send + Sync {
    fn state_changed(&self, _target: &TargetId, _from: CircuitState, _to: CircuitState) {}

    /// A failed attempt will be retried after `attempt.delay`.
    fn retry_scheduled(&self, _target: &TargetId, _attempt: &RetryAttempt) {}

    /// An attempt exceeded its timeout.
    fn timed_out(&self, _target: &TargetId, _timeout: Duration) {}

    fn rejected(&self, _target: &TargetId, _reason: Rejection) {}

    /// A terminally failed invocation was handed to the dead-letter sink.
    fn dead_lettered(&self, _record: &DeadLetterRecord) {}
}

/// Observer that ignores every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ResilienceObserver for NoopObserver {}

/// Run an observation hook, containing any panic it raises.
pub(crate) fn guarded<F: FnOnce()>(event: &'static str, hook: F) {
    if catch_unwind(AssertUnwindSafe(hook)).is_err() {
        error!(event, "Resilience observer panicked; event dropped");
    }
}
