//! Three-state circuit breaker
//!
//! ```text
//!            failure_threshold consecutive failures
//!   CLOSED ------------------------------------------> OPEN
//!     ^                                                 |  |
//!     | success_threshold                reset_timeout  |  | any failure
//!     | consecutive successes            elapsed, on    |  |
//!     |                                  next read      v  |
//!     +------------------------------------------- HALF-OPEN
//! ```
//!
//! All counters and the state live behind one mutex, so reading the state
//! and performing the lazy open -> half-open transition is a single critical
//! section. There is no background timer. The lock is never held across an
//! `.await` and listeners run after it is released.
//!
//! Half-open admits at most `half_open_max_calls` probes at a time. Each
//! admission is a [`BreakerPermit`]; a permit dropped without reporting an
//! outcome gives its probe slot back.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bulwark_common::time::{Clock, SystemClock};
use bulwark_domain::{CircuitBreakerSettings, CircuitState, ConfigError, ConfigResult};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use super::error::ResilienceError;
use crate::observer_ports::guarded;

/// Called with `(previous, next)` on every transition. Telemetry only.
pub type StateListener = Arc<dyn Fn(CircuitState, CircuitState) + Send + Sync>;

/// Rejection returned by [`CircuitBreaker::try_acquire`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("circuit breaker is open, retry after {retry_after:?}")]
pub struct CircuitOpen {
    /// Time left until the breaker lets a probe through
    pub retry_after: Duration,
}

impl<E> From<CircuitOpen> for ResilienceError<E> {
    fn from(open: CircuitOpen) -> Self {
        ResilienceError::CircuitOpen { retry_after: open.retry_after }
    }
}

/// Circuit breaker metrics for monitoring
#[derive(Debug, Clone)]
pub struct CircuitBreakerMetrics {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    /// Calls admitted through the gate
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    /// Calls rejected while open or with every half-open probe slot taken
    pub rejected_calls: u64,
    pub half_open_in_flight: u32,
    pub last_failure: Option<Instant>,
    pub last_transition: Instant,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    half_open_in_flight: u32,
    /// Bumped on every transition; ties a probe to its half-open window
    generation: u64,
    last_failure: Option<Instant>,
    last_transition: Instant,
    total_calls: u64,
    successful_calls: u64,
    failed_calls: u64,
    rejected_calls: u64,
}

type Transition = (CircuitState, CircuitState);

impl BreakerInner {
    fn new(now: Instant) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            half_open_in_flight: 0,
            generation: 0,
            last_failure: None,
            last_transition: now,
            total_calls: 0,
            successful_calls: 0,
            failed_calls: 0,
            rejected_calls: 0,
        }
    }

    fn transition(&mut self, to: CircuitState, now: Instant) -> Option<Transition> {
        let from = self.state;
        if from == to {
            return None;
        }
        self.state = to;
        self.consecutive_failures = 0;
        self.consecutive_successes = 0;
        self.half_open_in_flight = 0;
        self.generation += 1;
        self.last_transition = now;
        Some((from, to))
    }

    /// Free the slot of a probe admitted in the current half-open window.
    /// Probes from an earlier window were already cleared by the transition.
    fn end_probe(&mut self, probe: Option<u64>) {
        if probe == Some(self.generation) && self.state == CircuitState::HalfOpen {
            self.half_open_in_flight = self.half_open_in_flight.saturating_sub(1);
        }
    }

    fn remaining_open(&self, reset_timeout: Duration, now: Instant) -> Duration {
        self.last_failure.map_or(Duration::ZERO, |failed_at| {
            reset_timeout.saturating_sub(now.saturating_duration_since(failed_at))
        })
    }

    /// Lazy open -> half-open once `reset_timeout` has passed since the last
    /// failure.
    fn refresh(&mut self, reset_timeout: Duration, now: Instant) -> Option<Transition> {
        if self.state == CircuitState::Open && self.remaining_open(reset_timeout, now).is_zero() {
            return self.transition(CircuitState::HalfOpen, now);
        }
        None
    }
}

/// Generic circuit breaker implementation
///
/// Shared by every concurrent call to one target; wrap it in an `Arc`.
/// The clock is generic so tests can drive the reset timeout with a
/// [`MockClock`](bulwark_common::time::MockClock).
pub struct CircuitBreaker<C: Clock = SystemClock> {
    settings: CircuitBreakerSettings,
    inner: Mutex<BreakerInner>,
    listener: Option<StateListener>,
    clock: C,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CircuitBreaker")
            .field("settings", &self.settings)
            .field("state", &inner.state)
            .field("consecutive_failures", &inner.consecutive_failures)
            .field("consecutive_successes", &inner.consecutive_successes)
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker<SystemClock> {
    /// Create a circuit breaker on the system clock
    pub fn new(settings: CircuitBreakerSettings) -> ConfigResult<Self> {
        Self::with_clock(settings, SystemClock)
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a circuit breaker with a custom clock (useful for testing)
    pub fn with_clock(settings: CircuitBreakerSettings, clock: C) -> ConfigResult<Self> {
        let mut errors = Vec::new();
        if settings.failure_threshold == 0 {
            errors.push(ConfigError::invalid(
                "circuit_breaker.failure_threshold",
                "must be at least 1",
            ));
        }
        if settings.success_threshold == 0 {
            errors.push(ConfigError::invalid(
                "circuit_breaker.success_threshold",
                "must be at least 1",
            ));
        }
        if settings.half_open_max_calls == 0 {
            errors.push(ConfigError::invalid(
                "circuit_breaker.half_open_max_calls",
                "must be at least 1",
            ));
        }
        ConfigError::from_violations(errors)?;

        let now = clock.now();
        Ok(Self { settings, inner: Mutex::new(BreakerInner::new(now)), listener: None, clock })
    }

    /// Register the state-change listener.
    #[must_use]
    pub fn with_listener(mut self, listener: StateListener) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn settings(&self) -> &CircuitBreakerSettings {
        &self.settings
    }

    /// Current state, performing the lazy open -> half-open transition.
    pub fn state(&self) -> CircuitState {
        let now = self.clock.now();
        let (state, transition) = {
            let mut inner = self.inner.lock();
            let transition = inner.refresh(self.settings.reset_timeout, now);
            (inner.state, transition)
        };
        self.notify(transition);
        state
    }

    /// Gate a call: `Ok` admits it, `Err` carries the remaining open time.
    ///
    /// Report the admitted call's outcome through the returned permit. In
    /// half-open, once every probe slot is taken further calls are rejected
    /// with a zero `retry_after`.
    pub fn try_acquire(&self) -> Result<BreakerPermit<'_, C>, CircuitOpen> {
        let now = self.clock.now();
        let reset_timeout = self.settings.reset_timeout;
        let (result, transition) = {
            let mut inner = self.inner.lock();
            let transition = inner.refresh(reset_timeout, now);
            let state = inner.state;
            let result = match state {
                CircuitState::Open => {
                    inner.rejected_calls += 1;
                    Err(CircuitOpen { retry_after: inner.remaining_open(reset_timeout, now) })
                }
                CircuitState::HalfOpen
                    if inner.half_open_in_flight >= self.settings.half_open_max_calls =>
                {
                    inner.rejected_calls += 1;
                    Err(CircuitOpen { retry_after: Duration::ZERO })
                }
                CircuitState::HalfOpen => {
                    inner.total_calls += 1;
                    inner.half_open_in_flight += 1;
                    Ok(Some(inner.generation))
                }
                CircuitState::Closed => {
                    inner.total_calls += 1;
                    Ok(None)
                }
            };
            (result, transition)
        };
        self.notify(transition);

        match result {
            Ok(probe) => Ok(BreakerPermit { breaker: self, probe, reported: false }),
            Err(open) => {
                debug!(retry_after = ?open.retry_after, "Circuit breaker rejecting call");
                Err(open)
            }
        }
    }

    /// Record a success for a call made without a permit
    pub fn record_success(&self) {
        self.on_success(None);
    }

    /// Record a failure for a call made without a permit
    pub fn record_failure(&self) {
        self.on_failure(None);
    }

    fn on_success(&self, probe: Option<u64>) {
        let now = self.clock.now();
        let transition = {
            let mut inner = self.inner.lock();
            inner.end_probe(probe);
            inner.successful_calls += 1;
            let state = inner.state;
            match state {
                CircuitState::Closed => {
                    inner.consecutive_failures = 0;
                    None
                }
                CircuitState::HalfOpen => {
                    inner.consecutive_successes += 1;
                    if inner.consecutive_successes >= self.settings.success_threshold {
                        inner.transition(CircuitState::Closed, now)
                    } else {
                        None
                    }
                }
                // A call admitted before the circuit opened; it does not
                // shorten the open period.
                CircuitState::Open => None,
            }
        };

        if transition.is_some() {
            info!(
                successes = self.settings.success_threshold,
                "Circuit breaker closed after successful probes"
            );
        }
        self.notify(transition);
    }

    fn on_failure(&self, probe: Option<u64>) {
        let now = self.clock.now();
        let transition = {
            let mut inner = self.inner.lock();
            inner.end_probe(probe);
            inner.failed_calls += 1;
            inner.last_failure = Some(now);
            let state = inner.state;
            match state {
                CircuitState::Closed => {
                    inner.consecutive_failures += 1;
                    if inner.consecutive_failures >= self.settings.failure_threshold {
                        let failures = inner.consecutive_failures;
                        let transition = inner.transition(CircuitState::Open, now);
                        warn!(failures, "Circuit breaker opened");
                        transition
                    } else {
                        None
                    }
                }
                CircuitState::HalfOpen => {
                    warn!("Circuit breaker reopened by a failed probe");
                    inner.transition(CircuitState::Open, now)
                }
                CircuitState::Open => None,
            }
        };
        self.notify(transition);
    }

    fn abandon(&self, probe: Option<u64>) {
        if probe.is_some() {
            self.inner.lock().end_probe(probe);
        }
    }

    /// Execute an operation with circuit breaker protection
    ///
    /// Every error returned by `operation` counts as a failure.
    #[instrument(skip_all, fields(state = %self.state()))]
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.try_acquire()?;

        match operation().await {
            Ok(value) => {
                permit.success();
                Ok(value)
            }
            Err(error) => {
                permit.failure();
                Err(ResilienceError::Operation(error))
            }
        }
    }

    /// Execute a synchronous operation with circuit breaker protection
    pub fn call<F, T, E>(&self, operation: F) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let permit = self.try_acquire()?;

        match operation() {
            Ok(value) => {
                permit.success();
                Ok(value)
            }
            Err(error) => {
                permit.failure();
                Err(ResilienceError::Operation(error))
            }
        }
    }

    /// Get circuit breaker metrics
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let now = self.clock.now();
        let (metrics, transition) = {
            let mut inner = self.inner.lock();
            let transition = inner.refresh(self.settings.reset_timeout, now);
            let metrics = CircuitBreakerMetrics {
                state: inner.state,
                consecutive_failures: inner.consecutive_failures,
                consecutive_successes: inner.consecutive_successes,
                total_calls: inner.total_calls,
                successful_calls: inner.successful_calls,
                failed_calls: inner.failed_calls,
                rejected_calls: inner.rejected_calls,
                half_open_in_flight: inner.half_open_in_flight,
                last_failure: inner.last_failure,
                last_transition: inner.last_transition,
            };
            (metrics, transition)
        };
        self.notify(transition);
        metrics
    }

    /// Force the breaker closed and clear its counters
    pub fn reset(&self) {
        let now = self.clock.now();
        let transition = {
            let mut inner = self.inner.lock();
            inner.last_failure = None;
            inner.consecutive_failures = 0;
            inner.consecutive_successes = 0;
            inner.transition(CircuitState::Closed, now)
        };
        info!("Circuit breaker manually reset");
        self.notify(transition);
    }

    /// Open the breaker now, as if the failure threshold had just been hit
    pub fn force_open(&self) {
        let now = self.clock.now();
        let transition = {
            let mut inner = self.inner.lock();
            inner.last_failure = Some(now);
            inner.transition(CircuitState::Open, now)
        };
        warn!("Circuit breaker forced open");
        self.notify(transition);
    }

    fn notify(&self, transition: Option<Transition>) {
        let (Some((from, to)), Some(listener)) = (transition, self.listener.as_ref()) else {
            return;
        };
        debug!(%from, %to, "Circuit breaker state changed");
        guarded("state_changed", || listener(from, to));
    }
}

/// Admission through [`CircuitBreaker::try_acquire`]
///
/// Dropping the permit without calling [`success`](Self::success) or
/// [`failure`](Self::failure) records nothing and frees its half-open probe
/// slot, so cancelled calls do not wedge the breaker.
#[must_use = "report the outcome or drop the permit to abandon the call"]
pub struct BreakerPermit<'a, C: Clock = SystemClock> {
    breaker: &'a CircuitBreaker<C>,
    probe: Option<u64>,
    reported: bool,
}

impl<C: Clock> BreakerPermit<'_, C> {
    /// Whether this call is a half-open probe.
    pub fn is_probe(&self) -> bool {
        self.probe.is_some()
    }

    pub fn success(mut self) {
        self.reported = true;
        self.breaker.on_success(self.probe);
    }

    pub fn failure(mut self) {
        self.reported = true;
        self.breaker.on_failure(self.probe);
    }
}

impl<C: Clock> fmt::Debug for BreakerPermit<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BreakerPermit").field("probe", &self.probe).finish_non_exhaustive()
    }
}

impl<C: Clock> Drop for BreakerPermit<'_, C> {
    fn drop(&mut self) {
        if !self.reported {
            self.breaker.abandon(self.probe);
        }
    }
}
