//! Log-based observer
//!
//! Breaker transitions and dead letters are always logged. Retries,
//! timeouts and rejections can be frequent under load and are sampled at
//! `sample_ratio`.

use std::time::Duration;

use bulwark_core::{Rejection, ResilienceObserver, RetryAttempt};
use bulwark_domain::{CircuitState, DeadLetterRecord, TargetId, TelemetrySettings};
use rand::Rng;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct TracingObserver {
    enabled: bool,
    sample_ratio: f64,
}

impl Default for TracingObserver {
    fn default() -> Self {
        Self::from_settings(&TelemetrySettings::default())
    }
}

impl TracingObserver {
    /// Out-of-range ratios are clamped to `[0, 1]`; NaN disables sampling.
    pub fn new(enabled: bool, sample_ratio: f64) -> Self {
        let sample_ratio = if sample_ratio.is_nan() { 0.0 } else { sample_ratio.clamp(0.0, 1.0) };
        Self { enabled, sample_ratio }
    }

    pub fn from_settings(settings: &TelemetrySettings) -> Self {
        Self::new(settings.enabled, settings.sample_ratio)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn sample_ratio(&self) -> f64 {
        self.sample_ratio
    }

    fn sampled(&self) -> bool {
        if !self.enabled || self.sample_ratio <= 0.0 {
            return false;
        }
        self.sample_ratio >= 1.0 || rand::thread_rng().gen_bool(self.sample_ratio)
    }
}

impl ResilienceObserver for TracingObserver {
    fn state_changed(&self, target: &TargetId, from: CircuitState, to: CircuitState) {
        if !self.enabled {
            return;
        }
        match to {
            CircuitState::Open => warn!(%target, %from, %to, "Circuit opened"),
            _ => info!(%target, %from, %to, "Circuit state changed"),
        }
    }

    fn retry_scheduled(&self, target: &TargetId, attempt: &RetryAttempt) {
        if self.sampled() {
            info!(
                %target,
                attempt = attempt.index + 1,
                delay_ms = u64::try_from(attempt.delay.as_millis()).unwrap_or(u64::MAX),
                error = %attempt.error,
                "Retry scheduled"
            );
        }
    }

    fn timed_out(&self, target: &TargetId, timeout: Duration) {
        if self.sampled() {
            warn!(%target, timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX), "Attempt timed out");
        }
    }

    fn rejected(&self, target: &TargetId, reason: Rejection) {
        if self.sampled() {
            warn!(%target, ?reason, "Call rejected");
        }
    }

    fn dead_lettered(&self, record: &DeadLetterRecord) {
        if self.enabled {
            error!(
                target = %record.target,
                call_id = %record.call_id,
                attempts = record.attempts,
                error = %record.error,
                "Call dead-lettered"
            );
        }
    }
}
