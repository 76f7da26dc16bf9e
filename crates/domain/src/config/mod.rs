//! Resilience configuration
//!
//! A [`ResilienceConfig`] is a fully populated, immutable tree. It is produced
//! by layering partial overrides on top of the hard-coded base defaults:
//!
//! ```text
//! base defaults -> environment profile -> per-call override
//! ```
//!
//! Each layer is a [`ResilienceConfigOverride`] whose leaves are all
//! optional. Layers merge field by field, so overriding `retry.attempts`
//! leaves `retry.initial_delay_ms` untouched. The merged tree is validated
//! before it is handed out; a different policy for one call produces a new
//! config rather than mutating a shared one.
//!
//! ```rust
//! use std::time::Duration;
//!
//! use bulwark_domain::{Profile, ResilienceConfig, ResilienceConfigOverride};
//!
//! let mut per_call = ResilienceConfigOverride::default();
//! per_call.retry.attempts = Some(1);
//!
//! let config = ResilienceConfig::resolve(Profile::Production, &per_call).unwrap();
//! assert_eq!(config.retry.attempts, 1);
//! assert_eq!(config.timeout.duration, Duration::from_secs(5));
//! ```

mod builder;
mod overrides;
mod profile;
mod validation;

use std::time::Duration;

pub use builder::ResilienceConfigBuilder;
pub use overrides::{
    BulkheadOverride, CircuitBreakerOverride, DeadLetterOverride, ResilienceConfigOverride,
    RetryOverride, TelemetryOverride, TimeoutOverride,
};
pub use profile::Profile;
use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::errors::ConfigResult;
use crate::impl_domain_enum_conversions;
use crate::utils::{duration_millis, option_duration_millis};

/// Complete configuration for one protected target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub circuit_breaker: CircuitBreakerSettings,
    pub bulkhead: BulkheadSettings,
    pub timeout: TimeoutSettings,
    pub retry: RetrySettings,
    pub dead_letter: DeadLetterSettings,
    pub telemetry: TelemetrySettings,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self::base()
    }
}

impl ResilienceConfig {
    /// The hard-coded base layer.
    pub fn base() -> Self {
        Self {
            circuit_breaker: CircuitBreakerSettings::default(),
            bulkhead: BulkheadSettings::default(),
            timeout: TimeoutSettings::default(),
            retry: RetrySettings::default(),
            dead_letter: DeadLetterSettings::default(),
            telemetry: TelemetrySettings::default(),
        }
    }

    pub fn builder() -> ResilienceConfigBuilder {
        ResilienceConfigBuilder::new()
    }

    /// Base defaults, then `profile`, then `overrides`, validated.
    pub fn resolve(profile: Profile, overrides: &ResilienceConfigOverride) -> ConfigResult<Self> {
        Self::builder().profile(profile).overrides(overrides.clone()).build()
    }

    /// Layer `overrides` on top of this config and validate the result.
    ///
    /// `self` is left untouched.
    pub fn with_override(&self, overrides: &ResilienceConfigOverride) -> ConfigResult<Self> {
        let mut next = self.clone();
        overrides.apply(&mut next)?;
        next.validate()?;
        Ok(next)
    }
}

/// Circuit breaker thresholds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    /// Consecutive failures in `closed` that open the circuit
    pub failure_threshold: u32,
    /// Consecutive successes in `half-open` that close the circuit
    pub success_threshold: u32,
    /// Time after the last failure before an open circuit lets a probe through
    #[serde(rename = "reset_timeout_ms", with = "duration_millis")]
    pub reset_timeout: Duration,
    /// Probes that may be in flight at once while `half-open`
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            success_threshold: DEFAULT_SUCCESS_THRESHOLD,
            reset_timeout: Duration::from_millis(DEFAULT_RESET_TIMEOUT_MS),
            half_open_max_calls: DEFAULT_HALF_OPEN_MAX_CALLS,
        }
    }
}

/// Bulkhead limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkheadSettings {
    /// Slots that may be held at once
    pub max_concurrent: usize,
    /// Callers that may wait for a slot; beyond this, callers are rejected
    pub max_queue: usize,
    /// Longest a caller may wait in the queue; `None` waits indefinitely
    #[serde(rename = "queue_timeout_ms", with = "option_duration_millis")]
    pub queue_timeout: Option<Duration>,
}

impl Default for BulkheadSettings {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            max_queue: DEFAULT_MAX_QUEUE,
            queue_timeout: None,
        }
    }
}

/// Per-attempt timeout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub enabled: bool,
    #[serde(rename = "timeout_ms", with = "duration_millis")]
    pub duration: Duration,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self { enabled: true, duration: Duration::from_millis(DEFAULT_TIMEOUT_MS) }
    }
}

impl TimeoutSettings {
    /// The configured duration when timeouts are enabled.
    pub fn effective(&self) -> Option<Duration> {
        self.enabled.then_some(self.duration)
    }
}

/// Backoff growth between retries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    /// `initial * (attempt + 1)`
    Linear,
    /// `initial * 2^attempt`
    #[default]
    Exponential,
}

impl_domain_enum_conversions!(BackoffKind {
    Linear => "linear",
    Exponential => "exponential",
});

/// Retry policy values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Extra tries after the first one; total tries is `attempts + 1`
    pub attempts: u32,
    pub backoff: BackoffKind,
    #[serde(rename = "initial_delay_ms", with = "duration_millis")]
    pub initial_delay: Duration,
    #[serde(rename = "max_delay_ms", with = "duration_millis")]
    pub max_delay: Duration,
    /// Fraction in `[0, 1]`; the delay moves by up to `±(jitter * delay) / 2`
    pub jitter: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_RETRY_ATTEMPTS,
            backoff: BackoffKind::Exponential,
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            jitter: DEFAULT_JITTER,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeadLetterSettings {
    pub enabled: bool,
}

impl Default for DeadLetterSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Observer sampling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    pub enabled: bool,
    /// Share of events forwarded to sampled observers, in `[0, 1]`
    pub sample_ratio: f64,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self { enabled: true, sample_ratio: DEFAULT_SAMPLE_RATIO }
    }
}
