//! Partial configuration layers
//!
//! Numeric leaves are signed so that negative input from a file, an
//! environment variable or a caller is representable and can be rejected
//! with a field-level error instead of a parse failure.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{BackoffKind, ResilienceConfig};
use crate::errors::{ConfigError, ConfigResult};

/// A partial [`ResilienceConfig`]; `None` leaves keep the lower layer's value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfigOverride {
    pub circuit_breaker: CircuitBreakerOverride,
    pub bulkhead: BulkheadOverride,
    pub timeout: TimeoutOverride,
    pub retry: RetryOverride,
    pub dead_letter: DeadLetterOverride,
    pub telemetry: TelemetryOverride,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CircuitBreakerOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_threshold: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success_threshold: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_timeout_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub half_open_max_calls: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BulkheadOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrent: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_queue: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_timeout_ms: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimeoutOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff: Option<BackoffKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_delay_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_delay_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jitter: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeadLetterOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TelemetryOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_ratio: Option<f64>,
}

impl ResilienceConfigOverride {
    /// True when no leaf is set.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Field-by-field merge where `other` wins wherever it sets a leaf.
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        let (a, b) = (self, other);
        Self {
            circuit_breaker: CircuitBreakerOverride {
                failure_threshold: b
                    .circuit_breaker
                    .failure_threshold
                    .or(a.circuit_breaker.failure_threshold),
                success_threshold: b
                    .circuit_breaker
                    .success_threshold
                    .or(a.circuit_breaker.success_threshold),
                reset_timeout_ms: b
                    .circuit_breaker
                    .reset_timeout_ms
                    .or(a.circuit_breaker.reset_timeout_ms),
                half_open_max_calls: b
                    .circuit_breaker
                    .half_open_max_calls
                    .or(a.circuit_breaker.half_open_max_calls),
            },
            bulkhead: BulkheadOverride {
                max_concurrent: b.bulkhead.max_concurrent.or(a.bulkhead.max_concurrent),
                max_queue: b.bulkhead.max_queue.or(a.bulkhead.max_queue),
                queue_timeout_ms: b.bulkhead.queue_timeout_ms.or(a.bulkhead.queue_timeout_ms),
            },
            timeout: TimeoutOverride {
                enabled: b.timeout.enabled.or(a.timeout.enabled),
                timeout_ms: b.timeout.timeout_ms.or(a.timeout.timeout_ms),
            },
            retry: RetryOverride {
                attempts: b.retry.attempts.or(a.retry.attempts),
                backoff: b.retry.backoff.or(a.retry.backoff),
                initial_delay_ms: b.retry.initial_delay_ms.or(a.retry.initial_delay_ms),
                max_delay_ms: b.retry.max_delay_ms.or(a.retry.max_delay_ms),
                jitter: b.retry.jitter.or(a.retry.jitter),
            },
            dead_letter: DeadLetterOverride {
                enabled: b.dead_letter.enabled.or(a.dead_letter.enabled),
            },
            telemetry: TelemetryOverride {
                enabled: b.telemetry.enabled.or(a.telemetry.enabled),
                sample_ratio: b.telemetry.sample_ratio.or(a.telemetry.sample_ratio),
            },
        }
    }

    /// Write every set leaf into `config`.
    ///
    /// Negative or out-of-range numbers are collected and reported together;
    /// `config` may be partially updated when an error is returned.
    pub fn apply(&self, config: &mut ResilienceConfig) -> ConfigResult<()> {
        let mut errors = Vec::new();

        let cb = &self.circuit_breaker;
        set_count(
            "circuit_breaker.failure_threshold",
            cb.failure_threshold,
            &mut config.circuit_breaker.failure_threshold,
            &mut errors,
        );
        set_count(
            "circuit_breaker.success_threshold",
            cb.success_threshold,
            &mut config.circuit_breaker.success_threshold,
            &mut errors,
        );
        set_millis(
            "circuit_breaker.reset_timeout_ms",
            cb.reset_timeout_ms,
            &mut config.circuit_breaker.reset_timeout,
            &mut errors,
        );
        set_count(
            "circuit_breaker.half_open_max_calls",
            cb.half_open_max_calls,
            &mut config.circuit_breaker.half_open_max_calls,
            &mut errors,
        );

        let bh = &self.bulkhead;
        set_count(
            "bulkhead.max_concurrent",
            bh.max_concurrent,
            &mut config.bulkhead.max_concurrent,
            &mut errors,
        );
        set_count("bulkhead.max_queue", bh.max_queue, &mut config.bulkhead.max_queue, &mut errors);
        if bh.queue_timeout_ms.is_some() {
            let mut queue_timeout = config.bulkhead.queue_timeout.unwrap_or_default();
            if set_millis(
                "bulkhead.queue_timeout_ms",
                bh.queue_timeout_ms,
                &mut queue_timeout,
                &mut errors,
            ) {
                config.bulkhead.queue_timeout = Some(queue_timeout);
            }
        }

        if let Some(enabled) = self.timeout.enabled {
            config.timeout.enabled = enabled;
        }
        set_millis(
            "timeout.timeout_ms",
            self.timeout.timeout_ms,
            &mut config.timeout.duration,
            &mut errors,
        );

        let retry = &self.retry;
        set_count("retry.attempts", retry.attempts, &mut config.retry.attempts, &mut errors);
        if let Some(backoff) = retry.backoff {
            config.retry.backoff = backoff;
        }
        set_millis(
            "retry.initial_delay_ms",
            retry.initial_delay_ms,
            &mut config.retry.initial_delay,
            &mut errors,
        );
        set_millis(
            "retry.max_delay_ms",
            retry.max_delay_ms,
            &mut config.retry.max_delay,
            &mut errors,
        );
        if let Some(jitter) = retry.jitter {
            config.retry.jitter = jitter;
        }

        if let Some(enabled) = self.dead_letter.enabled {
            config.dead_letter.enabled = enabled;
        }
        if let Some(enabled) = self.telemetry.enabled {
            config.telemetry.enabled = enabled;
        }
        if let Some(ratio) = self.telemetry.sample_ratio {
            config.telemetry.sample_ratio = ratio;
        }

        ConfigError::from_violations(errors)
    }
}

/// Returns true when `target` was updated.
fn set_count<T: TryFrom<i64>>(
    field: &str,
    value: Option<i64>,
    target: &mut T,
    errors: &mut Vec<ConfigError>,
) -> bool {
    let Some(value) = value else {
        return false;
    };
    if value < 0 {
        errors.push(ConfigError::invalid(field, format!("must not be negative (got {value})")));
        return false;
    }
    match T::try_from(value) {
        Ok(converted) => {
            *target = converted;
            true
        }
        Err(_) => {
            errors.push(ConfigError::invalid(field, format!("{value} is out of range")));
            false
        }
    }
}

fn set_millis(
    field: &str,
    value: Option<i64>,
    target: &mut Duration,
    errors: &mut Vec<ConfigError>,
) -> bool {
    let mut millis: u64 = 0;
    if set_count(field, value, &mut millis, errors) {
        *target = Duration::from_millis(millis);
        true
    } else {
        false
    }
}

/// Signed milliseconds for an override leaf, saturating at `i64::MAX`.
pub(crate) fn duration_to_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
