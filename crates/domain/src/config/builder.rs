use std::time::Duration;

use super::overrides::duration_to_millis;
use super::{BackoffKind, Profile, ResilienceConfig, ResilienceConfigOverride};
use crate::errors::ConfigResult;

/// Builder for [`ResilienceConfig`]
///
/// Layers, lowest to highest precedence: base defaults, the selected
/// [`Profile`], overrides passed to [`overrides`](Self::overrides), then
/// values set through the typed setters.
#[derive(Debug, Clone, Default)]
pub struct ResilienceConfigBuilder {
    profile: Option<Profile>,
    overrides: ResilienceConfigOverride,
    explicit: ResilienceConfigOverride,
}

impl ResilienceConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn profile(mut self, profile: Profile) -> Self {
        self.profile = Some(profile);
        self
    }

    /// Merge an override layer; later calls win over earlier ones.
    pub fn overrides(mut self, layer: ResilienceConfigOverride) -> Self {
        self.overrides = self.overrides.merge(&layer);
        self
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.explicit.circuit_breaker.failure_threshold = Some(i64::from(threshold));
        self
    }

    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.explicit.circuit_breaker.success_threshold = Some(i64::from(threshold));
        self
    }

    pub fn half_open_max_calls(mut self, max_calls: u32) -> Self {
        self.explicit.circuit_breaker.half_open_max_calls = Some(i64::from(max_calls));
        self
    }

    pub fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.explicit.circuit_breaker.reset_timeout_ms = Some(duration_to_millis(timeout));
        self
    }

    pub fn max_concurrent(mut self, max: usize) -> Self {
        self.explicit.bulkhead.max_concurrent = Some(i64::try_from(max).unwrap_or(i64::MAX));
        self
    }

    pub fn max_queue(mut self, max: usize) -> Self {
        self.explicit.bulkhead.max_queue = Some(i64::try_from(max).unwrap_or(i64::MAX));
        self
    }

    pub fn queue_timeout(mut self, timeout: Duration) -> Self {
        self.explicit.bulkhead.queue_timeout_ms = Some(duration_to_millis(timeout));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.explicit.timeout.enabled = Some(true);
        self.explicit.timeout.timeout_ms = Some(duration_to_millis(timeout));
        self
    }

    pub fn no_timeout(mut self) -> Self {
        self.explicit.timeout.enabled = Some(false);
        self
    }

    pub fn retry_attempts(mut self, attempts: u32) -> Self {
        self.explicit.retry.attempts = Some(i64::from(attempts));
        self
    }

    pub fn backoff(mut self, kind: BackoffKind, initial: Duration, max: Duration) -> Self {
        self.explicit.retry.backoff = Some(kind);
        self.explicit.retry.initial_delay_ms = Some(duration_to_millis(initial));
        self.explicit.retry.max_delay_ms = Some(duration_to_millis(max));
        self
    }

    pub fn jitter(mut self, jitter: f64) -> Self {
        self.explicit.retry.jitter = Some(jitter);
        self
    }

    pub fn dead_letter(mut self, enabled: bool) -> Self {
        self.explicit.dead_letter.enabled = Some(enabled);
        self
    }

    pub fn sample_ratio(mut self, ratio: f64) -> Self {
        self.explicit.telemetry.sample_ratio = Some(ratio);
        self
    }

    /// Merge all layers and validate.
    pub fn build(self) -> ConfigResult<ResilienceConfig> {
        let layer = self
            .profile
            .map(Profile::overrides)
            .unwrap_or_default()
            .merge(&self.overrides)
            .merge(&self.explicit);

        ResilienceConfig::base().with_override(&layer)
    }
}
