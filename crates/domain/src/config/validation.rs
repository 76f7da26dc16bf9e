use super::ResilienceConfig;
use crate::errors::{ConfigError, ConfigResult};

impl ResilienceConfig {
    /// Check every range rule and report all violations together.
    ///
    /// Negative timeouts and retry counts cannot be expressed in this tree;
    /// they are rejected when an override layer is applied.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();

        if self.circuit_breaker.failure_threshold < 1 {
            errors.push(ConfigError::invalid(
                "circuit_breaker.failure_threshold",
                "must be at least 1",
            ));
        }
        if self.circuit_breaker.success_threshold < 1 {
            errors.push(ConfigError::invalid(
                "circuit_breaker.success_threshold",
                "must be at least 1",
            ));
        }
        if self.circuit_breaker.half_open_max_calls < 1 {
            errors.push(ConfigError::invalid(
                "circuit_breaker.half_open_max_calls",
                "must be at least 1",
            ));
        }
        if self.bulkhead.max_concurrent < 1 {
            errors.push(ConfigError::invalid("bulkhead.max_concurrent", "must be at least 1"));
        }
        if self.retry.initial_delay > self.retry.max_delay {
            errors.push(ConfigError::invalid(
                "retry.initial_delay_ms",
                format!(
                    "{}ms exceeds retry.max_delay_ms ({}ms)",
                    self.retry.initial_delay.as_millis(),
                    self.retry.max_delay.as_millis()
                ),
            ));
        }
        check_fraction("retry.jitter", self.retry.jitter, &mut errors);
        check_fraction("telemetry.sample_ratio", self.telemetry.sample_ratio, &mut errors);

        ConfigError::from_violations(errors)
    }
}

fn check_fraction(field: &str, value: f64, errors: &mut Vec<ConfigError>) {
    if !(0.0..=1.0).contains(&value) {
        errors.push(ConfigError::invalid(field, format!("must be within [0, 1] (got {value})")));
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_validate_collects_every_violation() {
        let mut config = ResilienceConfig::base();
        config.circuit_breaker.failure_threshold = 0;
        config.bulkhead.max_concurrent = 0;
        config.telemetry.sample_ratio = 1.5;
        config.retry.jitter = -0.1;

        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Multiple(_)));
        assert_eq!(
            err.fields(),
            vec![
                "circuit_breaker.failure_threshold",
                "bulkhead.max_concurrent",
                "retry.jitter",
                "telemetry.sample_ratio",
            ]
        );
    }

    #[test]
    fn test_zero_half_open_cap_rejected() {
        let mut config = ResilienceConfig::base();
        config.circuit_breaker.half_open_max_calls = 0;
        assert_eq!(
            config.validate().unwrap_err().fields(),
            vec!["circuit_breaker.half_open_max_calls"]
        );

        let config = ResilienceConfig::builder().half_open_max_calls(1).build().expect("valid");
        assert_eq!(config.circuit_breaker.half_open_max_calls, 1);
    }

    #[test]
    fn test_validate_rejects_nan_ratio() {
        let mut config = ResilienceConfig::base();
        config.telemetry.sample_ratio = f64::NAN;
        assert_eq!(config.validate().unwrap_err().fields(), vec!["telemetry.sample_ratio"]);
    }

    #[test]
    fn test_validate_delay_ordering() {
        let mut config = ResilienceConfig::base();
        config.retry.initial_delay = Duration::from_secs(20);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("exceeds retry.max_delay_ms"));
    }

    #[test]
    fn test_boundary_values_are_valid() {
        let mut config = ResilienceConfig::base();
        config.circuit_breaker.failure_threshold = 1;
        config.bulkhead.max_concurrent = 1;
        config.bulkhead.max_queue = 0;
        config.retry.attempts = 0;
        config.retry.jitter = 1.0;
        config.telemetry.sample_ratio = 0.0;
        config.timeout.duration = Duration::ZERO;
        assert!(config.validate().is_ok());
    }
}
