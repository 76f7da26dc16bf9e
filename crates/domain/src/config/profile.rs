use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{BackoffKind, ResilienceConfigOverride};
use crate::errors::ConfigError;

/// Deployment environment; each profile is an override layer applied on top
/// of the base defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// Loose breaker, generous timeouts
    #[default]
    Development,
    /// Base defaults with sampled telemetry
    Staging,
    /// Tight breaker, short timeouts, sampled telemetry
    Production,
    /// Millisecond delays so suites run fast
    Test,
}

impl Profile {
    pub const ALL: [Profile; 4] =
        [Profile::Development, Profile::Staging, Profile::Production, Profile::Test];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Staging => "staging",
            Self::Production => "production",
            Self::Test => "test",
        }
    }

    /// The override layer this profile contributes.
    pub fn overrides(self) -> ResilienceConfigOverride {
        let mut layer = ResilienceConfigOverride::default();
        match self {
            Self::Development => {
                layer.circuit_breaker.failure_threshold = Some(20);
                layer.circuit_breaker.reset_timeout_ms = Some(5_000);
                layer.timeout.timeout_ms = Some(60_000);
            }
            Self::Staging => {
                layer.telemetry.sample_ratio = Some(0.5);
            }
            Self::Production => {
                layer.circuit_breaker.failure_threshold = Some(3);
                layer.circuit_breaker.reset_timeout_ms = Some(60_000);
                layer.timeout.timeout_ms = Some(5_000);
                layer.telemetry.sample_ratio = Some(0.1);
            }
            Self::Test => {
                layer.circuit_breaker.reset_timeout_ms = Some(100);
                layer.timeout.timeout_ms = Some(1_000);
                layer.retry.backoff = Some(BackoffKind::Exponential);
                layer.retry.initial_delay_ms = Some(1);
                layer.retry.max_delay_ms = Some(10);
                layer.retry.jitter = Some(0.0);
            }
        }
        layer
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Profile {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "staging" | "stage" => Ok(Self::Staging),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            _ => Err(ConfigError::UnknownProfile(s.to_owned())),
        }
    }
}
