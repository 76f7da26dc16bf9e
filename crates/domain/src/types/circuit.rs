use serde::{Deserialize, Serialize};

use crate::impl_domain_enum_conversions;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    /// Calls pass through; consecutive failures are counted
    #[default]
    Closed,
    /// Calls are rejected until the reset timeout elapses
    Open,
    /// Probe calls are allowed to test whether the target recovered
    HalfOpen,
}

impl_domain_enum_conversions!(CircuitState {
    Closed => "closed",
    Open => "open",
    HalfOpen => "half-open",
});

impl CircuitState {
    /// Whether a call arriving in this state is allowed to run.
    pub fn permits_calls(self) -> bool {
        !matches!(self, Self::Open)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_state_strings() {
        assert_eq!(CircuitState::HalfOpen.to_string(), "half-open");
        assert_eq!("OPEN".parse::<CircuitState>(), Ok(CircuitState::Open));
        assert_eq!(
            serde_json::to_string(&CircuitState::HalfOpen).expect("serialize"),
            r#""half-open""#
        );
    }

    #[test]
    fn test_only_open_rejects() {
        assert!(CircuitState::Closed.permits_calls());
        assert!(CircuitState::HalfOpen.permits_calls());
        assert!(!CircuitState::Open.permits_calls());
    }
}
