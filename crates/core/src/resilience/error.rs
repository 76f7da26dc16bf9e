//! Error taxonomy of the resilience core
//!
//! Callers see either their value or exactly one of:
//! - [`ResilienceError::CircuitOpen`]: fast-fail, carries the time until a
//!   probe is allowed
//! - [`ResilienceError::BulkheadRejected`]: capacity and queue exhausted
//! - [`ResilienceError::Timeout`]: the attempt outlived its budget
//! - [`ResilienceError::Operation`]: the work's own terminal error
//! - [`ResilienceError::Cancelled`]: only when the caller supplied a
//!   cancellation token and fired it

use std::time::Duration;

use bulwark_common::error::{ErrorClassification, ErrorSeverity};
use thiserror::Error;

/// Errors produced by the resilience primitives, generic over the work's own
/// error type `E`.
#[derive(Debug, Error)]
pub enum ResilienceError<E> {
    /// The circuit is open; no work was executed
    #[error("circuit breaker is open, retry after {retry_after:?}")]
    CircuitOpen { retry_after: Duration },

    /// Every slot is taken and the queue is full, or the queue wait expired
    #[error("bulkhead rejected call ({max_concurrent} in flight, {max_queue} queued)")]
    BulkheadRejected { max_concurrent: usize, max_queue: usize },

    /// The attempt did not finish within `timeout`
    #[error("operation timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// The work failed
    #[error(transparent)]
    Operation(E),

    /// The caller cancelled the invocation
    #[error("invocation cancelled")]
    Cancelled,
}

/// Result type for resilience operations
pub type ResilienceResult<T, E> = Result<T, ResilienceError<E>>;

impl<E> ResilienceError<E> {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    pub fn is_bulkhead_rejected(&self) -> bool {
        matches!(self, Self::BulkheadRejected { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Rejected at a gate before any work ran.
    pub fn is_rejection(&self) -> bool {
        self.is_circuit_open() || self.is_bulkhead_rejected()
    }

    /// Time until the breaker lets a probe through, for `CircuitOpen`.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::CircuitOpen { retry_after } => Some(*retry_after),
            _ => None,
        }
    }

    pub fn operation_error(&self) -> Option<&E> {
        match self {
            Self::Operation(error) => Some(error),
            _ => None,
        }
    }

    pub fn into_operation_error(self) -> Option<E> {
        match self {
            Self::Operation(error) => Some(error),
            _ => None,
        }
    }

    /// Convert the operation error, keeping every other variant.
    pub fn map_operation<F, E2>(self, f: F) -> ResilienceError<E2>
    where
        F: FnOnce(E) -> E2,
    {
        match self {
            Self::CircuitOpen { retry_after } => ResilienceError::CircuitOpen { retry_after },
            Self::BulkheadRejected { max_concurrent, max_queue } => {
                ResilienceError::BulkheadRejected { max_concurrent, max_queue }
            }
            Self::Timeout { timeout } => ResilienceError::Timeout { timeout },
            Self::Operation(error) => ResilienceError::Operation(f(error)),
            Self::Cancelled => ResilienceError::Cancelled,
        }
    }
}

impl<E: ErrorClassification> ErrorClassification for ResilienceError<E> {
    /// Timeouts and rejections are transient; cancellation is final; the
    /// work's own error decides for itself.
    fn is_retryable(&self) -> bool {
        match self {
            Self::CircuitOpen { .. } | Self::BulkheadRejected { .. } | Self::Timeout { .. } => {
                true
            }
            Self::Operation(error) => error.is_retryable(),
            Self::Cancelled => false,
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Operation(error) => error.severity(),
            Self::Cancelled => ErrorSeverity::Info,
            _ => ErrorSeverity::Warning,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::CircuitOpen { retry_after } => Some(*retry_after),
            Self::Operation(error) => error.retry_after(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use bulwark_common::error::ClassifiedError;

    use super::*;

    type Error = ResilienceError<ClassifiedError>;

    #[test]
    fn test_helpers() {
        let open: Error = ResilienceError::CircuitOpen { retry_after: Duration::from_secs(3) };
        assert!(open.is_circuit_open());
        assert!(open.is_rejection());
        assert_eq!(ResilienceError::retry_after(&open), Some(Duration::from_secs(3)));

        let timeout: Error = ResilienceError::Timeout { timeout: Duration::from_millis(50) };
        assert!(timeout.is_timeout());
        assert!(!timeout.is_rejection());

        let op: Error = ResilienceError::Operation(ClassifiedError::permanent("bad request"));
        assert_eq!(op.to_string(), "bad request");
        assert_eq!(op.into_operation_error().map(|e| e.message().to_owned()), Some("bad request".into()));
    }

    #[test]
    fn test_classification_delegates_to_operation() {
        let transient: Error = ResilienceError::Operation(
            ClassifiedError::transient("throttled").with_retry_after(Duration::from_secs(2)),
        );
        let permanent: Error = ResilienceError::Operation(ClassifiedError::permanent("denied"));

        assert!(transient.is_retryable());
        assert_eq!(ErrorClassification::retry_after(&transient), Some(Duration::from_secs(2)));
        assert!(!permanent.is_retryable());
    }

    #[test]
    fn test_timeouts_retryable_cancellation_not() {
        let timeout: Error = ResilienceError::Timeout { timeout: Duration::ZERO };
        let cancelled: Error = ResilienceError::Cancelled;
        assert!(timeout.is_retryable());
        assert!(!cancelled.is_retryable());
        assert_eq!(cancelled.severity(), ErrorSeverity::Info);
    }

    #[test]
    fn test_map_operation_keeps_gate_variants() {
        let rejected: Error = ResilienceError::BulkheadRejected { max_concurrent: 2, max_queue: 0 };
        let mapped: ResilienceError<String> = rejected.map_operation(|e| e.to_string());
        assert!(mapped.is_bulkhead_rejected());

        let op: Error = ResilienceError::Operation(ClassifiedError::transient("x"));
        let mapped = op.map_operation(|e| e.message().len());
        assert_eq!(mapped.operation_error(), Some(&1));
    }
}
