//! Error classification shared by every unit of work that runs behind the
//! resilience layer.
//!
//! The resilience core never decides on its own whether a domain error is
//! transient. Callers classify their errors through [`ErrorClassification`],
//! and the default retry predicate consults [`ErrorClassification::is_retryable`].
//!
//! ## ErrorSeverity Levels
//!
//! | Level | Use Case | Examples |
//! |-------|----------|----------|
//! | **Info** | Informational, expected conditions | Resource not found, empty results |
//! | **Warning** | Degraded but operational | Rate limiting, transient failures |
//! | **Error** | Failure requiring attention | Network errors, invalid input |
//! | **Critical** | System integrity at risk | Data corruption, internal errors |
//!
//! ## Examples
//!
//! ```rust
//! # #[cfg(feature = "foundation")]
//! # {
//! use std::time::Duration;
//!
//! use bulwark_common::error::{ClassifiedError, ErrorClassification};
//!
//! let err = ClassifiedError::transient("upstream returned 503")
//!     .with_retry_after(Duration::from_millis(250));
//! assert!(err.is_retryable());
//! assert_eq!(err.retry_after(), Some(Duration::from_millis(250)));
//!
//! let err = ClassifiedError::permanent("invalid account id");
//! assert!(!err.is_retryable());
//! # }
//! ```

use std::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;

/// Standard interface for classifying errors by their characteristics.
///
/// Implement this for the error type of any operation passed to the
/// resilience core. Only `is_retryable` is required.
pub trait ErrorClassification {
    /// Check if this error is retryable
    ///
    /// Retryable errors are transient issues that may succeed if attempted
    /// again: network timeouts, throttling, temporary unavailability.
    fn is_retryable(&self) -> bool;

    /// Get the error severity level
    ///
    /// Used for logging decisions. Defaults to `Warning` for retryable errors
    /// and `Error` otherwise.
    fn severity(&self) -> ErrorSeverity {
        if self.is_retryable() {
            ErrorSeverity::Warning
        } else {
            ErrorSeverity::Error
        }
    }

    /// Check if this is a critical error requiring immediate attention
    fn is_critical(&self) -> bool {
        self.severity() == ErrorSeverity::Critical
    }

    /// Get the suggested retry delay if applicable
    ///
    /// Returns `Some(Duration)` when a specific retry delay is recommended
    /// (e.g., from a Retry-After header). Retry policies may honour it in
    /// place of the computed backoff.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Error severity levels for monitoring and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Informational, typically for debugging
    Info,
    /// Warning, should be monitored but not critical
    Warning,
    /// Error, requires attention and action
    Error,
    /// Critical, immediate action required
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

impl ErrorClassification for io::Error {
    fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            io::ErrorKind::TimedOut
                | io::ErrorKind::Interrupted
                | io::ErrorKind::WouldBlock
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionRefused
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::BrokenPipe
        )
    }
}

/// A ready-made classified error for callers that do not have their own
/// error enum.
///
/// Carries a message, the retryable flag and an optional retry-after hint.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ClassifiedError {
    message: String,
    retryable: bool,
    retry_after: Option<Duration>,
    severity: ErrorSeverity,
}

impl ClassifiedError {
    /// A transient failure that the retry executor may absorb.
    pub fn transient<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
            retryable: true,
            retry_after: None,
            severity: ErrorSeverity::Warning,
        }
    }

    /// A permanent failure that must propagate without retry.
    pub fn permanent<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
            retryable: false,
            retry_after: None,
            severity: ErrorSeverity::Error,
        }
    }

    /// Attach a server-suggested delay before the next attempt.
    #[must_use]
    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after = Some(delay);
        self
    }

    /// Override the severity reported to logging.
    #[must_use]
    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }

    /// The human-readable message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl ErrorClassification for ClassifiedError {
    fn is_retryable(&self) -> bool {
        self.retryable
    }

    fn severity(&self) -> ErrorSeverity {
        self.severity
    }

    fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }
}
