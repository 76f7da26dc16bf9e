//! Dead-letter sink port.
//!
//! The invoker hands each terminally failed invocation to a
//! [`DeadLetterSink`] at most once, when dead-lettering is enabled. A sink
//! error is logged by the invoker and never reaches the caller.
//!
//! # Example
//!
//! ```no_run
//! use async_trait::async_trait;
//! use bulwark_core::{DeadLetterError, DeadLetterSink};
//! use bulwark_domain::DeadLetterRecord;
//!
//! struct Discard;
//!
//! #[async_trait]
//! impl DeadLetterSink for Discard {
//!     async fn accept(&self, _record: DeadLetterRecord) -> Result<(), DeadLetterError> {
//!         Ok(())
//!     }
//! }
//! ```

use async_trait::async_trait;
use bulwark_domain::DeadLetterRecord;
use thiserror::Error;

/// Errors a sink may report
#[derive(Debug, Error)]
pub enum DeadLetterError {
    #[error("dead-letter sink unavailable: {0}")]
    Unavailable(String),

    #[error("failed to encode dead-letter record: {0}")]
    Encode(String),

    #[error("dead-letter I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Port for receiving terminally failed invocations.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// Store or forward `record`.
    async fn accept(&self, record: DeadLetterRecord) -> Result<(), DeadLetterError>;
}
