//! Modular common utilities shared across Bulwark crates.
//!
//! # Safety and Quality
//!
//! This crate enforces strict safety and quality standards to ensure
//! reliability across all Bulwark components.
//!
//! # Feature Tiers
//!
//! Enable cargo features to opt into the tiers you need:
//! - `foundation`: error classification, clock abstraction
//! - `observability`: tracing subscriber setup (not included by default)
//! - `runtime`: async test helpers that need a tokio runtime
//! - `test-utils`: scripted operations for exercising retry and breaker paths

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

// Foundation tier
// -----------------------------------------------------------------
#[cfg(feature = "foundation")]
pub mod error;
#[cfg(feature = "foundation")]
pub mod time;

// Observability tier
// -----------------------------------------------------------------
#[cfg(feature = "observability")]
pub mod observability;

// Testing utilities
// ---------------------------------------------------------------
#[cfg(any(feature = "runtime", feature = "test-utils", test))]
pub mod testing;

// Re-export commonly used types and traits for convenience
// ------------------------
#[cfg(feature = "foundation")]
pub use error::{ClassifiedError, ErrorClassification, ErrorSeverity};
#[cfg(feature = "observability")]
pub use observability::{init_tracing, LogFormat};
#[cfg(feature = "foundation")]
pub use time::{Clock, MockClock, SystemClock};
