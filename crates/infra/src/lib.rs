//! # Bulwark Infrastructure
//!
//! Infrastructure implementations of the resilience core's ports.
//!
//! This crate contains:
//! - Configuration loading from environment variables and TOML/JSON files
//! - Dead-letter sinks (log-only, in-memory, JSON Lines file)
//! - Observers (sampled tracing, counters, fan-out)
//! - [`ResilienceContext`], which wires a registry to those adapters
//!
//! ## Architecture
//! - Implements traits defined in `bulwark-core`
//! - Depends on `bulwark-domain` and `bulwark-core`
//! - Contains all "impure" code (environment, filesystem)

pub mod config;
pub mod context;
pub mod dead_letter;
pub mod observability;

// Re-export commonly used items
pub use context::ResilienceContext;
pub use dead_letter::{InMemoryDeadLetterSink, JsonLinesDeadLetterSink, TracingDeadLetterSink};
pub use observability::{CompositeObserver, MetricsObserver, ResilienceStats, TracingObserver};
