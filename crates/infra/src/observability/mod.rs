//! Observer adapters for the resilience core
//!
//! Implementations of [`ResilienceObserver`](bulwark_core::ResilienceObserver):
//! - [`TracingObserver`]: structured log events, sampled per
//!   [`TelemetrySettings`](bulwark_domain::TelemetrySettings)
//! - [`MetricsObserver`]: lock-free counters with a serializable snapshot
//! - [`CompositeObserver`]: fan-out to several observers
//!
//! ## Memory Ordering
//! Counters are independent and read only through snapshots, so every
//! atomic uses `Relaxed`.

pub mod composite;
pub mod metrics;
pub mod tracing_observer;

// Re-export commonly used items
pub use composite::CompositeObserver;
pub use metrics::{MetricsObserver, ResilienceStats};
pub use tracing_observer::TracingObserver;
