//! # Bulwark Core
//!
//! The resilience layer: no I/O, no configuration loading.
//!
//! This crate contains:
//! - The four primitives: circuit breaker, bulkhead, retry executor and
//!   timeout guard
//! - [`ResilientInvoker`], which composes them around a single call
//! - [`ResilienceRegistry`], one invoker per protected target
//! - Port traits for the dead-letter sink and telemetry observers
//!
//! ## Architecture Principles
//! - Only depends on `bulwark-common` and `bulwark-domain`
//! - Sinks and observers are injected through traits
//! - The breaker and bulkhead are the only shared mutable state

pub mod resilience;

// Infrastructure ports
pub mod dead_letter_ports;
pub mod observer_ports;

pub use dead_letter_ports::{DeadLetterError, DeadLetterSink};
pub use observer_ports::{NoopObserver, Rejection, ResilienceObserver};
pub use resilience::{
    Backoff, BreakerPermit, Bulkhead, BulkheadMetrics, BulkheadRejected, BulkheadSlot,
    CallOptions, CircuitBreaker, CircuitBreakerMetrics, CircuitOpen, RejectReason, ResilienceError,
    ResilienceRegistry, ResilienceResult, ResilientInvoker, ResilientInvokerBuilder,
    RetryAttempt, RetryDecision, RetryExecutor, RetryOutcome, RetryPolicy, TargetSnapshot,
    TimeoutGuard,
};
