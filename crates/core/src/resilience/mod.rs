//! Resilience primitives and their composition
//!
//! - **Circuit Breaker**: stops calling a failing target and probes for
//!   recovery after a reset timeout
//! - **Bulkhead**: bounds in-flight calls and queues the excess FIFO
//! - **Retry**: linear or exponential backoff with jitter
//! - **Timeout**: per-attempt time limit and absolute deadlines
//! - **Invoker**: breaker gate, then bulkhead, then the timeout-guarded retry
//!   loop, then dead-lettering
//!
//! The breaker reads time through [`Clock`](bulwark_common::time::Clock);
//! everything else uses tokio time, so tests can run on a paused clock.

pub mod bulkhead;
pub mod circuit_breaker;
pub mod error;
pub mod invoker;
pub mod registry;
pub mod retry;
pub mod timeout;

pub use bulkhead::{Bulkhead, BulkheadMetrics, BulkheadRejected, BulkheadSlot, RejectReason};
pub use circuit_breaker::{
    BreakerPermit, CircuitBreaker, CircuitBreakerMetrics, CircuitOpen, StateListener,
};
pub use error::{ResilienceError, ResilienceResult};
pub use invoker::{CallOptions, ResilientInvoker, ResilientInvokerBuilder};
pub use registry::{ResilienceRegistry, TargetSnapshot};
pub use retry::{
    policies, Backoff, RetryAttempt, RetryDecision, RetryExecutor, RetryListener, RetryOutcome,
    RetryPolicy,
};
pub use timeout::TimeoutGuard;
