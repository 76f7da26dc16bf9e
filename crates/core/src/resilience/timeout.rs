//! Per-attempt timeout guard
//!
//! Races the work against a tokio timer. The timer lives inside the
//! returned future, so it is dropped on success, failure, timeout and
//! cancellation alike.

use std::future::Future;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::Instant;
use tracing::warn;

use super::error::ResilienceError;

/// Timeout strategy for a single attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutGuard {
    duration: Duration,
}

impl TimeoutGuard {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Run `operation`, failing with `Timeout { timeout: duration }` if it
    /// has not finished in time.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        race(self.duration, operation()).await
    }

    /// Run `operation` against an absolute deadline. A deadline that has
    /// already passed fails with a zero-duration timeout without running the
    /// work.
    pub async fn execute_with_deadline<F, Fut, T, E>(
        operation: F,
        deadline: Instant,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(ResilienceError::Timeout { timeout: Duration::ZERO });
        }
        race(remaining, operation()).await
    }

    /// Turn `work` into a callable that applies this guard on every call.
    pub fn wrap<F, Fut, T, E>(
        self,
        work: F,
    ) -> impl Fn() -> BoxFuture<'static, Result<T, ResilienceError<E>>>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        move || {
            let call: BoxFuture<'static, Result<T, ResilienceError<E>>> =
                Box::pin(race(self.duration, work()));
            call
        }
    }
}

async fn race<Fut, T, E>(limit: Duration, work: Fut) -> Result<T, ResilienceError<E>>
where
    Fut: Future<Output = Result<T, E>>,
{
    match tokio::time::timeout(limit, work).await {
        Ok(result) => result.map_err(ResilienceError::Operation),
        Err(_) => {
            warn!(timeout = ?limit, "Operation timed out");
            Err(ResilienceError::Timeout { timeout: limit })
        }
    }
}
