//! Retry executor with linear or exponential backoff and jitter
//!
//! Attempt indices are 0-based and `attempts` counts the *extra* tries, so a
//! loop configured with `attempts = 3` runs the work at most four times.
//! On exhaustion the error from the last try is returned; every failed try
//! is kept in [`RetryOutcome::history`].
//!
//! Delay for attempt `n`:
//! - linear: `initial * (n + 1)`
//! - exponential: `initial * 2^n`
//!
//! Both are clamped to `max_delay`, then perturbed uniformly by up to
//! `±(jitter * delay) / 2`.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bulwark_domain::{BackoffKind, RetrySettings};
use futures::future::BoxFuture;
use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::observer_ports::guarded;

/// Trait for determining whether an error should be retried
pub trait RetryPolicy<E> {
    /// Decide what to do after try `attempt` (0-based) failed with `error`.
    fn should_retry(&self, error: &E, attempt: u32) -> RetryDecision;
}

/// Decision for whether to retry an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the backoff delay
    Retry,
    /// Retry after the given delay instead of the backoff delay
    RetryAfter(Duration),
    /// Give up and return the error
    Stop,
}

/// One failed try observed by the retry loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryAttempt {
    /// 0-based index of the failed try
    pub index: u32,
    /// Sleep before the next try; zero for the final failure
    pub delay: Duration,
    /// Rendered error of the failed try
    pub error: String,
}

/// Called before each backoff sleep. Observability only.
pub type RetryListener = Arc<dyn Fn(&RetryAttempt) + Send + Sync>;

/// Delay calculator
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    kind: BackoffKind,
    initial: Duration,
    max: Duration,
    jitter: f64,
}

impl Backoff {
    /// `jitter` is clamped into `0.0..=1.0`; NaN counts as zero.
    pub fn new(kind: BackoffKind, initial: Duration, max: Duration, jitter: f64) -> Self {
        let jitter = if jitter.is_nan() { 0.0 } else { jitter.clamp(0.0, 1.0) };
        Self { kind, initial, max, jitter }
    }

    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self::new(settings.backoff, settings.initial_delay, settings.max_delay, settings.jitter)
    }

    pub fn kind(&self) -> BackoffKind {
        self.kind
    }

    pub fn jitter(&self) -> f64 {
        self.jitter
    }

    /// Delay before jitter, clamped to the maximum.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let raw = match self.kind {
            BackoffKind::Linear => self.initial.saturating_mul(attempt.saturating_add(1)),
            BackoffKind::Exponential => 2u32
                .checked_pow(attempt)
                .map_or(Duration::MAX, |factor| self.initial.saturating_mul(factor)),
        };
        raw.min(self.max)
    }

    /// Jittered delay drawing randomness from `rng`.
    pub fn delay_with<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base = self.base_delay(attempt);
        let spread = base.as_secs_f64() * self.jitter;
        if spread <= 0.0 {
            return base;
        }

        let offset = rng.gen_range(-spread / 2.0..=spread / 2.0);
        Duration::try_from_secs_f64((base.as_secs_f64() + offset).max(0.0)).unwrap_or(base)
    }

    /// Jittered delay using the thread-local RNG.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with(attempt, &mut rand::thread_rng())
    }
}

/// Outcome of a retry loop including per-try history
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, E>,
    /// Tries made, the first one included
    pub attempts: u32,
    /// Sum of backoff sleeps
    pub total_delay: Duration,
    /// Every failed try in order; the last entry is the returned error when
    /// the loop failed.
    pub history: Vec<RetryAttempt>,
}

impl<T, E> RetryOutcome<T, E> {
    /// Consume the outcome and return only the result.
    pub fn into_result(self) -> Result<T, E> {
        self.result
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Error messages of every failed try, oldest first.
    pub fn history_messages(&self) -> Vec<String> {
        self.history.iter().map(|attempt| attempt.error.clone()).collect()
    }
}

/// Executes operations with retry logic
pub struct RetryExecutor<P> {
    backoff: Backoff,
    attempts: u32,
    policy: P,
    on_retry: Option<RetryListener>,
    deadline: Option<Instant>,
}

impl<P: Clone> Clone for RetryExecutor<P> {
    fn clone(&self) -> Self {
        Self {
            backoff: self.backoff.clone(),
            attempts: self.attempts,
            policy: self.policy.clone(),
            on_retry: self.on_retry.clone(),
            deadline: self.deadline,
        }
    }
}

impl<P: fmt::Debug> fmt::Debug for RetryExecutor<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("backoff", &self.backoff)
            .field("attempts", &self.attempts)
            .field("policy", &self.policy)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl RetryExecutor<policies::Classified> {
    /// Executor that retries errors classified as retryable.
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self::new(settings, policies::Classified)
    }
}

impl<P> RetryExecutor<P> {
    pub fn new(settings: &RetrySettings, policy: P) -> Self {
        Self {
            backoff: Backoff::from_settings(settings),
            attempts: settings.attempts,
            policy,
            on_retry: None,
            deadline: None,
        }
    }

    /// Swap the retry policy.
    pub fn with_policy<P2>(self, policy: P2) -> RetryExecutor<P2> {
        RetryExecutor {
            backoff: self.backoff,
            attempts: self.attempts,
            policy,
            on_retry: self.on_retry,
            deadline: self.deadline,
        }
    }

    #[must_use]
    pub fn on_retry(mut self, listener: RetryListener) -> Self {
        self.on_retry = Some(listener);
        self
    }

    /// Never sleep past `deadline`: when the next backoff would reach it,
    /// the loop stops and returns the last error.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Upper bound on tries, the first one included.
    pub fn max_tries(&self) -> u32 {
        self.attempts.saturating_add(1)
    }

    /// Execute an operation with retry logic
    #[instrument(skip(self, operation), fields(max_tries = self.max_tries()))]
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, E>
    where
        P: RetryPolicy<E>,
        E: fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_with_outcome(operation).await.into_result()
    }

    /// Execute an operation with retry logic and return the full outcome.
    pub async fn execute_with_outcome<F, Fut, T, E>(&self, mut operation: F) -> RetryOutcome<T, E>
    where
        P: RetryPolicy<E>,
        E: fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_tries = self.max_tries();
        let mut history = Vec::new();
        let mut total_delay = Duration::ZERO;
        let mut attempt: u32 = 0;

        loop {
            debug!(attempt = attempt + 1, max_tries, "Executing attempt");

            let error = match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(retries = attempt, "Operation succeeded after retries");
                    }
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt + 1,
                        total_delay,
                        history,
                    };
                }
                Err(error) => error,
            };

            let tries = attempt + 1;
            let delay = if tries >= max_tries {
                warn!(tries, error = %error, "Retry attempts exhausted");
                None
            } else {
                match self.policy.should_retry(&error, attempt) {
                    RetryDecision::Stop => {
                        debug!(tries, error = %error, "Retry policy declined to retry");
                        None
                    }
                    RetryDecision::Retry => Some(self.backoff.delay(attempt)),
                    RetryDecision::RetryAfter(delay) => Some(delay),
                }
            };

            let delay = delay.filter(|delay| {
                let fits = self.fits_deadline(*delay);
                if !fits {
                    warn!(tries, ?delay, error = %error, "Deadline reached before next retry");
                }
                fits
            });

            let Some(delay) = delay else {
                history.push(RetryAttempt {
                    index: attempt,
                    delay: Duration::ZERO,
                    error: error.to_string(),
                });
                return RetryOutcome { result: Err(error), attempts: tries, total_delay, history };
            };

            let record = RetryAttempt { index: attempt, delay, error: error.to_string() };
            warn!(attempt = tries, ?delay, error = %error, "Operation failed, retrying");
            if let Some(listener) = &self.on_retry {
                guarded("retry_scheduled", || listener(&record));
            }
            history.push(record);

            tokio::time::sleep(delay).await;
            total_delay = total_delay.saturating_add(delay);
            attempt += 1;
        }
    }

    /// Turn `work` into a callable that runs the retry loop on every call.
    pub fn wrap<F, Fut, T, E>(self, work: F) -> impl Fn() -> BoxFuture<'static, Result<T, E>>
    where
        P: RetryPolicy<E> + Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let executor = Arc::new(self);
        let work = Arc::new(work);
        move || {
            let executor = Arc::clone(&executor);
            let work = Arc::clone(&work);
            let call: BoxFuture<'static, Result<T, E>> =
                Box::pin(async move { executor.execute(|| work()).await });
            call
        }
    }

    fn fits_deadline(&self, delay: Duration) -> bool {
        match self.deadline {
            Some(deadline) => {
                Instant::now().checked_add(delay).is_some_and(|wake| wake < deadline)
            }
            None => true,
        }
    }
}

/// Pre-defined retry policies for common scenarios
pub mod policies {
    use bulwark_common::error::ErrorClassification;

    use super::{RetryDecision, RetryPolicy};

    /// Retries errors whose classification says they are retryable and
    /// honours a server-provided `retry_after`.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct Classified;

    impl<E: ErrorClassification> RetryPolicy<E> for Classified {
        fn should_retry(&self, error: &E, _attempt: u32) -> RetryDecision {
            if !error.is_retryable() {
                return RetryDecision::Stop;
            }
            error.retry_after().map_or(RetryDecision::Retry, RetryDecision::RetryAfter)
        }
    }

    /// Always retry policy - retries on any error
    #[derive(Debug, Clone, Copy, Default)]
    pub struct AlwaysRetry;

    impl<E> RetryPolicy<E> for AlwaysRetry {
        fn should_retry(&self, _error: &E, _attempt: u32) -> RetryDecision {
            RetryDecision::Retry
        }
    }

    /// Never retry policy - never retries
    #[derive(Debug, Clone, Copy, Default)]
    pub struct NeverRetry;

    impl<E> RetryPolicy<E> for NeverRetry {
        fn should_retry(&self, _error: &E, _attempt: u32) -> RetryDecision {
            RetryDecision::Stop
        }
    }

    /// Predicate-based retry policy
    #[derive(Debug, Clone)]
    pub struct PredicateRetry<F> {
        predicate: F,
    }

    impl<F> PredicateRetry<F> {
        pub fn new(predicate: F) -> Self {
            Self { predicate }
        }
    }

    impl<F, E> RetryPolicy<E> for PredicateRetry<F>
    where
        F: Fn(&E, u32) -> bool,
    {
        fn should_retry(&self, error: &E, attempt: u32) -> RetryDecision {
            if (self.predicate)(error, attempt) {
                RetryDecision::Retry
            } else {
                RetryDecision::Stop
            }
        }
    }
}
