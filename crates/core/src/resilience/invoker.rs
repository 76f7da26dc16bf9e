//! Composition of the resilience primitives around one logical call
//!
//! Order is fixed:
//!
//! 1. circuit-breaker gate (fail fast while open)
//! 2. bulkhead admission (queue FIFO or reject)
//! 3. retry loop, each try guarded by the per-attempt timeout and the
//!    remaining call deadline
//! 4. release the bulkhead slot, record the single final outcome on the
//!    breaker, hand a terminal failure to the dead-letter sink
//!
//! Gate rejections record nothing on the breaker and are never
//! dead-lettered.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bulwark_common::error::ErrorClassification;
use bulwark_common::time::{Clock, SystemClock};
use bulwark_domain::{ConfigResult, DeadLetterRecord, ResilienceConfig, ResilienceConfigOverride, TargetId};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

use super::bulkhead::{Bulkhead, RejectReason};
use super::circuit_breaker::{CircuitBreaker, StateListener};
use super::error::{ResilienceError, ResilienceResult};
use super::retry::{RetryAttempt, RetryExecutor, RetryOutcome};
use super::timeout::TimeoutGuard;
use crate::dead_letter_ports::DeadLetterSink;
use crate::observer_ports::{guarded, NoopObserver, Rejection, ResilienceObserver};

/// Per-call knobs for [`ResilientInvoker::invoke_with`]
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Identity carried into the dead-letter record; a UUID v7 when unset
    pub call_id: Option<String>,
    /// Overall deadline across queue wait, tries and backoff
    pub deadline: Option<Instant>,
    /// Firing the token ends the call with [`ResilienceError::Cancelled`]
    pub cancel: Option<CancellationToken>,
    /// Replaces the retry, timeout and dead-letter sections for this call.
    /// Breaker and bulkhead are per target and ignore it.
    pub config: Option<ResilienceConfig>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn call_id(mut self, call_id: impl Into<String>) -> Self {
        self.call_id = Some(call_id.into());
        self
    }

    #[must_use]
    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Deadline `budget` from now.
    #[must_use]
    pub fn budget(self, budget: Duration) -> Self {
        self.deadline(Instant::now() + budget)
    }

    #[must_use]
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    #[must_use]
    pub fn config(mut self, config: ResilienceConfig) -> Self {
        self.config = Some(config);
        self
    }
}

/// Builder for [`ResilientInvoker`]
pub struct ResilientInvokerBuilder<C: Clock = SystemClock> {
    target: TargetId,
    config: ResilienceConfig,
    clock: C,
    sink: Option<Arc<dyn DeadLetterSink>>,
    observer: Arc<dyn ResilienceObserver>,
}

impl ResilientInvokerBuilder<SystemClock> {
    pub fn new(target: impl Into<TargetId>, config: ResilienceConfig) -> Self {
        Self {
            target: target.into(),
            config,
            clock: SystemClock,
            sink: None,
            observer: Arc::new(NoopObserver),
        }
    }
}

impl<C: Clock> ResilientInvokerBuilder<C> {
    /// Clock driving the breaker's reset timeout.
    pub fn clock<C2: Clock>(self, clock: C2) -> ResilientInvokerBuilder<C2> {
        ResilientInvokerBuilder {
            target: self.target,
            config: self.config,
            clock,
            sink: self.sink,
            observer: self.observer,
        }
    }

    #[must_use]
    pub fn dead_letter_sink(mut self, sink: Arc<dyn DeadLetterSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    #[must_use]
    pub fn observer(mut self, observer: Arc<dyn ResilienceObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Validate the configuration and create the breaker and bulkhead.
    pub fn build(self) -> ConfigResult<ResilientInvoker<C>> {
        self.config.validate()?;

        let listener: StateListener = {
            let observer = Arc::clone(&self.observer);
            let target = self.target.clone();
            Arc::new(move |from, to| observer.state_changed(&target, from, to))
        };
        let breaker = CircuitBreaker::with_clock(self.config.circuit_breaker.clone(), self.clock)?
            .with_listener(listener);
        let bulkhead = Bulkhead::new(self.config.bulkhead.clone())?;

        Ok(ResilientInvoker {
            target: self.target,
            config: self.config,
            breaker: Arc::new(breaker),
            bulkhead: Arc::new(bulkhead),
            sink: self.sink,
            observer: self.observer,
        })
    }
}

/// Protects calls to one target with breaker, bulkhead, retry and timeout.
///
/// Long-lived and shared by every concurrent call to the target.
pub struct ResilientInvoker<C: Clock = SystemClock> {
    target: TargetId,
    config: ResilienceConfig,
    breaker: Arc<CircuitBreaker<C>>,
    bulkhead: Arc<Bulkhead>,
    sink: Option<Arc<dyn DeadLetterSink>>,
    observer: Arc<dyn ResilienceObserver>,
}

impl<C: Clock> fmt::Debug for ResilientInvoker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientInvoker")
            .field("target", &self.target)
            .field("breaker", &self.breaker)
            .field("bulkhead", &self.bulkhead)
            .field("dead_letter_sink", &self.sink.is_some())
            .finish_non_exhaustive()
    }
}

impl ResilientInvoker<SystemClock> {
    /// Invoker without dead-letter sink or observer.
    pub fn new(target: impl Into<TargetId>, config: ResilienceConfig) -> ConfigResult<Self> {
        Self::builder(target, config).build()
    }

    pub fn builder(target: impl Into<TargetId>, config: ResilienceConfig) -> ResilientInvokerBuilder {
        ResilientInvokerBuilder::new(target, config)
    }
}

impl<C: Clock> ResilientInvoker<C> {
    pub fn target(&self) -> &TargetId {
        &self.target
    }

    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker<C>> {
        &self.breaker
    }

    pub fn bulkhead(&self) -> &Arc<Bulkhead> {
        &self.bulkhead
    }

    /// This invoker's configuration with `overrides` applied, for
    /// [`CallOptions::config`].
    pub fn config_for(&self, overrides: &ResilienceConfigOverride) -> ConfigResult<ResilienceConfig> {
        self.config.with_override(overrides)
    }

    /// Run `work` under the full resilience pipeline.
    pub async fn invoke<F, Fut, T, E>(&self, work: F) -> ResilienceResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display + ErrorClassification,
    {
        self.invoke_with(CallOptions::default(), work).await
    }

    /// [`invoke`](Self::invoke) with a call id, deadline, cancellation token
    /// or per-call configuration.
    #[instrument(skip_all, fields(target = %self.target))]
    pub async fn invoke_with<F, Fut, T, E>(
        &self,
        options: CallOptions,
        work: F,
    ) -> ResilienceResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display + ErrorClassification,
    {
        let CallOptions { call_id, deadline, cancel, config } = options;
        let config = config.as_ref().unwrap_or(&self.config);
        let run = self.run(call_id, deadline, config, work);

        match cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    () = token.cancelled() => {
                        debug!("Invocation cancelled");
                        Err(ResilienceError::Cancelled)
                    }
                    result = run => result,
                }
            }
            None => run.await,
        }
    }

    async fn run<F, Fut, T, E>(
        &self,
        call_id: Option<String>,
        deadline: Option<Instant>,
        config: &ResilienceConfig,
        mut work: F,
    ) -> ResilienceResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display + ErrorClassification,
    {
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            debug!("Deadline passed before the call started");
            return Err(ResilienceError::Timeout { timeout: Duration::ZERO });
        }

        // Dropped unreported on every early return below, which frees a
        // half-open probe slot without recording an outcome.
        let permit = match self.breaker.try_acquire() {
            Ok(permit) => permit,
            Err(open) => {
                warn!(retry_after = ?open.retry_after, "Circuit open, call rejected");
                self.notify_rejected(Rejection::CircuitOpen { retry_after: open.retry_after });
                return Err(open.into());
            }
        };

        let queued_at = Instant::now();
        let admission = self.bulkhead.acquire();
        let admitted = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, admission).await {
                Ok(admitted) => admitted,
                Err(_) => {
                    let waited = queued_at.elapsed();
                    warn!(?waited, "Deadline passed while queued for the bulkhead");
                    return Err(ResilienceError::Timeout { timeout: waited });
                }
            },
            None => admission.await,
        };
        let slot = match admitted {
            Ok(slot) => slot,
            Err(rejected) => {
                warn!(reason = ?rejected.reason, "Bulkhead rejected call");
                self.notify_rejected(match rejected.reason {
                    RejectReason::QueueFull => Rejection::BulkheadFull,
                    RejectReason::QueueTimeout => Rejection::QueueTimeout,
                });
                return Err(rejected.into());
            }
        };

        let mut executor = RetryExecutor::from_settings(&config.retry).on_retry({
            let observer = Arc::clone(&self.observer);
            let target = self.target.clone();
            Arc::new(move |attempt: &RetryAttempt| observer.retry_scheduled(&target, attempt))
        });
        if let Some(deadline) = deadline {
            executor = executor.with_deadline(deadline);
        }

        let configured = config.timeout.effective();
        let outcome = executor
            .execute_with_outcome(|| {
                let expired = deadline.is_some_and(|deadline| Instant::now() >= deadline);
                let call = (!expired).then(|| work());
                self.attempt(call, attempt_limit(configured, deadline))
            })
            .await;

        self.bulkhead.release(slot);

        let RetryOutcome { result, attempts, history, .. } = outcome;
        match result {
            Ok(value) => {
                permit.success();
                Ok(value)
            }
            Err(failure) => {
                permit.failure();
                if config.dead_letter.enabled {
                    self.dead_letter(call_id, &failure, attempts, history).await;
                }
                Err(failure)
            }
        }
    }

    /// One try. `None` means the deadline expired before the work started.
    async fn attempt<Fut, T, E>(
        &self,
        call: Option<Fut>,
        limit: Option<Duration>,
    ) -> ResilienceResult<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        let Some(call) = call else {
            return Err(ResilienceError::Timeout { timeout: Duration::ZERO });
        };

        let Some(limit) = limit else {
            return call.await.map_err(ResilienceError::Operation);
        };

        let result = TimeoutGuard::new(limit).execute(|| call).await;
        if let Err(ResilienceError::Timeout { timeout }) = &result {
            guarded("timed_out", || self.observer.timed_out(&self.target, *timeout));
        }
        result
    }

    async fn dead_letter<E: fmt::Display>(
        &self,
        call_id: Option<String>,
        failure: &ResilienceError<E>,
        attempts: u32,
        history: Vec<RetryAttempt>,
    ) {
        let Some(sink) = &self.sink else {
            return;
        };

        let call_id = call_id.unwrap_or_else(|| Uuid::now_v7().to_string());
        let record = DeadLetterRecord::new(self.target.clone(), call_id, failure.to_string(), attempts)
            .with_history(history.into_iter().map(|attempt| attempt.error).collect());

        guarded("dead_lettered", || self.observer.dead_lettered(&record));
        if let Err(sink_error) = sink.accept(record).await {
            error!(error = %sink_error, "Dead-letter sink failed; record dropped");
        }
    }

    fn notify_rejected(&self, reason: Rejection) {
        guarded("rejected", || self.observer.rejected(&self.target, reason));
    }
}

/// Per-attempt limit: the configured timeout capped by what is left of the
/// call deadline.
fn attempt_limit(configured: Option<Duration>, deadline: Option<Instant>) -> Option<Duration> {
    let remaining = deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()));
    match (configured, remaining) {
        (Some(configured), Some(remaining)) => Some(configured.min(remaining)),
        (configured, remaining) => configured.or(remaining),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use bulwark_common::error::ClassifiedError;
    use bulwark_common::testing::{settle, Script, Step};
    use bulwark_common::time::MockClock;
    use bulwark_domain::{BackoffKind, CircuitState, Profile};
    use parking_lot::Mutex;

    use super::*;
    use crate::dead_letter_ports::DeadLetterError;

    #[derive(Default)]
    struct Collect(Mutex<Vec<DeadLetterRecord>>);

    #[async_trait]
    impl DeadLetterSink for Collect {
        async fn accept(&self, record: DeadLetterRecord) -> Result<(), DeadLetterError> {
            self.0.lock().push(record);
            Ok(())
        }
    }

    struct Broken;

    #[async_trait]
    impl DeadLetterSink for Broken {
        async fn accept(&self, _record: DeadLetterRecord) -> Result<(), DeadLetterError> {
            Err(DeadLetterError::Unavailable("disk full".into()))
        }
    }

    #[derive(Default)]
    struct Events {
        transitions: Mutex<Vec<(CircuitState, CircuitState)>>,
        retries: AtomicUsize,
        timeouts: AtomicUsize,
        rejections: Mutex<Vec<Rejection>>,
        dead_letters: AtomicUsize,
    }

    impl ResilienceObserver for Events {
        fn state_changed(&self, _target: &TargetId, from: CircuitState, to: CircuitState) {
            self.transitions.lock().push((from, to));
        }

        fn retry_scheduled(&self, _target: &TargetId, _attempt: &RetryAttempt) {
            self.retries.fetch_add(1, Ordering::SeqCst);
        }

        fn timed_out(&self, _target: &TargetId, _timeout: Duration) {
            self.timeouts.fetch_add(1, Ordering::SeqCst);
        }

        fn rejected(&self, _target: &TargetId, reason: Rejection) {
            self.rejections.lock().push(reason);
        }

        fn dead_lettered(&self, _record: &DeadLetterRecord) {
            self.dead_letters.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn config() -> ResilienceConfig {
        ResilienceConfig::builder()
            .profile(Profile::Test)
            .failure_threshold(2)
            .retry_attempts(2)
            .timeout(Duration::from_millis(100))
            .build()
            .expect("valid config")
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_absorb_transient_failures() {
        let events = Arc::new(Events::default());
        let invoker = ResilientInvoker::builder("billing", config())
            .observer(events.clone())
            .build()
            .expect("invoker");
        let script = Script::fail_then_succeed(2, ClassifiedError::transient("503"), 7);

        let value = invoker.invoke(|| script.run()).await.expect("third try succeeds");

        assert_eq!(value, 7);
        assert_eq!(script.calls(), 3);
        assert_eq!(events.retries.load(Ordering::SeqCst), 2);
        let metrics = invoker.breaker().metrics();
        assert_eq!(metrics.successful_calls, 1);
        assert_eq!(metrics.failed_calls, 0);
        assert_eq!(invoker.bulkhead().in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_records_one_failure_and_dead_letters() {
        let sink = Arc::new(Collect::default());
        let events = Arc::new(Events::default());
        let invoker = ResilientInvoker::builder("billing", config())
            .dead_letter_sink(sink.clone())
            .observer(events.clone())
            .build()
            .expect("invoker");
        let script: Script<(), ClassifiedError> = Script::new(vec![
            Step::err(ClassifiedError::transient("first")),
            Step::err(ClassifiedError::transient("second")),
            Step::err(ClassifiedError::transient("third")),
        ]);

        let err = invoker
            .invoke_with(CallOptions::new().call_id("order-42"), || script.run())
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "third");
        assert_eq!(script.calls(), 3);
        assert_eq!(invoker.breaker().metrics().consecutive_failures, 1);

        let records = sink.0.lock();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].call_id, "order-42");
        assert_eq!(records[0].attempts, 3);
        assert_eq!(records[0].error, "third");
        assert_eq!(records[0].history, vec!["first", "second", "third"]);
        assert_eq!(events.dead_letters.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_non_retryable_propagates_unchanged() {
        let invoker = ResilientInvoker::new("billing", config()).expect("invoker");
        let script: Script<(), ClassifiedError> = Script::always_fail(ClassifiedError::permanent("400"));

        let err = invoker.invoke(|| script.run()).await.unwrap_err();

        assert_eq!(err.into_operation_error().map(|e| e.message().to_owned()), Some("400".into()));
        assert_eq!(script.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_breaker_fails_fast_without_running_work() {
        let clock = MockClock::new();
        let events = Arc::new(Events::default());
        let invoker = ResilientInvoker::builder("billing", config())
            .clock(clock.clone())
            .observer(events.clone())
            .build()
            .expect("invoker");
        let script: Script<(), ClassifiedError> = Script::always_fail(ClassifiedError::permanent("down"));

        for _ in 0..2 {
            let _ = invoker.invoke(|| script.run()).await;
        }
        assert_eq!(invoker.breaker().state(), CircuitState::Open);

        let err = invoker.invoke(|| script.run()).await.unwrap_err();
        assert!(err.is_circuit_open());
        assert_eq!(script.calls(), 2);
        assert_eq!(
            *events.transitions.lock(),
            vec![(CircuitState::Closed, CircuitState::Open)]
        );
        assert!(matches!(events.rejections.lock()[..], [Rejection::CircuitOpen { .. }]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejections_are_not_dead_lettered() {
        let sink = Arc::new(Collect::default());
        let invoker = ResilientInvoker::builder("billing", config())
            .dead_letter_sink(sink.clone())
            .build()
            .expect("invoker");
        invoker.breaker().force_open();

        let err = invoker
            .invoke(|| async { Ok::<_, ClassifiedError>(()) })
            .await
            .unwrap_err();

        assert!(err.is_circuit_open());
        assert!(sink.0.lock().is_empty());
        assert_eq!(invoker.breaker().metrics().failed_calls, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_is_retried() {
        let events = Arc::new(Events::default());
        let invoker = ResilientInvoker::builder("search", config())
            .observer(events.clone())
            .build()
            .expect("invoker");
        let script: Script<&str, ClassifiedError> = Script::new(vec![
            Step::ok("slow").after(Duration::from_secs(5)),
            Step::ok("fast"),
        ]);

        let value = invoker.invoke(|| script.run()).await.expect("second try is fast");

        assert_eq!(value, "fast");
        assert_eq!(events.timeouts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_caps_attempt_timeout() {
        let invoker = ResilientInvoker::new("search", config()).expect("invoker");
        let script: Script<(), ClassifiedError> =
            Script::new(vec![Step::ok(()).after(Duration::from_secs(5))]);
        let start = Instant::now();

        let err = invoker
            .invoke_with(CallOptions::new().budget(Duration::from_millis(30)), || script.run())
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert!(start.elapsed() < Duration::from_millis(100));
        assert_eq!(script.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_past_deadline_never_runs_work() {
        let invoker = ResilientInvoker::new("search", config()).expect("invoker");
        let script: Script<(), ClassifiedError> = Script::always_fail(ClassifiedError::transient("x"));
        let deadline = Instant::now();
        tokio::time::advance(Duration::from_millis(1)).await;

        let err = invoker
            .invoke_with(CallOptions::new().deadline(deadline), || script.run())
            .await
            .unwrap_err();

        assert!(matches!(err, ResilienceError::Timeout { timeout } if timeout.is_zero()));
        assert_eq!(script.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_skips_remaining_retries() {
        let invoker = Arc::new(ResilientInvoker::new("search", config()).expect("invoker"));
        let token = CancellationToken::new();
        let script: Script<(), ClassifiedError> =
            Script::new(vec![Step::ok(()).after(Duration::from_millis(50))]);

        let call = {
            let invoker = Arc::clone(&invoker);
            let script = script.clone();
            let token = token.clone();
            tokio::spawn(async move {
                invoker.invoke_with(CallOptions::new().cancel_on(token), || script.run()).await
            })
        };
        settle().await;
        token.cancel();

        let result = call.await.expect("join");
        assert!(matches!(result, Err(ResilienceError::Cancelled)));
        assert_eq!(invoker.bulkhead().in_flight(), 0);
        let metrics = invoker.breaker().metrics();
        assert_eq!(metrics.successful_calls + metrics.failed_calls, 0);
    }

    fn single_slot() -> ResilienceConfig {
        ResilienceConfig::builder()
            .profile(Profile::Test)
            .max_concurrent(1)
            .max_queue(4)
            .timeout(Duration::from_secs(10))
            .build()
            .expect("valid config")
    }

    /// Occupies the only slot of `invoker` for one second.
    fn hold_slot(invoker: &Arc<ResilientInvoker>) -> tokio::task::JoinHandle<ResilienceResult<(), ClassifiedError>> {
        let invoker = Arc::clone(invoker);
        let slow: Script<(), ClassifiedError> =
            Script::new(vec![Step::ok(()).after(Duration::from_secs(1))]);
        tokio::spawn(async move { invoker.invoke(|| slow.run()).await })
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_while_queued_leaves_the_queue() {
        let invoker = Arc::new(ResilientInvoker::new("export", single_slot()).expect("invoker"));
        let holder = hold_slot(&invoker);
        settle().await;

        let token = CancellationToken::new();
        let script: Script<(), ClassifiedError> = Script::new(vec![Step::ok(())]);
        let queued = {
            let invoker = Arc::clone(&invoker);
            let script = script.clone();
            let token = token.clone();
            tokio::spawn(async move {
                invoker.invoke_with(CallOptions::new().cancel_on(token), || script.run()).await
            })
        };
        settle().await;
        assert_eq!(invoker.bulkhead().queued(), 1);

        token.cancel();
        let result = queued.await.expect("join");

        assert!(matches!(result, Err(ResilienceError::Cancelled)));
        assert_eq!(invoker.bulkhead().queued(), 0);
        assert_eq!(script.calls(), 0);
        let metrics = invoker.breaker().metrics();
        assert_eq!(metrics.successful_calls + metrics.failed_calls, 0);

        holder.await.expect("join").expect("holder completes");
        assert_eq!(invoker.breaker().metrics().successful_calls, 1);
        assert_eq!(invoker.bulkhead().in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_in_queue_reports_time_waited() {
        let invoker = Arc::new(ResilientInvoker::new("export", single_slot()).expect("invoker"));
        let holder = hold_slot(&invoker);
        settle().await;

        let script: Script<(), ClassifiedError> = Script::new(vec![Step::ok(())]);
        let err = invoker
            .invoke_with(CallOptions::new().budget(Duration::from_millis(50)), || script.run())
            .await
            .unwrap_err();

        let ResilienceError::Timeout { timeout: waited } = err else {
            panic!("expected a timeout, got {err:?}");
        };
        assert!(waited >= Duration::from_millis(50), "{waited:?}");
        assert!(waited < Duration::from_secs(1), "{waited:?}");
        assert_eq!(invoker.bulkhead().queued(), 0);
        assert_eq!(script.calls(), 0);
        let metrics = invoker.breaker().metrics();
        assert_eq!(metrics.successful_calls + metrics.failed_calls, 0);

        holder.await.expect("join").expect("holder completes");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_during_backoff_skips_next_try() {
        let sink = Arc::new(Collect::default());
        let config = ResilienceConfig::builder()
            .profile(Profile::Test)
            .retry_attempts(3)
            .backoff(BackoffKind::Exponential, Duration::from_secs(5), Duration::from_secs(30))
            .build()
            .expect("valid config");
        let invoker = Arc::new(
            ResilientInvoker::builder("search", config)
                .dead_letter_sink(sink.clone())
                .build()
                .expect("invoker"),
        );
        let token = CancellationToken::new();
        let script: Script<(), ClassifiedError> =
            Script::always_fail(ClassifiedError::transient("503"));

        let call = {
            let invoker = Arc::clone(&invoker);
            let script = script.clone();
            let token = token.clone();
            tokio::spawn(async move {
                invoker.invoke_with(CallOptions::new().cancel_on(token), || script.run()).await
            })
        };
        settle().await;
        // First try failed; the call is now sleeping before the second.
        assert_eq!(script.calls(), 1);
        assert_eq!(invoker.bulkhead().in_flight(), 1);

        token.cancel();
        let result = call.await.expect("join");

        assert!(matches!(result, Err(ResilienceError::Cancelled)));
        assert_eq!(script.calls(), 1);
        assert_eq!(invoker.bulkhead().in_flight(), 0);
        let metrics = invoker.breaker().metrics();
        assert_eq!(metrics.successful_calls + metrics.failed_calls, 0);
        assert!(sink.0.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_half_open_call_frees_its_slot() {
        let clock = MockClock::new();
        let config = ResilienceConfig::builder()
            .profile(Profile::Test)
            .failure_threshold(1)
            .half_open_max_calls(1)
            .reset_timeout(Duration::from_millis(100))
            .build()
            .expect("valid config");
        let invoker = Arc::new(
            ResilientInvoker::builder("search", config)
                .clock(clock.clone())
                .build()
                .expect("invoker"),
        );
        invoker.breaker().force_open();
        clock.advance_millis(100);

        let token = CancellationToken::new();
        let slow: Script<(), ClassifiedError> =
            Script::new(vec![Step::ok(()).after(Duration::from_millis(500))]);
        let probe = {
            let invoker = Arc::clone(&invoker);
            let slow = slow.clone();
            let token = token.clone();
            tokio::spawn(async move {
                invoker.invoke_with(CallOptions::new().cancel_on(token), || slow.run()).await
            })
        };
        settle().await;

        let err = invoker.invoke(|| async { Ok::<_, ClassifiedError>(()) }).await.unwrap_err();
        assert!(matches!(err, ResilienceError::CircuitOpen { retry_after } if retry_after.is_zero()));

        token.cancel();
        assert!(matches!(probe.await.expect("join"), Err(ResilienceError::Cancelled)));
        assert_eq!(invoker.breaker().metrics().half_open_in_flight, 0);

        invoker
            .invoke(|| async { Ok::<_, ClassifiedError>(()) })
            .await
            .expect("the freed slot admits the next probe");
    }

    #[tokio::test]
    async fn test_sink_failure_is_swallowed() {
        let invoker = ResilientInvoker::builder("billing", config())
            .dead_letter_sink(Arc::new(Broken))
            .build()
            .expect("invoker");

        let err = invoker
            .invoke(|| async { Err::<(), _>(ClassifiedError::permanent("nope")) })
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "nope");
    }

    #[tokio::test]
    async fn test_per_call_config_disables_dead_letter() {
        let sink = Arc::new(Collect::default());
        let invoker = ResilientInvoker::builder("billing", config())
            .dead_letter_sink(sink.clone())
            .build()
            .expect("invoker");
        let mut layer = ResilienceConfigOverride::default();
        layer.dead_letter.enabled = Some(false);
        let quiet = invoker.config_for(&layer).expect("valid override");

        let _ = invoker
            .invoke_with(CallOptions::new().config(quiet), || async {
                Err::<(), _>(ClassifiedError::permanent("nope"))
            })
            .await;

        assert!(sink.0.lock().is_empty());
    }

    #[tokio::test]
    async fn test_successful_calls_have_identical_deltas() {
        let invoker = ResilientInvoker::new("billing", config()).expect("invoker");

        let before = invoker.breaker().metrics();
        invoker.invoke(|| async { Ok::<_, ClassifiedError>(1) }).await.expect("ok");
        let mid = invoker.breaker().metrics();
        invoker.invoke(|| async { Ok::<_, ClassifiedError>(1) }).await.expect("ok");
        let after = invoker.breaker().metrics();

        assert_eq!(mid.successful_calls - before.successful_calls, 1);
        assert_eq!(after.successful_calls - mid.successful_calls, 1);
        assert_eq!(mid.state, after.state);
        assert_eq!(invoker.bulkhead().metrics().admitted, 2);
        assert_eq!(invoker.bulkhead().in_flight(), 0);
    }

    #[test]
    fn test_attempt_limit() {
        let soon = Instant::now() + Duration::from_secs(60);
        assert_eq!(attempt_limit(None, None), None);
        assert_eq!(attempt_limit(Some(Duration::from_millis(5)), None), Some(Duration::from_millis(5)));
        assert_eq!(attempt_limit(Some(Duration::from_millis(5)), Some(soon)), Some(Duration::from_millis(5)));
        assert!(attempt_limit(None, Some(soon)).is_some_and(|limit| limit <= Duration::from_secs(60)));
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let mut config = config();
        config.bulkhead.max_concurrent = 0;
        assert!(ResilientInvoker::new("billing", config).is_err());
    }

    #[test]
    fn test_linear_backoff_config_is_accepted() {
        let config = ResilienceConfig::builder()
            .backoff(BackoffKind::Linear, Duration::from_millis(10), Duration::from_millis(50))
            .build()
            .expect("valid");
        assert!(ResilientInvoker::new("x", config).is_ok());
    }
}
