//! Scripted operations for exercising retry, breaker and bulkhead paths.
//!
//! A [`Script`] replays a fixed sequence of outcomes (e.g. fail, fail,
//! succeed) and counts how many times it was invoked. Once the script is
//! exhausted the last outcome repeats.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One scripted step: an outcome plus an optional simulated latency.
#[derive(Debug, Clone)]
pub struct Step<T, E> {
    outcome: Result<T, E>,
    latency: Option<Duration>,
}

impl<T, E> Step<T, E> {
    /// A step that succeeds immediately.
    pub fn ok(value: T) -> Self {
        Self { outcome: Ok(value), latency: None }
    }

    /// A step that fails immediately.
    pub fn err(error: E) -> Self {
        Self { outcome: Err(error), latency: None }
    }

    /// Delay the outcome by `latency` (tokio time).
    #[must_use]
    pub fn after(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }
}

/// Replays scripted outcomes; clones share the call counter.
#[derive(Debug, Clone)]
pub struct Script<T, E> {
    steps: Arc<Vec<Step<T, E>>>,
    calls: Arc<AtomicUsize>,
}

impl<T, E> Script<T, E>
where
    T: Clone,
    E: Clone,
{
    /// Create a script from steps. An empty script is not allowed.
    ///
    /// # Panics
    /// Panics if `steps` is empty.
    pub fn new(steps: Vec<Step<T, E>>) -> Self {
        assert!(!steps.is_empty(), "a script needs at least one step");
        Self { steps: Arc::new(steps), calls: Arc::new(AtomicUsize::new(0)) }
    }

    /// `failures` errors followed by a success.
    pub fn fail_then_succeed(failures: usize, error: E, value: T) -> Self {
        let mut steps: Vec<Step<T, E>> =
            (0..failures).map(|_| Step::err(error.clone())).collect();
        steps.push(Step::ok(value));
        Self::new(steps)
    }

    /// Always fails with `error`.
    pub fn always_fail(error: E) -> Self {
        Self::new(vec![Step::err(error)])
    }

    /// Run the next step, honouring its latency.
    pub async fn run(&self) -> Result<T, E> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        let step = &self.steps[index.min(self.steps.len() - 1)];
        if let Some(latency) = step.latency {
            tokio::time::sleep(latency).await;
        }
        step.outcome.clone()
    }

    /// Number of times the script has been run.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}
