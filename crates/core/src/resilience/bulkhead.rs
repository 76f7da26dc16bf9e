//! Concurrency bulkhead
//!
//! Bounds in-flight calls to `max_concurrent` and lets at most `max_queue`
//! further callers wait. Admission is FIFO: the semaphore hands freed
//! permits to waiters in arrival order, and a non-waiting `try_acquire`
//! cannot overtake a queued waiter.
//!
//! A [`BulkheadSlot`] returns its permit when dropped, so the slot is
//! released exactly once on every exit path including cancellation. A
//! caller whose acquire future is dropped (or whose queue wait times out)
//! leaves the wait queue and is never granted a slot afterwards.

use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bulwark_domain::{BulkheadSettings, ConfigError, ConfigResult};
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::error::ResilienceError;

/// Why [`Bulkhead::acquire`] turned a caller away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Every slot busy and the queue full
    QueueFull,
    /// Waited `queue_timeout` without getting a slot
    QueueTimeout,
}

/// Rejection returned by [`Bulkhead::acquire`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("bulkhead rejected call ({reason:?}, {max_concurrent} in flight, {max_queue} queued)")]
pub struct BulkheadRejected {
    pub max_concurrent: usize,
    pub max_queue: usize,
    pub reason: RejectReason,
}

impl<E> From<BulkheadRejected> for ResilienceError<E> {
    fn from(rejected: BulkheadRejected) -> Self {
        ResilienceError::BulkheadRejected {
            max_concurrent: rejected.max_concurrent,
            max_queue: rejected.max_queue,
        }
    }
}

/// Admission ticket for one in-flight call.
///
/// Dropping the slot (or passing it to [`Bulkhead::release`]) frees the
/// capacity. Moving the slot makes a double release impossible.
#[derive(Debug)]
pub struct BulkheadSlot {
    _permit: OwnedSemaphorePermit,
    acquired_at: Instant,
    queue_wait: Duration,
}

impl BulkheadSlot {
    /// When the slot was granted
    pub fn acquired_at(&self) -> Instant {
        self.acquired_at
    }

    /// How long the caller waited in the queue (zero on the fast path)
    pub fn queue_wait(&self) -> Duration {
        self.queue_wait
    }

    /// Time the slot has been held
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}

/// Metrics for bulkhead monitoring
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkheadMetrics {
    pub max_concurrent: usize,
    pub max_queue: usize,
    /// Slots currently held
    pub in_flight: usize,
    /// Callers currently waiting
    pub queued: usize,
    /// Slots granted since creation
    pub admitted: u64,
    /// Callers turned away, queue timeouts included
    pub rejected: u64,
    pub queue_timeouts: u64,
}

impl BulkheadMetrics {
    /// Share of slots in use, `0.0..=1.0`
    pub fn utilization(&self) -> f64 {
        self.in_flight as f64 / self.max_concurrent as f64
    }

    /// Every slot is held and the queue is full
    pub fn is_saturated(&self) -> bool {
        self.in_flight >= self.max_concurrent && self.queued >= self.max_queue
    }
}

/// Decrements the queue counter however the wait ends.
struct QueueTicket<'a>(&'a AtomicUsize);

impl Drop for QueueTicket<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Bulkhead for limiting concurrent operations
pub struct Bulkhead {
    settings: BulkheadSettings,
    semaphore: Arc<Semaphore>,
    queued: AtomicUsize,
    admitted: AtomicU64,
    rejected: AtomicU64,
    queue_timeouts: AtomicU64,
}

impl std::fmt::Debug for Bulkhead {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bulkhead")
            .field("settings", &self.settings)
            .field("in_flight", &self.in_flight())
            .field("queued", &self.queued.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl Bulkhead {
    /// Create a bulkhead; `max_concurrent` must be at least 1.
    pub fn new(settings: BulkheadSettings) -> ConfigResult<Self> {
        if settings.max_concurrent == 0 {
            return Err(ConfigError::invalid("bulkhead.max_concurrent", "must be at least 1"));
        }
        if settings.max_concurrent > Semaphore::MAX_PERMITS {
            return Err(ConfigError::invalid(
                "bulkhead.max_concurrent",
                format!("must not exceed {}", Semaphore::MAX_PERMITS),
            ));
        }

        Ok(Self {
            semaphore: Arc::new(Semaphore::new(settings.max_concurrent)),
            queued: AtomicUsize::new(0),
            admitted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            queue_timeouts: AtomicU64::new(0),
            settings,
        })
    }

    pub fn settings(&self) -> &BulkheadSettings {
        &self.settings
    }

    /// Take a slot without waiting; `None` when all slots are held or
    /// callers are already queued.
    pub fn try_acquire(&self) -> Option<BulkheadSlot> {
        let started = Instant::now();
        Arc::clone(&self.semaphore).try_acquire_owned().ok().map(|permit| self.admit(permit, started))
    }

    /// Take a slot, queueing FIFO behind earlier waiters when all slots are
    /// held. Fails immediately when the queue is full and after
    /// `queue_timeout` when one is configured.
    ///
    /// Cancel-safe: dropping the future removes the caller from the queue.
    pub async fn acquire(&self) -> Result<BulkheadSlot, BulkheadRejected> {
        let started = Instant::now();

        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => return Ok(self.admit(permit, started)),
            Err(TryAcquireError::NoPermits) => {}
            Err(TryAcquireError::Closed) => return Err(self.reject(RejectReason::QueueFull)),
        }

        let max_queue = self.settings.max_queue;
        if self
            .queued
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |queued| {
                (queued < max_queue).then_some(queued + 1)
            })
            .is_err()
        {
            return Err(self.reject(RejectReason::QueueFull));
        }
        let _ticket = QueueTicket(&self.queued);

        let wait = Arc::clone(&self.semaphore).acquire_owned();
        let permit = match self.settings.queue_timeout {
            Some(limit) => match tokio::time::timeout(limit, wait).await {
                Ok(permit) => permit,
                Err(_) => {
                    self.queue_timeouts.fetch_add(1, Ordering::Relaxed);
                    warn!(waited = ?limit, "Bulkhead queue wait timed out");
                    return Err(self.reject(RejectReason::QueueTimeout));
                }
            },
            None => wait.await,
        };

        match permit {
            Ok(permit) => Ok(self.admit(permit, started)),
            Err(_) => Err(self.reject(RejectReason::QueueFull)),
        }
    }

    /// Give a slot back. Equivalent to dropping it.
    pub fn release(&self, slot: BulkheadSlot) {
        debug!(held_for = ?slot.held_for(), "Bulkhead slot released");
        drop(slot);
    }

    /// Execute an operation with bulkhead protection
    #[instrument(skip_all, fields(in_flight = self.in_flight()))]
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let slot = self.acquire().await?;
        let result = operation().await.map_err(ResilienceError::Operation);
        self.release(slot);
        result
    }

    /// Slots currently held
    pub fn in_flight(&self) -> usize {
        self.settings.max_concurrent.saturating_sub(self.semaphore.available_permits())
    }

    /// Callers currently waiting
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    /// Get bulkhead metrics
    pub fn metrics(&self) -> BulkheadMetrics {
        BulkheadMetrics {
            max_concurrent: self.settings.max_concurrent,
            max_queue: self.settings.max_queue,
            in_flight: self.in_flight(),
            queued: self.queued(),
            admitted: self.admitted.load(Ordering::Acquire),
            rejected: self.rejected.load(Ordering::Acquire),
            queue_timeouts: self.queue_timeouts.load(Ordering::Acquire),
        }
    }

    fn admit(&self, permit: OwnedSemaphorePermit, started: Instant) -> BulkheadSlot {
        self.admitted.fetch_add(1, Ordering::Relaxed);
        let acquired_at = Instant::now();
        let queue_wait = acquired_at.saturating_duration_since(started);
        debug!(?queue_wait, in_flight = self.in_flight(), "Bulkhead slot acquired");
        BulkheadSlot { _permit: permit, acquired_at, queue_wait }
    }

    fn reject(&self, reason: RejectReason) -> BulkheadRejected {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        debug!(?reason, "Bulkhead rejected call");
        BulkheadRejected {
            max_concurrent: self.settings.max_concurrent,
            max_queue: self.settings.max_queue,
            reason,
        }
    }
}
