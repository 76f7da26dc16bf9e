//! Async testing utilities
//!
//! Helpers for tests that drive concurrent calls through the resilience
//! primitives. All waits use tokio time, so they cooperate with
//! `#[tokio::test(start_paused = true)]`.

// Test helpers panic on purpose to fail tests early
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

use std::future::Future;
use std::time::Duration;

/// Assert that a condition eventually becomes true within a timeout (async
/// version)
///
/// # Examples
///
/// ```no_run
/// # #[cfg(feature = "runtime")]
/// # {
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// #[tokio::test(flavor = "multi_thread")]
/// async fn test_eventually() {
///     let flag = Arc::new(AtomicBool::new(false));
///     let flag_clone = flag.clone();
///
///     tokio::spawn(async move {
///         tokio::time::sleep(Duration::from_millis(100)).await;
///         flag_clone.store(true, Ordering::SeqCst);
///     });
///
///     bulwark_common::assert_eventually_async!(Duration::from_secs(1), async {
///         flag.load(Ordering::SeqCst)
///     });
/// }
/// # }
/// ```
#[macro_export]
macro_rules! assert_eventually_async {
    ($timeout:expr, $fut:expr) => {{
        let timeout_duration = $timeout;
        let result = tokio::time::timeout(timeout_duration, async {
            loop {
                if $fut.await {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await;

        assert!(result.is_ok(), "Condition did not become true within {:?}", timeout_duration);
    }};
}

/// Wait for a future to complete with a timeout, returning a Result
pub async fn timeout_ok<F, T>(duration: Duration, fut: F) -> Result<T, tokio::time::error::Elapsed>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, fut).await
}

/// Poll an async condition until it returns true or times out
///
/// Uses `tokio::time::Instant`, so paused-clock tests advance it.
pub async fn poll_until<F, Fut>(timeout: Duration, interval: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = tokio::time::Instant::now();

    while start.elapsed() < timeout {
        if condition().await {
            return true;
        }
        tokio::time::sleep(interval).await;
    }

    condition().await
}

/// Yield to the scheduler a few times so spawned tasks reach their next
/// suspension point (queue wait, sleep) before the test continues.
pub async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for testing::async_utils.
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn test_timeout_ok_completes() {
        let result = timeout_ok(Duration::from_millis(100), async { 42 }).await;
        assert_eq!(result.ok(), Some(42));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_ok_elapses() {
        let result = timeout_ok(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
        })
        .await;
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_sees_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        let flag_clone = Arc::clone(&flag);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            flag_clone.store(true, Ordering::SeqCst);
        });

        let seen = poll_until(Duration::from_secs(1), Duration::from_millis(10), || {
            let flag = Arc::clone(&flag);
            async move { flag.load(Ordering::SeqCst) }
        })
        .await;
        assert!(seen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_assert_eventually_async() {
        let flag = Arc::new(AtomicBool::new(false));
        let flag_clone = Arc::clone(&flag);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            flag_clone.store(true, Ordering::SeqCst);
        });

        crate::assert_eventually_async!(Duration::from_secs(1), async {
            flag.load(Ordering::SeqCst)
        });
    }
}
