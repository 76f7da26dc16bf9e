//! Integration tests for the infrastructure adapters
//!
//! Drives registry invokers wired through [`ResilienceContext`] into the
//! file and in-memory dead-letter sinks and the counting observer.

use std::sync::Arc;
use std::time::Duration;

use bulwark_common::testing::{settle, Script, Step};
use bulwark_common::ClassifiedError;
use bulwark_core::{CallOptions, ResilienceError};
use bulwark_domain::{
    CircuitState, DeadLetterRecord, Profile, ResilienceConfig, ResilienceConfigOverride, TargetId,
};
use bulwark_infra::{InMemoryDeadLetterSink, JsonLinesDeadLetterSink, ResilienceContext};
use tokio_test::{assert_err, assert_ok};

fn test_config() -> ResilienceConfig {
    ResilienceConfig::builder().profile(Profile::Test).build().expect("test profile is valid")
}

/// Validates that exhausted calls land in a JSON Lines file, one line per
/// invocation, with the full error history.
///
/// # Test Steps
/// 1. Context with a JSON Lines sink and two retries
/// 2. Two invocations that fail on every try
/// 3. Read the file back and verify both records
#[tokio::test]
async fn test_exhausted_calls_are_written_as_json_lines() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let sink = Arc::new(JsonLinesDeadLetterSink::new(dir.path().join("dead-letters.jsonl")));
    let config = ResilienceConfig::builder()
        .profile(Profile::Test)
        .retry_attempts(2)
        .failure_threshold(10)
        .build()?;
    let context = ResilienceContext::with_sink(config, sink.clone());
    let invoker = context.registry.get_or_create("ledger")?;

    for call_id in ["txn-1", "txn-2"] {
        let script: Script<(), ClassifiedError> = Script::new(vec![
            Step::err(ClassifiedError::transient("connection reset")),
            Step::err(ClassifiedError::transient("gateway timeout")),
            Step::err(ClassifiedError::transient("service unavailable")),
        ]);
        assert_err!(invoker.invoke_with(CallOptions::new().call_id(call_id), || script.run()).await);
    }

    let records = std::fs::read_to_string(sink.path())?
        .lines()
        .map(serde_json::from_str)
        .collect::<Result<Vec<DeadLetterRecord>, _>>()?;
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].call_id, "txn-1");
    assert_eq!(records[1].call_id, "txn-2");
    for record in &records {
        assert_eq!(record.target, TargetId::from("ledger"));
        assert_eq!(record.attempts, 3);
        assert_eq!(record.error, "service unavailable");
        assert_eq!(record.history.len(), 3);
    }

    let stats = context.stats();
    assert_eq!(stats.retries_scheduled, 4);
    assert_eq!(stats.dead_letters, 2);
    Ok(())
}

/// Validates that the counting observer sees breaker transitions and
/// fail-fast rejections, and that rejected calls are not dead-lettered.
#[tokio::test]
async fn test_metrics_track_breaker_lifecycle() -> anyhow::Result<()> {
    let sink = Arc::new(InMemoryDeadLetterSink::new());
    let config = ResilienceConfig::builder()
        .profile(Profile::Test)
        .retry_attempts(0)
        .failure_threshold(2)
        .reset_timeout(Duration::from_secs(60))
        .build()?;
    let context = ResilienceContext::with_sink(config, sink.clone());
    let invoker = context.registry.get_or_create("inventory")?;

    let failing: Script<(), ClassifiedError> =
        Script::always_fail(ClassifiedError::transient("503"));
    for _ in 0..2 {
        assert_err!(invoker.invoke(|| failing.run()).await);
    }
    assert_eq!(invoker.breaker().state(), CircuitState::Open);

    let err = invoker.invoke(|| failing.run()).await.unwrap_err();
    assert!(err.is_circuit_open());
    assert_eq!(failing.calls(), 2);

    let stats = context.stats();
    assert_eq!(stats.circuits_opened, 1);
    assert_eq!(stats.rejected_circuit_open, 1);
    assert_eq!(stats.dead_letters, 2);
    assert_eq!(sink.len(), 2);
    Ok(())
}

/// Validates per-target overrides and timeouts through the context: the
/// slow target times out, is retried, and the timeouts are counted.
#[tokio::test(start_paused = true)]
async fn test_per_target_timeout_is_counted() -> anyhow::Result<()> {
    let sink = Arc::new(InMemoryDeadLetterSink::new());
    let context = ResilienceContext::with_sink(test_config(), sink.clone());

    let mut layer = ResilienceConfigOverride::default();
    layer.timeout.timeout_ms = Some(50);
    layer.retry.attempts = Some(1);
    context.registry.configure("reports", layer)?;
    let invoker = context.registry.get_or_create("reports")?;

    let slow: Script<u32, ClassifiedError> = Script::new(vec![
        Step::ok(1).after(Duration::from_millis(200)),
        Step::ok(2),
    ]);
    let value = assert_ok!(invoker.invoke(|| slow.run()).await);

    assert_eq!(value, 2);
    assert_eq!(slow.calls(), 2);
    let stats = context.stats();
    assert_eq!(stats.timeouts, 1);
    assert_eq!(stats.retries_scheduled, 1);
    assert!(sink.is_empty());
    Ok(())
}

/// Validates that a full bulkhead is counted as a rejection and reported
/// as `BulkheadRejected`.
#[tokio::test(start_paused = true)]
async fn test_bulkhead_rejection_is_counted() -> anyhow::Result<()> {
    let config = ResilienceConfig::builder()
        .profile(Profile::Test)
        .max_concurrent(1)
        .max_queue(0)
        .timeout(Duration::from_secs(10))
        .build()?;
    let context = ResilienceContext::new(config);
    let invoker = context.registry.get_or_create("export")?;

    let slow: Script<(), ClassifiedError> =
        Script::new(vec![Step::ok(()).after(Duration::from_millis(100))]);
    let holder = {
        let invoker = Arc::clone(&invoker);
        let slow = slow.clone();
        tokio::spawn(async move { invoker.invoke(|| slow.run()).await })
    };
    settle().await;

    let err = invoker.invoke(|| slow.run()).await.unwrap_err();
    assert!(matches!(err, ResilienceError::BulkheadRejected { max_concurrent: 1, max_queue: 0 }));
    assert_ok!(holder.await?);

    assert_eq!(context.stats().rejected_bulkhead_full, 1);
    assert_eq!(slow.calls(), 1);
    Ok(())
}
