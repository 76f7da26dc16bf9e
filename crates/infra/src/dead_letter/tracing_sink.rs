use async_trait::async_trait;
use bulwark_core::{DeadLetterError, DeadLetterSink};
use bulwark_domain::DeadLetterRecord;

/// Sink that only logs. Useful as a default when no store is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDeadLetterSink;

#[async_trait]
impl DeadLetterSink for TracingDeadLetterSink {
    async fn accept(&self, record: DeadLetterRecord) -> Result<(), DeadLetterError> {
        tracing::error!(
            id = %record.id,
            target = %record.target,
            call_id = %record.call_id,
            attempts = record.attempts,
            error = %record.error,
            "Invocation dead-lettered"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tracing_sink_accepts() {
        let record = DeadLetterRecord::new("billing".into(), "call-1", "declined", 1);
        assert!(TracingDeadLetterSink.accept(record).await.is_ok());
    }
}
