//! Resilience context - wires the registry to its adapters
//!
//! Every invoker created through the context reports to a
//! [`TracingObserver`] (sampled per the telemetry settings) and a shared
//! [`MetricsObserver`], and dead-letters into one sink.

use std::sync::Arc;

use bulwark_core::{DeadLetterSink, ResilienceRegistry};
use bulwark_domain::{ConfigResult, ResilienceConfig};

use crate::config;
use crate::dead_letter::TracingDeadLetterSink;
use crate::observability::{CompositeObserver, MetricsObserver, ResilienceStats, TracingObserver};

pub struct ResilienceContext {
    pub config: ResilienceConfig,
    pub registry: ResilienceRegistry,
    pub metrics: Arc<MetricsObserver>,
}

impl ResilienceContext {
    /// Load configuration from the environment and files, then wire the
    /// context with a log-only dead-letter sink.
    ///
    /// # Errors
    /// Returns the loader's `ConfigError`.
    pub fn load() -> ConfigResult<Self> {
        Ok(Self::new(config::load()?))
    }

    pub fn new(config: ResilienceConfig) -> Self {
        Self::with_sink(config, Arc::new(TracingDeadLetterSink))
    }

    pub fn with_sink(config: ResilienceConfig, sink: Arc<dyn DeadLetterSink>) -> Self {
        let metrics = Arc::new(MetricsObserver::new());
        let observer = CompositeObserver::new()
            .with(Arc::new(TracingObserver::from_settings(&config.telemetry)))
            .with(metrics.clone());

        let registry = ResilienceRegistry::new(config.clone())
            .with_dead_letter_sink(sink)
            .with_observer(Arc::new(observer));

        tracing::info!(
            max_concurrent = config.bulkhead.max_concurrent,
            retry_attempts = config.retry.attempts,
            dead_letter = config.dead_letter.enabled,
            "Resilience context initialized"
        );

        Self { config, registry, metrics }
    }

    pub fn stats(&self) -> ResilienceStats {
        self.metrics.stats()
    }
}
