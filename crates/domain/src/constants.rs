//! Default values for the base configuration layer.
//!
//! Profiles and per-call overrides are applied on top of these.

// Circuit breaker
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_SUCCESS_THRESHOLD: u32 = 2;
pub const DEFAULT_RESET_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_HALF_OPEN_MAX_CALLS: u32 = 3;

// Bulkhead
pub const DEFAULT_MAX_CONCURRENT: usize = 10;
pub const DEFAULT_MAX_QUEUE: usize = 20;

// Timeout
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

// Retry
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 100;
pub const DEFAULT_MAX_DELAY_MS: u64 = 10_000;
pub const DEFAULT_JITTER: f64 = 0.2;

// Telemetry
pub const DEFAULT_SAMPLE_RATIO: f64 = 1.0;

/// Prefix shared by every environment variable the loader reads.
pub const ENV_PREFIX: &str = "BULWARK_";
