//! Structured logging setup.
//!
//! Every Bulwark crate logs through the `tracing` macros. Binaries and test
//! harnesses call [`init_tracing`] once to install a subscriber:
//! - `RUST_LOG` takes precedence over the level passed in
//! - JSON output for production, pretty output for development
//! - a second call is a no-op, so tests can call it freely

use std::fmt;
use std::str::FromStr;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt as tracing_fmt, EnvFilter};

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable, multi-line output
    #[default]
    Pretty,
    /// Compact single-line output
    Compact,
    /// One JSON object per line
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Compact => write!(f, "compact"),
            Self::Json => write!(f, "json"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" | "text" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Install the global tracing subscriber.
///
/// `default_level` is an `EnvFilter` directive (`"info"`,
/// `"bulwark_core=debug"`) used when `RUST_LOG` is unset or invalid.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_tracing(format: LogFormat, default_level: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);

    let result = match format {
        LogFormat::Pretty => registry.with(tracing_fmt::layer().pretty()).try_init(),
        LogFormat::Compact => registry.with(tracing_fmt::layer().compact()).try_init(),
        LogFormat::Json => {
            registry.with(tracing_fmt::layer().json().with_current_span(true)).try_init()
        }
    };

    result.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("json".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("PRETTY".parse::<LogFormat>(), Ok(LogFormat::Pretty));
        assert_eq!("text".parse::<LogFormat>(), Ok(LogFormat::Compact));
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_init_tracing_is_idempotent() {
        let _first = init_tracing(LogFormat::Compact, "debug");
        assert!(!init_tracing(LogFormat::Json, "info"), "second init must be a no-op");
    }
}
