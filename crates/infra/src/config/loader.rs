//! Configuration loader
//!
//! Builds a [`ResilienceConfig`] from environment variables and an optional
//! TOML or JSON file.
//!
//! ## Loading Strategy
//! 1. A `.env` file, if present, is loaded into the process environment
//! 2. The config file is located (explicit `BULWARK_CONFIG_PATH`, otherwise
//!    probed) and parsed as the lower layer
//! 3. `BULWARK_*` environment variables form the upper layer and win over
//!    the file field by field
//! 4. The profile (env, then file, then `development`) is layered under
//!    both, and the result is validated
//!
//! ## Environment Variables
//! - `BULWARK_PROFILE`: `development`, `staging`, `production` or `test`
//! - `BULWARK_CONFIG_PATH`: explicit config file path
//! - `BULWARK_CB_FAILURE_THRESHOLD`, `BULWARK_CB_SUCCESS_THRESHOLD`,
//!   `BULWARK_CB_RESET_TIMEOUT_MS`, `BULWARK_CB_HALF_OPEN_MAX_CALLS`
//! - `BULWARK_BULKHEAD_MAX_CONCURRENT`, `BULWARK_BULKHEAD_MAX_QUEUE`,
//!   `BULWARK_BULKHEAD_QUEUE_TIMEOUT_MS`
//! - `BULWARK_TIMEOUT_ENABLED`, `BULWARK_TIMEOUT_MS`
//! - `BULWARK_RETRY_ATTEMPTS`, `BULWARK_RETRY_BACKOFF`,
//!   `BULWARK_RETRY_INITIAL_DELAY_MS`, `BULWARK_RETRY_MAX_DELAY_MS`,
//!   `BULWARK_RETRY_JITTER`
//! - `BULWARK_DEAD_LETTER_ENABLED`
//! - `BULWARK_TELEMETRY_ENABLED`, `BULWARK_TELEMETRY_SAMPLE_RATIO`
//!
//! ## File Format
//! The same tree as [`ResilienceConfigOverride`] plus an optional top-level
//! `profile` key:
//!
//! ```toml
//! profile = "production"
//!
//! [retry]
//! attempts = 5
//! backoff = "linear"
//!
//! [bulkhead]
//! max_concurrent = 32
//! ```
//!
//! ## File Locations
//! `bulwark.toml` then `bulwark.json`, in the working directory and up to two
//! parents, then next to the executable.

use std::path::{Path, PathBuf};

use bulwark_domain::constants::ENV_PREFIX;
use bulwark_domain::{
    BackoffKind, ConfigError, ConfigResult, Profile, ResilienceConfig, ResilienceConfigOverride,
};
use serde::Deserialize;

const FILE_NAMES: [&str; 2] = ["bulwark.toml", "bulwark.json"];

/// One configuration source: an optional profile plus a partial override.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigLayer {
    pub profile: Option<Profile>,
    pub overrides: ResilienceConfigOverride,
}

impl ConfigLayer {
    /// `top` wins wherever it sets the profile or a leaf.
    #[must_use]
    pub fn merge(&self, top: &Self) -> Self {
        Self {
            profile: top.profile.or(self.profile),
            overrides: self.overrides.merge(&top.overrides),
        }
    }

    /// Layer the profile and overrides over the base defaults and validate.
    pub fn resolve(&self) -> ConfigResult<ResilienceConfig> {
        ResilienceConfig::resolve(self.profile.unwrap_or_default(), &self.overrides)
    }
}

/// On-disk shape of a config file
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    profile: Option<String>,
    #[serde(flatten)]
    overrides: ResilienceConfigOverride,
}

/// Load configuration from every source.
///
/// A missing config file is not an error; an unreadable or invalid one is.
///
/// # Errors
/// Returns `ConfigError` if a variable or the file holds an invalid value or
/// the merged configuration fails validation.
pub fn load() -> ConfigResult<ResilienceConfig> {
    load_dotenv();

    let file = match config_path()? {
        Some(path) => read_file(&path)?,
        None => {
            tracing::debug!("No config file found, using environment and defaults");
            ConfigLayer::default()
        }
    };
    let env = read_env()?;

    let merged = file.merge(&env);
    let config = merged.resolve()?;
    tracing::info!(profile = %merged.profile.unwrap_or_default(), "Configuration loaded");
    Ok(config)
}

/// Load configuration from environment variables only.
///
/// # Errors
/// Returns `ConfigError` if a variable holds an invalid value.
pub fn load_from_env() -> ConfigResult<ResilienceConfig> {
    read_env()?.resolve()
}

/// Load configuration from a file only.
///
/// If `path` is `None`, probes the standard locations.
///
/// # Errors
/// Returns `ConfigError::NotFound` when no file exists, otherwise a parse,
/// I/O or validation error.
pub fn load_from_file(path: Option<PathBuf>) -> ConfigResult<ResilienceConfig> {
    let path = match path {
        Some(path) => path,
        None => probe_config_paths().ok_or_else(|| {
            ConfigError::NotFound("no bulwark.toml or bulwark.json in the standard locations".into())
        })?,
    };
    read_file(&path)?.resolve()
}

/// Read the `BULWARK_*` variables into a layer.
///
/// # Errors
/// Returns `ConfigError::Invalid` naming the variable when a value does not
/// parse, or `ConfigError::UnknownProfile`.
pub fn read_env() -> ConfigResult<ConfigLayer> {
    let mut layer = ConfigLayer {
        profile: env_string("PROFILE").map(|raw| raw.parse()).transpose()?,
        ..ConfigLayer::default()
    };
    let overrides = &mut layer.overrides;

    overrides.circuit_breaker.failure_threshold = env_i64("CB_FAILURE_THRESHOLD")?;
    overrides.circuit_breaker.success_threshold = env_i64("CB_SUCCESS_THRESHOLD")?;
    overrides.circuit_breaker.reset_timeout_ms = env_i64("CB_RESET_TIMEOUT_MS")?;
    overrides.circuit_breaker.half_open_max_calls = env_i64("CB_HALF_OPEN_MAX_CALLS")?;

    overrides.bulkhead.max_concurrent = env_i64("BULKHEAD_MAX_CONCURRENT")?;
    overrides.bulkhead.max_queue = env_i64("BULKHEAD_MAX_QUEUE")?;
    overrides.bulkhead.queue_timeout_ms = env_i64("BULKHEAD_QUEUE_TIMEOUT_MS")?;

    overrides.timeout.enabled = env_bool("TIMEOUT_ENABLED")?;
    overrides.timeout.timeout_ms = env_i64("TIMEOUT_MS")?;

    overrides.retry.attempts = env_i64("RETRY_ATTEMPTS")?;
    overrides.retry.backoff = env_parse::<BackoffKind>("RETRY_BACKOFF")?;
    overrides.retry.initial_delay_ms = env_i64("RETRY_INITIAL_DELAY_MS")?;
    overrides.retry.max_delay_ms = env_i64("RETRY_MAX_DELAY_MS")?;
    overrides.retry.jitter = env_parse::<f64>("RETRY_JITTER")?;

    overrides.dead_letter.enabled = env_bool("DEAD_LETTER_ENABLED")?;

    overrides.telemetry.enabled = env_bool("TELEMETRY_ENABLED")?;
    overrides.telemetry.sample_ratio = env_parse::<f64>("TELEMETRY_SAMPLE_RATIO")?;

    Ok(layer)
}

/// Read and parse one config file into a layer.
///
/// # Errors
/// Returns `ConfigError::NotFound`, `ConfigError::Io` or
/// `ConfigError::Parse`.
pub fn read_file(path: &Path) -> ConfigResult<ConfigLayer> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.display().to_string()));
    }

    tracing::info!(path = %path.display(), "Loading configuration from file");
    let contents = std::fs::read_to_string(path)
        .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;

    parse_layer(&contents, path)
}

/// Parse file contents; the format follows the extension (`.toml` or
/// `.json`).
fn parse_layer(contents: &str, path: &Path) -> ConfigResult<ConfigLayer> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    let file: ConfigFile = match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| ConfigError::Parse { format: "TOML", message: e.to_string() })?,
        "json" => serde_json::from_str(contents)
            .map_err(|e| ConfigError::Parse { format: "JSON", message: e.to_string() })?,
        other => {
            return Err(ConfigError::Parse {
                format: "unknown",
                message: format!("unsupported config extension `.{other}`"),
            })
        }
    };

    Ok(ConfigLayer {
        profile: file.profile.as_deref().map(str::parse).transpose()?,
        overrides: file.overrides,
    })
}

/// Probe the standard locations for a config file.
///
/// Returns the first existing candidate, or `None`.
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut candidates = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        for dir in cwd.ancestors().take(3) {
            candidates.extend(FILE_NAMES.iter().map(|name| dir.join(name)));
        }
    }

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            candidates.extend(FILE_NAMES.iter().map(|name| exe_dir.join(name)));
        }
    }

    candidates.into_iter().find(|path| path.exists())
}

/// `BULWARK_CONFIG_PATH` when set, otherwise the probed path.
fn config_path() -> ConfigResult<Option<PathBuf>> {
    match env_string("CONFIG_PATH") {
        Some(explicit) => {
            let path = PathBuf::from(explicit);
            if path.exists() {
                Ok(Some(path))
            } else {
                Err(ConfigError::NotFound(path.display().to_string()))
            }
        }
        None => Ok(probe_config_paths()),
    }
}

fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!(path = %path.display(), "Loaded .env file"),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!(error = %e, "Ignoring unreadable .env file"),
    }
}

fn env_key(suffix: &str) -> String {
    format!("{ENV_PREFIX}{suffix}")
}

/// Non-blank value of `BULWARK_{suffix}`.
fn env_string(suffix: &str) -> Option<String> {
    std::env::var(env_key(suffix)).ok().filter(|value| !value.trim().is_empty())
}

fn env_parse<T>(suffix: &str) -> ConfigResult<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    env_string(suffix)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| {
                ConfigError::invalid(env_key(suffix), format!("cannot parse {raw:?}: {e}"))
            })
        })
        .transpose()
}

fn env_i64(suffix: &str) -> ConfigResult<Option<i64>> {
    env_parse::<i64>(suffix)
}

/// Accepts `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off`
/// (case-insensitive).
fn env_bool(suffix: &str) -> ConfigResult<Option<bool>> {
    env_string(suffix)
        .map(|raw| match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::invalid(env_key(suffix), format!("expected a boolean (got {raw:?})"))),
        })
        .transpose()
}
