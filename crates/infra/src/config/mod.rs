//! Configuration loading
//!
//! Resolves a [`ResilienceConfig`](bulwark_domain::ResilienceConfig) from
//! environment variables and TOML or JSON files.

pub mod loader;

// Re-export commonly used items
pub use loader::{
    load, load_from_env, load_from_file, probe_config_paths, read_env, read_file, ConfigLayer,
};
