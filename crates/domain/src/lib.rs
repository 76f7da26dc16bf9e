//! # Bulwark Domain
//!
//! Plain data for the Bulwark resilience layer.
//!
//! This crate contains:
//! - The layered [`ResilienceConfig`] tree, its partial overrides and
//!   environment profiles
//! - Configuration validation and the [`ConfigError`] type
//! - Shared value types ([`CircuitState`], [`TargetId`],
//!   [`DeadLetterRecord`])
//! - Default constants
//!
//! ## Architecture
//! - No dependencies on other Bulwark crates
//! - Only external dependencies allowed
//! - No I/O and no async

pub mod config;
pub mod constants;
pub mod errors;
pub mod macros;
pub mod types;
pub mod utils;

// Re-export commonly used items
pub use config::*;
pub use errors::*;
pub use types::*;
