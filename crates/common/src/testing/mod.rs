//! Testing utilities and helpers
//!
//! - **[`async_utils`]**: async waits and assertions that cooperate with
//!   paused tokio time
//! - **[`scripted`]**: scripted operations that fail and succeed in a fixed
//!   pattern
//!
//! ## Usage
//!
//! ```rust
//! # #[cfg(feature = "runtime")]
//! # {
//! use bulwark_common::testing::Script;
//!
//! let script: Script<u32, &str> = Script::fail_then_succeed(2, "transient", 42);
//! assert_eq!(script.calls(), 0);
//! # }
//! ```

pub mod async_utils;
pub mod scripted;

// Re-export commonly used items
// Note: macros exported with #[macro_export] are available at crate root
pub use async_utils::{poll_until, settle, timeout_ok};
pub use scripted::{Script, Step};
