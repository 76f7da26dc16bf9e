//! Dead-letter sink adapters
//!
//! Implementations of [`DeadLetterSink`](bulwark_core::DeadLetterSink):
//! - [`TracingDeadLetterSink`]: logs each record at `error` level
//! - [`InMemoryDeadLetterSink`]: bounded buffer for tests and inspection
//! - [`JsonLinesDeadLetterSink`]: appends one JSON object per line to a file

pub mod json_lines;
pub mod memory;
pub mod tracing_sink;

// Re-export commonly used items
pub use json_lines::JsonLinesDeadLetterSink;
pub use memory::InMemoryDeadLetterSink;
pub use tracing_sink::TracingDeadLetterSink;
