//! Shared value types

pub mod circuit;
pub mod dead_letter;
pub mod target;

pub use circuit::CircuitState;
pub use dead_letter::DeadLetterRecord;
pub use target::TargetId;
