//! Dead-letter records
//!
//! A [`DeadLetterRecord`] is produced once per invocation that executed its
//! work and still failed terminally. The record is handed to an external
//! sink; the resilience core never reads it back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::TargetId;

/// A terminally failed invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    /// Unique, time-ordered record id (UUID v7)
    pub id: Uuid,
    /// Target the call was protected against
    pub target: TargetId,
    /// Caller-supplied call identity
    pub call_id: String,
    /// Display form of the final error (the last one observed)
    pub error: String,
    /// Number of tries made, the first one included
    pub attempts: u32,
    /// Every error observed, oldest first. The last entry matches `error`.
    #[serde(default)]
    pub history: Vec<String>,
    /// When the invocation gave up
    pub failed_at: DateTime<Utc>,
}

impl DeadLetterRecord {
    pub fn new(
        target: TargetId,
        call_id: impl Into<String>,
        error: impl Into<String>,
        attempts: u32,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            target,
            call_id: call_id.into(),
            error: error.into(),
            attempts,
            history: Vec::new(),
            failed_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_history(mut self, history: Vec<String>) -> Self {
        self.history = history;
        self
    }

    #[must_use]
    pub fn failed_at(mut self, at: DateTime<Utc>) -> Self {
        self.failed_at = at;
        self
    }
}
