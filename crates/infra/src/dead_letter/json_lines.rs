//! Append-only JSON Lines dead-letter file
//!
//! Each record is serialized as one JSON object followed by `\n`. Writes are
//! serialized through an async mutex so concurrent invokers never interleave
//! partial lines. The file is opened per write, which keeps the sink safe
//! against external rotation.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bulwark_core::{DeadLetterError, DeadLetterSink};
use bulwark_domain::DeadLetterRecord;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

#[derive(Debug)]
pub struct JsonLinesDeadLetterSink {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonLinesDeadLetterSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), write_lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DeadLetterSink for JsonLinesDeadLetterSink {
    async fn accept(&self, record: DeadLetterRecord) -> Result<(), DeadLetterError> {
        let mut line =
            serde_json::to_string(&record).map_err(|e| DeadLetterError::Encode(e.to_string()))?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&self.path).await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        tracing::debug!(
            path = %self.path.display(),
            id = %record.id,
            target = %record.target,
            "Dead letter appended"
        );
        Ok(())
    }
}
