use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::BatchSource;
use crate::engine::Command;
use crate::normalizer::RawRecord;
use crate::types::Strategy;

/// Keys under which a wrapper object may hold its record array
const BATCH_KEYS: &[&str] = &["data", "records", "values", "rows"];

/// Tails a JSON-lines file of record batches.
///
/// Every complete line is one batch or one control line. The read offset
/// is kept between polls; a file that shrinks is read again from the start.
pub struct FileBatchSource {
    path: PathBuf,
    offset: u64,
    /// Bytes after the last newline, waiting for the rest of their line
    pending: Vec<u8>,
    interval: Duration,
}

impl FileBatchSource {
    pub fn new(path: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            path: path.into(),
            offset: 0,
            pending: Vec::new(),
            interval,
        }
    }

    /// Append bytes written since the last poll to `pending`.
    async fn read_new(&mut self) -> Result<()> {
        let len = tokio::fs::metadata(&self.path)
            .await
            .with_context(|| format!("Failed to stat {}", self.path.display()))?
            .len();

        if len < self.offset {
            tracing::info!(path = %self.path.display(), "Batch file truncated, reading from start");
            self.offset = 0;
            self.pending.clear();
        }
        if len == self.offset {
            return Ok(());
        }

        let mut file = tokio::fs::File::open(&self.path)
            .await
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        file.seek(std::io::SeekFrom::Start(self.offset)).await?;
        let read = file.read_to_end(&mut self.pending).await?;
        self.offset += read as u64;
        Ok(())
    }
}

#[async_trait]
impl BatchSource for FileBatchSource {
    fn name(&self) -> &str {
        "batches"
    }

    async fn poll(&mut self) -> Result<Vec<Command>> {
        self.read_new().await?;

        let mut commands = Vec::new();
        while let Some(end) = self.pending.iter().position(|b| *b == b'\n') {
            let bytes: Vec<u8> = self.pending.drain(..=end).collect();
            let line = String::from_utf8_lossy(&bytes);
            match parse_line(&line) {
                Ok(Some(command)) => commands.push(command),
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "Skipping malformed batch line"),
            }
        }
        Ok(commands)
    }

    fn interval(&self) -> Duration {
        self.interval
    }
}

/// Parse one line into a command. Blank lines yield nothing.
pub fn parse_line(line: &str) -> Result<Option<Command>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let value: Value = serde_json::from_str(line).context("Invalid JSON")?;

    match value {
        Value::Array(items) => Ok(Some(Command::Batch(collect_records(items)))),
        Value::Object(mut map) => {
            if let Some(strategy) = map.get("strategy").and_then(Value::as_str) {
                return Ok(Some(Command::SelectStrategy(strategy.parse::<Strategy>()?)));
            }
            if map.contains_key("subject") {
                return Ok(Some(Command::ResetSubject));
            }
            for key in BATCH_KEYS {
                let wraps_records = matches!(
                    map.get(*key),
                    Some(Value::Array(items)) if items.iter().all(Value::is_object)
                );
                if wraps_records {
                    if let Some(Value::Array(items)) = map.remove(*key) {
                        return Ok(Some(Command::Batch(collect_records(items))));
                    }
                }
            }
            Ok(Some(Command::Batch(vec![map])))
        }
        other => bail!("Expected a record, an array of records or a control line, got {other}"),
    }
}

fn collect_records(items: Vec<Value>) -> Vec<RawRecord> {
    items
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .collect()
}
