//! Queue backends for the ingestion pipeline
//!
//! The transport itself is a collaborator: all the pipeline assumes is
//! pull-with-internal-timeout semantics and at-least-once delivery owned by
//! the transport. Two backends ship here: `StaticQueueBackend` (pre-seeded
//! batches, the test workhorse) and `FileQueueBackend` (newline-delimited
//! JSON drained from disk, enough to run the processor binary end to end).

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::path::Path;

#[derive(Debug)]
pub enum QueueError {
    Io(std::io::Error),
    Backend(String),
}

impl From<std::io::Error> for QueueError {
    fn from(err: std::io::Error) -> Self {
        QueueError::Io(err)
    }
}

impl std::fmt::Display for QueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueError::Io(e) => write!(f, "Queue IO error: {}", e),
            QueueError::Backend(e) => write!(f, "Queue backend error: {}", e),
        }
    }
}

impl std::error::Error for QueueError {}

#[async_trait]
pub trait QueueBackend: Send {
    /// Pull the next batch of raw payloads, at most `max_messages`.
    ///
    /// `Some(empty)` means no messages were available within the backend's
    /// internal timeout; it is not an error, and the caller should keep
    /// polling. `None` means the source has ended and no further pull can
    /// ever yield a message. Live transports never return `None`.
    async fn pull_batch(&mut self, max_messages: usize) -> Result<Option<Vec<Value>>, QueueError>;

    /// Backend name for logging.
    fn backend_type(&self) -> &'static str;
}

/// Serves pre-seeded batches in order, then reports the source as ended.
///
/// Batch boundaries are preserved (a seeded batch is never split unless the
/// caller asks for fewer messages than the batch holds), which lets tests
/// pin down exactly which delivery a worker stops at. A seeded empty batch
/// is served as an empty pull, which simulates a timeout on a live queue.
pub struct StaticQueueBackend {
    batches: VecDeque<Vec<Value>>,
}

impl StaticQueueBackend {
    pub fn new(batches: Vec<Vec<Value>>) -> Self {
        Self {
            batches: batches.into(),
        }
    }
}

#[async_trait]
impl QueueBackend for StaticQueueBackend {
    async fn pull_batch(&mut self, max_messages: usize) -> Result<Option<Vec<Value>>, QueueError> {
        let Some(batch) = self.batches.front_mut() else {
            return Ok(None);
        };

        if batch.len() <= max_messages {
            // Whole batch fits
            return Ok(Some(self.batches.pop_front().unwrap_or_default()));
        }

        let rest = batch.split_off(max_messages);
        let head = std::mem::replace(batch, rest);
        Ok(Some(head))
    }

    fn backend_type(&self) -> &'static str {
        "static"
    }
}

/// Drains newline-delimited JSON payloads from a file, serving them out in
/// `max_messages`-sized batches and reporting end-of-stream once the file is
/// exhausted. Lines that are not valid JSON are passed through as JSON
/// strings so the pipeline reports them as parse failures instead of
/// silently skipping them.
pub struct FileQueueBackend {
    pending: VecDeque<Value>,
}

impl FileQueueBackend {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, QueueError> {
        let contents = tokio::fs::read_to_string(path.as_ref()).await?;

        let pending = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| {
                serde_json::from_str(line).unwrap_or_else(|_| Value::String(line.to_string()))
            })
            .collect::<VecDeque<_>>();

        log::info!(
            "📥 Loaded {} queued payloads from {}",
            pending.len(),
            path.as_ref().display()
        );
        Ok(Self { pending })
    }
}

#[async_trait]
impl QueueBackend for FileQueueBackend {
    async fn pull_batch(&mut self, max_messages: usize) -> Result<Option<Vec<Value>>, QueueError> {
        if self.pending.is_empty() {
            return Ok(None);
        }
        let take = max_messages.min(self.pending.len());
        Ok(Some(self.pending.drain(..take).collect()))
    }

    fn backend_type(&self) -> &'static str {
        "file"
    }
}
