//! Per-message error capture for the ingestion pipeline
//!
//! Every failed message produces exactly one `ProcessingError` carrying the
//! raw payload and the underlying cause, so a dropped event can be diagnosed
//! offline. The reporter is a seam: production uses `LogReporter`, tests use
//! `CollectingReporter` to assert on what was dropped.

use serde_json::Value;
use std::sync::{Arc, Mutex};

/// Fixed label on every ingestion failure, whatever the cause.
pub const PROCESSING_ERROR_MESSAGE: &str = "Error processing event";

#[derive(Debug, Clone)]
pub struct ProcessingError {
    /// Always `PROCESSING_ERROR_MESSAGE`; kept as a field so reports are
    /// self-describing once they leave the process.
    pub message: &'static str,
    /// The raw payload as delivered by the queue.
    pub payload: Value,
    /// Underlying cause (parse, validation, or storage failure).
    pub cause: String,
}

impl ProcessingError {
    pub fn new(payload: Value, cause: impl std::fmt::Display) -> Self {
        Self {
            message: PROCESSING_ERROR_MESSAGE,
            payload,
            cause: cause.to_string(),
        }
    }
}

pub trait ErrorReporter: Send + Sync {
    fn report(&self, error: ProcessingError);
}

/// Production reporter: one error line per dropped message, payload included.
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, error: ProcessingError) {
        log::error!(
            "❌ {}: {} (payload: {})",
            error.message,
            error.cause,
            error.payload
        );
    }
}

/// Collects reported errors for inspection. Shared via `Arc`, so the same
/// collector can be handed to the pipeline and read afterwards.
#[derive(Default, Clone)]
pub struct CollectingReporter {
    errors: Arc<Mutex<Vec<ProcessingError>>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn errors(&self) -> Vec<ProcessingError> {
        self.errors.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.errors.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ErrorReporter for CollectingReporter {
    fn report(&self, error: ProcessingError) {
        self.errors.lock().unwrap().push(error);
    }
}
