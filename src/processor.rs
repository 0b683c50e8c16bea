//! Ingestion pipeline: queue batches -> issue registry + bucket store
//!
//! One `listen` call is one worker lifetime. The worker pulls bounded
//! batches, processes messages in delivered order, and stops after exactly
//! `worker_message_count` attempted messages; failures count, so the budget
//! bounds the worker's lifetime regardless of input quality.
//!
//! Failure isolation is per message: a parse, validation, or storage failure
//! drops that message, reports one `ProcessingError`, and moves on. Only a
//! queue-backend failure (cannot pull at all) is fatal to the worker.

use crate::errors::{ErrorReporter, ProcessingError};
use crate::events::parse_event;
use crate::queues::{QueueBackend, QueueError};
use crate::store::Store;
use serde_json::Value;

#[derive(Debug)]
pub enum ProcessorError {
    Queue(QueueError),
}

impl From<QueueError> for ProcessorError {
    fn from(err: QueueError) -> Self {
        ProcessorError::Queue(err)
    }
}

impl std::fmt::Display for ProcessorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessorError::Queue(e) => write!(f, "Fatal queue failure: {}", e),
        }
    }
}

impl std::error::Error for ProcessorError {}

#[derive(Debug, Clone, Copy)]
pub struct ListenOptions {
    /// Total attempted messages (successes + failures) before the worker
    /// terminates.
    pub worker_message_count: usize,
    /// Maximum messages requested per queue pull.
    pub pull_batch_size: usize,
}

impl Default for ListenOptions {
    fn default() -> Self {
        Self {
            worker_message_count: 200,
            pull_batch_size: 10,
        }
    }
}

/// What a worker did before terminating.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ListenSummary {
    /// Messages attempted (successes + failures).
    pub processed: usize,
    /// Messages dropped and reported.
    pub failed: usize,
}

impl ListenSummary {
    /// True when the worker spent its whole message budget (the expected
    /// exit for a live queue; a drained source ends early).
    pub fn budget_exhausted(&self, opts: &ListenOptions) -> bool {
        self.processed >= opts.worker_message_count
    }
}

/// Run one ingestion worker until its message budget is spent, or until the
/// backend reports the source has ended. Empty pulls are backend timeouts on
/// a live queue and never terminate the worker on their own.
pub async fn listen(
    queue: &mut dyn QueueBackend,
    store: &Store,
    reporter: &dyn ErrorReporter,
    opts: ListenOptions,
) -> Result<ListenSummary, ProcessorError> {
    log::info!(
        "🚀 Ingestion worker started (backend: {}, budget: {} messages, batch: {})",
        queue.backend_type(),
        opts.worker_message_count,
        opts.pull_batch_size
    );

    let mut summary = ListenSummary {
        processed: 0,
        failed: 0,
    };

    while summary.processed < opts.worker_message_count {
        // Never pull more than the budget has room for: the (N+1)th message
        // must not even be requested.
        let remaining = opts.worker_message_count - summary.processed;
        let Some(batch) = queue.pull_batch(opts.pull_batch_size.min(remaining)).await? else {
            log::info!("📭 Queue source ended, worker stopping early");
            break;
        };

        for payload in batch {
            if let Err(cause) = process_message(store, &payload) {
                reporter.report(ProcessingError::new(payload, cause));
                summary.failed += 1;
            }
            summary.processed += 1;
        }
    }

    log::info!(
        "✅ Ingestion worker finished: {} processed, {} failed",
        summary.processed,
        summary.failed
    );
    Ok(summary)
}

/// Parse, upsert the issue, and count the event into its daily bucket.
/// Any failure fails this message only.
fn process_message(store: &Store, payload: &Value) -> Result<(), Box<dyn std::error::Error>> {
    let event = parse_event(payload)?;

    let issue = store.upsert_issue(
        &event.fingerprint,
        &event.message,
        &event.module,
        &event.stack_frames,
        event.date_received.timestamp(),
    )?;

    store.count_event(&issue, &event.id, event.received_date())?;

    log::debug!(
        "📊 Counted event {} for issue {} on {}",
        event.id,
        event.fingerprint,
        event.received_date()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::CollectingReporter;
    use crate::queues::StaticQueueBackend;
    use serde_json::json;
    use tempfile::NamedTempFile;

    fn test_store() -> (NamedTempFile, Store) {
        let temp_file = NamedTempFile::new().unwrap();
        let store = Store::open_with_precision(temp_file.path(), "sql", 10).unwrap();
        (temp_file, store)
    }

    fn event(event_id: &str, group_id: &str) -> Value {
        json!({
            "eventID": event_id,
            "groupID": group_id,
            "message": "Error: fake error",
            "dateReceived": "2018-01-01T00:00:00.000Z",
            "entries": []
        })
    }

    #[tokio::test]
    async fn test_listen_drained_source_stops() {
        let (_temp, store) = test_store();
        let reporter = CollectingReporter::new();
        let mut queue = StaticQueueBackend::new(vec![vec![event("e1", "fp-1")]]);

        let summary = listen(
            &mut queue,
            &store,
            &reporter,
            ListenOptions {
                worker_message_count: 100,
                pull_batch_size: 10,
            },
        )
        .await
        .unwrap();

        assert_eq!(summary.processed, 1);
        assert_eq!(summary.failed, 0);
        assert!(!summary.budget_exhausted(&ListenOptions {
            worker_message_count: 100,
            pull_batch_size: 10,
        }));
        assert!(store.issue_exists("fp-1").unwrap());
    }

    #[tokio::test]
    async fn test_listen_survives_idle_pulls() {
        // Two idle pulls (backend timeouts) before a message arrives: the
        // worker keeps polling and still spends its budget on the late
        // message instead of treating the idle queue as drained.
        let (_temp, store) = test_store();
        let reporter = CollectingReporter::new();
        let mut queue =
            StaticQueueBackend::new(vec![vec![], vec![], vec![event("e1", "fp-1")]]);

        let opts = ListenOptions {
            worker_message_count: 1,
            pull_batch_size: 10,
        };
        let summary = listen(&mut queue, &store, &reporter, opts).await.unwrap();

        assert_eq!(summary.processed, 1);
        assert_eq!(summary.failed, 0);
        assert!(summary.budget_exhausted(&opts));
        assert!(store.issue_exists("fp-1").unwrap());
    }

    #[tokio::test]
    async fn test_storage_failure_is_message_level() {
        // Corrupt bucket blob: upsert succeeds, record_event fails, and the
        // message is reported instead of aborting the worker.
        let (_temp, store) = test_store();
        let reporter = CollectingReporter::new();

        let issue = store.upsert_issue("fp-1", "m", "mod", &[], 0).unwrap();
        store
            .conn()
            .execute(
                "INSERT INTO issue_buckets (issue_id, date, count_set) VALUES (?, '2018-01-01', X'FF')",
                rusqlite::params![issue.id],
            )
            .unwrap();

        let mut queue = StaticQueueBackend::new(vec![vec![
            event("e1", "fp-1"),
            event("e2", "fp-2"),
        ]]);

        let summary = listen(&mut queue, &store, &reporter, ListenOptions::default())
            .await
            .unwrap();

        assert_eq!(summary.processed, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(reporter.len(), 1);
        // The healthy message after the failure still landed
        assert!(store.issue_exists("fp-2").unwrap());
    }
}
