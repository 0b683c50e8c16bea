//! Runtime configuration from environment variables

use std::env;

/// Configuration for the ingestion worker binary.
///
/// Environment variables:
/// - `ERRFLOW_DB_PATH` (default: /var/lib/errflow/errflow.db)
/// - `ERRFLOW_SCHEMA_DIR` (default: sql)
/// - `QUEUE_BACKEND` (default: file)
/// - `QUEUE_FILE_PATH` (default: events.jsonl)
/// - `PULL_BATCH_SIZE` (default: 10)
/// - `WORKER_MESSAGE_COUNT` (default: 200)
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub db_path: String,
    pub schema_dir: String,
    pub queue_backend: String,
    pub queue_file_path: String,
    pub pull_batch_size: usize,
    pub worker_message_count: usize,
}

impl ProcessorConfig {
    pub fn from_env() -> Self {
        Self {
            db_path: env::var("ERRFLOW_DB_PATH")
                .unwrap_or_else(|_| "/var/lib/errflow/errflow.db".to_string()),

            schema_dir: env::var("ERRFLOW_SCHEMA_DIR").unwrap_or_else(|_| "sql".to_string()),

            queue_backend: env::var("QUEUE_BACKEND").unwrap_or_else(|_| "file".to_string()),

            queue_file_path: env::var("QUEUE_FILE_PATH")
                .unwrap_or_else(|_| "events.jsonl".to_string()),

            pull_batch_size: env::var("PULL_BATCH_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),

            worker_message_count: env::var("WORKER_MESSAGE_COUNT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(200),
        }
    }
}

/// Configuration for the trigger watcher binary.
///
/// Environment variables:
/// - `ERRFLOW_DB_PATH`, `ERRFLOW_SCHEMA_DIR` (as above)
/// - `TRIGGER_INTERVAL_SECS` (default: 300)
/// - `DEFAULT_LOOKBACK_SECS` (default: 3600)
/// - `NOTIFY_EMAILS` (comma-separated, default: empty)
/// - `NOTIFY_THRESHOLD` (default: 1.0)
/// - `RUN_ONCE` (default: false)
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub db_path: String,
    pub schema_dir: String,
    pub trigger_interval_secs: u64,
    pub default_lookback_secs: i64,
    pub notify_emails: Vec<String>,
    pub notify_threshold: f64,
    pub run_once: bool,
}

impl WatcherConfig {
    pub fn from_env() -> Self {
        Self {
            db_path: env::var("ERRFLOW_DB_PATH")
                .unwrap_or_else(|_| "/var/lib/errflow/errflow.db".to_string()),

            schema_dir: env::var("ERRFLOW_SCHEMA_DIR").unwrap_or_else(|_| "sql".to_string()),

            trigger_interval_secs: env::var("TRIGGER_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(300),

            default_lookback_secs: env::var("DEFAULT_LOOKBACK_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3600),

            notify_emails: env::var("NOTIFY_EMAILS")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),

            notify_threshold: env::var("NOTIFY_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1.0),

            run_once: env::var("RUN_ONCE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(false),
        }
    }
}
