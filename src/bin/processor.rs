//! Ingestion worker entry point
//!
//! Pulls event batches from the configured queue backend and feeds them into
//! the issue registry and bucket store. Exits 0 only when the configured
//! message budget was exhausted without a fatal (non-message-level) failure.
//!
//! Usage:
//!   cargo run --release --bin processor
//!
//! Environment variables: see `errflow::config::ProcessorConfig`.

use dotenv::dotenv;
use errflow::config::ProcessorConfig;
use errflow::errors::LogReporter;
use errflow::processor::{listen, ListenOptions};
use errflow::queues::{FileQueueBackend, QueueBackend};
use errflow::store::Store;
use log::{error, info};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    env_logger::init();

    let config = ProcessorConfig::from_env();

    info!("🚀 errflow processor starting");
    info!("   ├─ Database: {}", config.db_path);
    info!("   ├─ Queue backend: {}", config.queue_backend);
    info!("   ├─ Batch size: {}", config.pull_batch_size);
    info!("   └─ Message budget: {}", config.worker_message_count);

    let store = match Store::open(&config.db_path, &config.schema_dir) {
        Ok(store) => store,
        Err(e) => {
            error!("❌ Cannot open store: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut queue: Box<dyn QueueBackend> = match config.queue_backend.as_str() {
        "file" => match FileQueueBackend::open(&config.queue_file_path).await {
            Ok(backend) => Box::new(backend),
            Err(e) => {
                error!("❌ Cannot open queue file {}: {}", config.queue_file_path, e);
                return ExitCode::FAILURE;
            }
        },
        other => {
            error!("❌ Unknown queue backend: {}", other);
            return ExitCode::FAILURE;
        }
    };

    let opts = ListenOptions {
        worker_message_count: config.worker_message_count,
        pull_batch_size: config.pull_batch_size,
    };

    match listen(queue.as_mut(), &store, &LogReporter, opts).await {
        Ok(summary) => {
            if summary.budget_exhausted(&opts) {
                ExitCode::SUCCESS
            } else {
                // Exit status signals an unexhausted budget so supervisors
                // can distinguish a drained source from a completed worker.
                info!(
                    "📭 Source drained after {} of {} messages",
                    summary.processed, opts.worker_message_count
                );
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            error!("❌ Worker aborted: {}", e);
            ExitCode::FAILURE
        }
    }
}
