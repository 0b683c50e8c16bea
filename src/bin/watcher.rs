//! Trigger watcher entry point
//!
//! Runs evaluation passes on an interval (or once with RUN_ONCE=true),
//! comparing windowed event-count estimates against the configured threshold
//! and alerting each subscribed user at most once per issue.
//!
//! Exactly one watcher should run against a database: passes are serialized
//! by deployment, and an unfinished run row at startup means a previous
//! watcher crashed mid-pass.
//!
//! Usage:
//!   cargo run --release --bin watcher
//!
//! Environment variables: see `errflow::config::WatcherConfig`.

use chrono::Utc;
use dotenv::dotenv;
use errflow::config::WatcherConfig;
use errflow::store::Store;
use errflow::triggers::{LogSink, StaticWatchPolicy, Subscription, TriggerEvaluator};
use log::{error, info, warn};
use std::process::ExitCode;
use tokio::time::{interval, Duration};

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    env_logger::init();

    let config = WatcherConfig::from_env();

    info!("🚀 errflow watcher starting");
    info!("   ├─ Database: {}", config.db_path);
    info!("   ├─ Interval: {}s", config.trigger_interval_secs);
    info!("   ├─ Default lookback: {}s", config.default_lookback_secs);
    info!("   ├─ Threshold: {}", config.notify_threshold);
    info!("   └─ Recipients: {}", config.notify_emails.len());

    if config.notify_emails.is_empty() {
        warn!("⚠️  NOTIFY_EMAILS is empty, passes will evaluate but never alert");
    }

    let store = match Store::open(&config.db_path, &config.schema_dir) {
        Ok(store) => store,
        Err(e) => {
            error!("❌ Cannot open store: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match store.has_unfinished_run() {
        Ok(true) => warn!("⚠️  Unfinished trigger run found: a previous watcher crashed mid-pass"),
        Ok(false) => {}
        Err(e) => {
            error!("❌ Cannot read trigger runs: {}", e);
            return ExitCode::FAILURE;
        }
    }

    let subscriptions = config
        .notify_emails
        .iter()
        .map(|email| Subscription {
            email: email.clone(),
            threshold: config.notify_threshold,
        })
        .collect();

    let evaluator = TriggerEvaluator::new(
        store,
        Box::new(StaticWatchPolicy::new(subscriptions)),
        Box::new(LogSink),
        config.default_lookback_secs,
    );

    if config.run_once {
        return match evaluator.run_pass(Utc::now().timestamp()).await {
            Ok(_) => ExitCode::SUCCESS,
            Err(e) => {
                error!("❌ Trigger pass failed: {}", e);
                ExitCode::FAILURE
            }
        };
    }

    let mut timer = interval(Duration::from_secs(config.trigger_interval_secs));
    loop {
        timer.tick().await;

        // A failed pass stays unfinished and the next tick re-derives its
        // window from the last finished run.
        if let Err(e) = evaluator.run_pass(Utc::now().timestamp()).await {
            error!("❌ Trigger pass failed: {}", e);
        }
    }
}
