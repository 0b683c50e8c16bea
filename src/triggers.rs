//! Trigger evaluator: windowed counts -> at-most-one notification per pair
//!
//! One `run_pass` is one evaluation cycle. The window starts where the last
//! *finished* run began and ends now; an unfinished run row means a watcher
//! crashed mid-pass, so its window is re-derived rather than trusted. Events
//! near a crash boundary may be evaluated twice; the per-(user, issue)
//! notification guard is what bounds the duplicate-notification risk.
//!
//! The pass is marked finished only after every notification was handed off,
//! so any failure leaves the crash signal in place.

use crate::store::{Issue, Store, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};

#[derive(Debug)]
pub struct NotifyError(pub String);

impl std::fmt::Display for NotifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Notification delivery failed: {}", self.0)
    }
}

impl std::error::Error for NotifyError {}

#[derive(Debug)]
pub enum TriggerError {
    Store(StoreError),
    Notify(NotifyError),
}

impl From<StoreError> for TriggerError {
    fn from(err: StoreError) -> Self {
        TriggerError::Store(err)
    }
}

impl From<NotifyError> for TriggerError {
    fn from(err: NotifyError) -> Self {
        TriggerError::Notify(err)
    }
}

impl std::fmt::Display for TriggerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerError::Store(e) => write!(f, "Evaluation storage error: {}", e),
            TriggerError::Notify(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for TriggerError {}

/// One (recipient, threshold) rule for an issue.
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    pub email: String,
    /// Minimum windowed event-count estimate that fires an alert.
    pub threshold: f64,
}

/// Supplies the subscriptions to evaluate for an issue. The mapping itself
/// (who watches what) is a collaborator; the evaluator only consumes it.
pub trait WatchPolicy: Send + Sync {
    fn subscriptions(&self, issue: &Issue) -> Vec<Subscription>;
}

/// Same subscriber set for every issue. What the watcher binary builds from
/// `NOTIFY_EMAILS` + `NOTIFY_THRESHOLD`.
pub struct StaticWatchPolicy {
    subscriptions: Vec<Subscription>,
}

impl StaticWatchPolicy {
    pub fn new(subscriptions: Vec<Subscription>) -> Self {
        Self { subscriptions }
    }
}

impl WatchPolicy for StaticWatchPolicy {
    fn subscriptions(&self, _issue: &Issue) -> Vec<Subscription> {
        self.subscriptions.clone()
    }
}

/// What gets handed to the delivery channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub email: String,
    pub fingerprint: String,
    pub message: String,
    pub event_count: f64,
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Hand off one notification. Delivery (and delivery retries) are the
    /// sink's concern; an error here aborts the pass unfinished.
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Logs each alert. Stand-in delivery channel for deployments without a
/// real sink wired up.
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        log::info!(
            "🚨 ALERT {} -> issue {} ({:.0} events): {}",
            notification.email,
            notification.fingerprint,
            notification.event_count,
            notification.message
        );
        Ok(())
    }
}

/// Records handed-off notifications for inspection in tests.
#[derive(Default, Clone)]
pub struct CollectingSink {
    sent: std::sync::Arc<std::sync::Mutex<Vec<Notification>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for CollectingSink {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PassSummary {
    /// Issues with bucket activity in the window.
    pub evaluated: usize,
    /// Notifications handed off this pass.
    pub notified: usize,
}

pub struct TriggerEvaluator {
    store: Store,
    policy: Box<dyn WatchPolicy>,
    sink: Box<dyn NotificationSink>,
    /// Window length when no finished run exists yet (first pass, or a
    /// deployment whose every prior pass crashed).
    default_lookback_secs: i64,
}

impl TriggerEvaluator {
    pub fn new(
        store: Store,
        policy: Box<dyn WatchPolicy>,
        sink: Box<dyn NotificationSink>,
        default_lookback_secs: i64,
    ) -> Self {
        Self {
            store,
            policy,
            sink,
            default_lookback_secs,
        }
    }

    /// Run one evaluation pass ending at `now` (unix seconds).
    pub async fn run_pass(&self, now: i64) -> Result<PassSummary, TriggerError> {
        let window_start = match self.store.last_finished_run()? {
            Some(run) => run.ran_at,
            None => now - self.default_lookback_secs,
        };

        let run_id = self.store.start_trigger_run(now)?;

        let start_date = to_date(window_start);
        let end_date = to_date(now);
        log::info!(
            "⏰ Trigger pass started (window: {} .. {})",
            start_date,
            end_date
        );

        let issue_ids = self
            .store
            .issue_ids_in_window(Some(start_date), Some(end_date))?;

        let mut summary = PassSummary {
            evaluated: 0,
            notified: 0,
        };

        for issue_id in issue_ids {
            let Some(issue) = self.store.get_issue_by_id(issue_id)? else {
                continue;
            };
            summary.evaluated += 1;

            let count = self
                .store
                .event_count(Some(issue_id), Some(start_date), Some(end_date))?;

            for subscription in self.policy.subscriptions(&issue) {
                if count < subscription.threshold {
                    continue;
                }

                let user_id = self.store.ensure_user(&subscription.email)?;
                if self.store.has_been_notified_about(user_id, issue_id)? {
                    continue;
                }

                self.sink
                    .notify(&Notification {
                        email: subscription.email.clone(),
                        fingerprint: issue.fingerprint.clone(),
                        message: issue.message.clone(),
                        event_count: count,
                    })
                    .await?;

                // Guard is set only after the hand-off succeeded: a crash in
                // between re-notifies rather than silently dropping.
                self.store.record_notification(user_id, issue_id, now)?;
                summary.notified += 1;
            }
        }

        self.store.finish_trigger_run(run_id)?;
        log::info!(
            "✅ Trigger pass finished: {} issues evaluated, {} notifications",
            summary.evaluated,
            summary.notified
        );
        Ok(summary)
    }
}

/// Calendar day containing a unix timestamp. Bucket granularity is daily, so
/// windows widen to whole days.
fn to_date(unix_secs: i64) -> NaiveDate {
    DateTime::from_timestamp(unix_secs, 0)
        .map(|dt| dt.date_naive())
        .unwrap_or_default()
}
