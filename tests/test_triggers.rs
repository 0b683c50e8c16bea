//! End-to-end trigger evaluation: ingested events through to notifications.

use errflow::errors::CollectingReporter;
use errflow::processor::{listen, ListenOptions};
use errflow::queues::StaticQueueBackend;
use errflow::store::Store;
use errflow::triggers::{
    CollectingSink, StaticWatchPolicy, Subscription, TriggerEvaluator, WatchPolicy,
};
use serde_json::{json, Value};
use tempfile::NamedTempFile;

/// 2018-01-01 00:00:00 UTC.
const DAY1: i64 = 1_514_764_800;

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

fn evaluator_with(
    store: &Store,
    sink: CollectingSink,
    subscriptions: Vec<Subscription>,
) -> TriggerEvaluator {
    TriggerEvaluator::new(
        store.clone(),
        Box::new(StaticWatchPolicy::new(subscriptions)),
        Box::new(sink),
        3600,
    )
}

fn subscription(email: &str, threshold: f64) -> Subscription {
    Subscription {
        email: email.to_string(),
        threshold,
    }
}

async fn ingest(store: &Store, events: Vec<Value>) {
    let budget = events.len();
    let mut queue = StaticQueueBackend::new(vec![events]);
    let reporter = CollectingReporter::new();
    listen(
        &mut queue,
        store,
        &reporter,
        ListenOptions {
            worker_message_count: budget,
            pull_batch_size: 100,
        },
    )
    .await
    .unwrap();
    assert!(reporter.is_empty());
}

#[tokio::test]
async fn test_ingest_then_evaluate_notifies_once() {
    let (_temp, store) = test_store();
    let sink = CollectingSink::new();
    let evaluator = evaluator_with(&store, sink.clone(), vec![subscription("oncall@example.com", 3.0)]);

    ingest(
        &store,
        (0..5).map(|i| event(&format!("e{}", i), "fp-1")).collect(),
    )
    .await;

    let first = evaluator.run_pass(DAY1 + 600).await.unwrap();
    assert_eq!(first.notified, 1);

    // No new crossing: re-running must not re-notify
    let second = evaluator.run_pass(DAY1 + 1200).await.unwrap();
    assert_eq!(second.notified, 0);

    let sent = sink.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].fingerprint, "fp-1");
    assert_eq!(sent[0].event_count.round() as i64, 5);

    let user = store.ensure_user("oncall@example.com").unwrap();
    let issue = store.get_issue("fp-1").unwrap().unwrap();
    assert!(store.has_been_notified_about(user, issue.id).unwrap());
}

#[tokio::test]
async fn test_thresholds_are_per_subscription() {
    let (_temp, store) = test_store();
    let sink = CollectingSink::new();
    let evaluator = evaluator_with(
        &store,
        sink.clone(),
        vec![
            subscription("low@example.com", 2.0),
            subscription("high@example.com", 100.0),
        ],
    );

    ingest(
        &store,
        (0..5).map(|i| event(&format!("e{}", i), "fp-1")).collect(),
    )
    .await;

    let summary = evaluator.run_pass(DAY1 + 600).await.unwrap();
    assert_eq!(summary.notified, 1);

    let sent = sink.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].email, "low@example.com");
}

#[tokio::test]
async fn test_issues_below_threshold_ignored() {
    let (_temp, store) = test_store();
    let sink = CollectingSink::new();
    let evaluator = evaluator_with(&store, sink.clone(), vec![subscription("oncall@example.com", 10.0)]);

    ingest(
        &store,
        vec![event("e1", "fp-1"), event("e2", "fp-1")],
    )
    .await;

    let summary = evaluator.run_pass(DAY1 + 600).await.unwrap();
    assert_eq!(summary.evaluated, 1);
    assert_eq!(summary.notified, 0);
    assert!(sink.sent().is_empty());
}

#[tokio::test]
async fn test_per_issue_watch_policy() {
    // Policy that only watches one fingerprint
    struct SingleIssuePolicy;

    impl WatchPolicy for SingleIssuePolicy {
        fn subscriptions(&self, issue: &errflow::store::Issue) -> Vec<Subscription> {
            if issue.fingerprint == "watched" {
                vec![subscription("oncall@example.com", 1.0)]
            } else {
                Vec::new()
            }
        }
    }

    let (_temp, store) = test_store();
    let sink = CollectingSink::new();
    let evaluator = TriggerEvaluator::new(
        store.clone(),
        Box::new(SingleIssuePolicy),
        Box::new(sink.clone()),
        3600,
    );

    ingest(
        &store,
        vec![event("e1", "watched"), event("e2", "ignored")],
    )
    .await;

    let summary = evaluator.run_pass(DAY1 + 600).await.unwrap();
    assert_eq!(summary.evaluated, 2);
    assert_eq!(summary.notified, 1);
    assert_eq!(sink.sent()[0].fingerprint, "watched");
}

#[tokio::test]
async fn test_crash_recovery_window_double_evaluates_safely() {
    // Pass 1 finishes. A later pass crashes (simulated by an unfinished
    // row). The recovery pass re-derives its window from pass 1, re-sees
    // the same events, and the per-issue guard prevents duplicate alerts.
    let (_temp, store) = test_store();
    let sink = CollectingSink::new();
    let evaluator = evaluator_with(&store, sink.clone(), vec![subscription("oncall@example.com", 1.0)]);

    ingest(&store, vec![event("e1", "fp-1")]).await;

    evaluator.run_pass(DAY1 + 600).await.unwrap();
    assert_eq!(sink.sent().len(), 1);

    // Crashed pass
    store.start_trigger_run(DAY1 + 1200).unwrap();

    evaluator.run_pass(DAY1 + 1800).await.unwrap();
    assert_eq!(sink.sent().len(), 1, "recovery pass must not re-alert");
}
