//! errflow - approximate error-event counting and alerting
//!
//! Ingests application error events from a queue, maintains one HyperLogLog
//! sketch per (issue, calendar day), and periodically compares windowed
//! distinct-event estimates against alert thresholds.
//!
//! Data flow:
//!
//! ```text
//! queue -> processor::listen() -> { issues, issue_buckets }
//!                                        ^
//!            triggers::TriggerEvaluator -+-> notification sink
//! ```
//!
//! Ingestion owns `issues` and `issue_buckets`; the evaluator owns
//! `user_issues` and `trigger_runs`. Sketch merges are atomic at the storage
//! layer, so any number of ingestion workers can share one database.

pub mod config;
pub mod errors;
pub mod events;
pub mod processor;
pub mod queues;
pub mod sketch;
pub mod store;
pub mod triggers;

pub use events::{parse_event, ParsedEvent, StackFrame};
pub use sketch::HyperLogLog;
pub use store::{Issue, Store};
