//! Issue registry: one row per deduplicated error group
//!
//! Ingestion upserts on every event: `last_seen` only ever advances
//! (max-commutative, so out-of-order delivery across workers is safe);
//! message, module, and stack frames are last-writer-wins because the newest
//! event's metadata is the most representative.

use super::{Store, StoreError};
use crate::events::StackFrame;
use rusqlite::{params, OptionalExtension, Row};

/// Canonical record for one error group.
#[derive(Debug, Clone, PartialEq)]
pub struct Issue {
    pub id: i64,
    pub fingerprint: String,
    /// Unix seconds of the newest event seen, never regresses.
    pub last_seen: Option<i64>,
    pub module: String,
    pub message: String,
    pub stack_frames: Vec<StackFrame>,
}

const ISSUE_COLUMNS: &str = "id, fingerprint, last_seen, module, message, stack_frames";

fn issue_from_row(row: &Row<'_>) -> rusqlite::Result<(Issue, String)> {
    let frames_json: String = row.get(5)?;
    Ok((
        Issue {
            id: row.get(0)?,
            fingerprint: row.get(1)?,
            last_seen: row.get(2)?,
            module: row.get(3)?,
            message: row.get(4)?,
            stack_frames: Vec::new(),
        },
        frames_json,
    ))
}

impl Store {
    /// Create or update the issue for a fingerprint.
    ///
    /// `last_seen` advances to `max(current, seen_at)`; metadata columns are
    /// overwritten unconditionally.
    pub fn upsert_issue(
        &self,
        fingerprint: &str,
        message: &str,
        module: &str,
        stack_frames: &[StackFrame],
        seen_at: i64,
    ) -> Result<Issue, StoreError> {
        let frames_json = serde_json::to_string(stack_frames)?;

        {
            let conn = self.conn();
            conn.execute(
                r#"
                INSERT INTO issues (fingerprint, last_seen, module, message, stack_frames)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(fingerprint) DO UPDATE SET
                    last_seen = CASE
                        WHEN issues.last_seen IS NULL OR excluded.last_seen > issues.last_seen
                        THEN excluded.last_seen
                        ELSE issues.last_seen
                    END,
                    module = excluded.module,
                    message = excluded.message,
                    stack_frames = excluded.stack_frames
                "#,
                params![fingerprint, seen_at, module, message, frames_json],
            )?;
        }

        self.get_issue(fingerprint)?
            .ok_or_else(|| StoreError::Schema(format!("Issue vanished after upsert: {}", fingerprint)))
    }

    pub fn get_issue(&self, fingerprint: &str) -> Result<Option<Issue>, StoreError> {
        let row = {
            let conn = self.conn();
            conn.query_row(
                &format!("SELECT {} FROM issues WHERE fingerprint = ?", ISSUE_COLUMNS),
                params![fingerprint],
                issue_from_row,
            )
            .optional()?
        };

        row.map(Self::hydrate_frames).transpose()
    }

    pub fn get_issue_by_id(&self, issue_id: i64) -> Result<Option<Issue>, StoreError> {
        let row = {
            let conn = self.conn();
            conn.query_row(
                &format!("SELECT {} FROM issues WHERE id = ?", ISSUE_COLUMNS),
                params![issue_id],
                issue_from_row,
            )
            .optional()?
        };

        row.map(Self::hydrate_frames).transpose()
    }

    /// Count one event occurrence for an issue: delegates to the bucket
    /// store's `record_event` for the event's calendar day.
    pub fn count_event(
        &self,
        issue: &Issue,
        element_id: &str,
        date: chrono::NaiveDate,
    ) -> Result<(), StoreError> {
        self.record_event(issue.id, date, element_id)
    }

    pub fn issue_exists(&self, fingerprint: &str) -> Result<bool, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT 1 FROM issues WHERE fingerprint = ?")?;
        Ok(stmt.exists(params![fingerprint])?)
    }

    fn hydrate_frames((mut issue, frames_json): (Issue, String)) -> Result<Issue, StoreError> {
        issue.stack_frames = serde_json::from_str(&frames_json)?;
        Ok(issue)
    }
}
