//! Users, per-(user, issue) notification state, and trigger run bookkeeping
//!
//! Only the trigger evaluator writes here. The `user_issues` row is the
//! notification guard: once `last_notified` is set for a pair, that user is
//! never alerted about that issue again. `trigger_runs` is the evaluator's
//! persisted cursor: the next pass starts where the last *finished* run
//! began, and an unfinished row is a crash signal, not an evaluation
//! boundary.

use super::{Store, StoreError};
use rusqlite::{params, OptionalExtension};

/// One evaluator pass, as persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerRunRecord {
    pub id: i64,
    pub ran_at: i64,
    pub finished: bool,
}

impl Store {
    /// Get-or-create a user by unique email.
    pub fn ensure_user(&self, email: &str) -> Result<i64, StoreError> {
        let conn = self.conn();
        conn.execute("INSERT OR IGNORE INTO users (email) VALUES (?)", params![email])?;
        let id = conn.query_row(
            "SELECT id FROM users WHERE email = ?",
            params![email],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// True iff a user_issues row exists for the pair with a non-null
    /// `last_notified`.
    pub fn has_been_notified_about(&self, user_id: i64, issue_id: i64) -> Result<bool, StoreError> {
        let conn = self.conn();
        let last_notified: Option<Option<i64>> = conn
            .query_row(
                "SELECT last_notified FROM user_issues WHERE user_id = ? AND issue_id = ?",
                params![user_id, issue_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(matches!(last_notified, Some(Some(_))))
    }

    /// Record that a notification was handed off for this pair.
    pub fn record_notification(
        &self,
        user_id: i64,
        issue_id: i64,
        now: i64,
    ) -> Result<(), StoreError> {
        let conn = self.conn();
        conn.execute(
            r#"
            INSERT INTO user_issues (user_id, issue_id, last_notified)
            VALUES (?, ?, ?)
            ON CONFLICT(user_id, issue_id) DO UPDATE SET
                last_notified = excluded.last_notified
            "#,
            params![user_id, issue_id, now],
        )?;
        Ok(())
    }

    /// Begin a trigger pass: insert an unfinished run row.
    pub fn start_trigger_run(&self, now: i64) -> Result<i64, StoreError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO trigger_runs (ran_at, finished) VALUES (?, 0)",
            params![now],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Mark a pass complete. Only called after every notification for the
    /// pass was handed off.
    pub fn finish_trigger_run(&self, run_id: i64) -> Result<(), StoreError> {
        let conn = self.conn();
        conn.execute(
            "UPDATE trigger_runs SET finished = 1 WHERE id = ?",
            params![run_id],
        )?;
        Ok(())
    }

    /// `ran_at` of the newest finished run, if any. Unfinished runs are
    /// inconclusive and never used as a window boundary.
    pub fn last_finished_run(&self) -> Result<Option<TriggerRunRecord>, StoreError> {
        let conn = self.conn();
        let run = conn
            .query_row(
                "SELECT id, ran_at, finished FROM trigger_runs
                 WHERE finished = 1 ORDER BY ran_at DESC, id DESC LIMIT 1",
                [],
                |row| {
                    Ok(TriggerRunRecord {
                        id: row.get(0)?,
                        ran_at: row.get(1)?,
                        finished: row.get::<_, i64>(2)? != 0,
                    })
                },
            )
            .optional()?;
        Ok(run)
    }

    /// Crash signal: an unfinished run other than the one in flight means a
    /// previous watcher died mid-pass.
    pub fn has_unfinished_run(&self) -> Result<bool, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT 1 FROM trigger_runs WHERE finished = 0")?;
        Ok(stmt.exists([])?)
    }
}
