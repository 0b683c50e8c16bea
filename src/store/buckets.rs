//! Bucket store: per-(issue, day) cardinality sketches
//!
//! `record_event` is the hot path: get-or-create the bucket row, then merge
//! the event id into its sketch. The read-modify-write runs inside a single
//! IMMEDIATE transaction, which is what makes concurrent workers safe: two
//! workers merging into the same bucket serialize at the database, and
//! neither update is lost. A plain SELECT-then-UPDATE without the
//! transaction races and is wrong.
//!
//! Queries union matching sketches in memory (register-wise max commutes, so
//! scan order is irrelevant) and return harmonic-mean estimates.

use super::{Issue, Store, StoreError};
use crate::sketch::HyperLogLog;
use chrono::NaiveDate;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, TransactionBehavior};
use std::collections::hash_map::Entry;
use std::collections::HashMap;

/// Bucket date column format.
const DATE_FORMAT: &str = "%Y-%m-%d";

fn date_param(date: NaiveDate) -> SqlValue {
    SqlValue::Text(date.format(DATE_FORMAT).to_string())
}

/// Build a WHERE clause from optional issue/date filters. Date bounds are
/// inclusive on both ends.
fn bucket_filters(
    issue_id: Option<i64>,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
) -> (String, Vec<SqlValue>) {
    let mut where_clauses = Vec::new();
    let mut sql_params = Vec::new();

    if let Some(issue_id) = issue_id {
        where_clauses.push("issue_id = ?");
        sql_params.push(SqlValue::Integer(issue_id));
    }

    if let Some(start) = start_date {
        where_clauses.push("date >= ?");
        sql_params.push(date_param(start));
    }

    if let Some(end) = end_date {
        where_clauses.push("date <= ?");
        sql_params.push(date_param(end));
    }

    let where_query = if where_clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", where_clauses.join(" AND "))
    };

    (where_query, sql_params)
}

impl Store {
    /// Record one event into the (issue, date) bucket, creating the bucket
    /// with an empty sketch on first sight.
    pub fn record_event(
        &self,
        issue_id: i64,
        date: NaiveDate,
        element_id: &str,
    ) -> Result<(), StoreError> {
        let date_text = date.format(DATE_FORMAT).to_string();
        let mut conn = self.conn();

        // IMMEDIATE takes the write lock up front: the whole get-merge-write
        // is atomic with respect to other connections.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let empty = HyperLogLog::new(self.precision())?;
        tx.execute(
            "INSERT OR IGNORE INTO issue_buckets (issue_id, date, count_set) VALUES (?, ?, ?)",
            params![issue_id, date_text, empty.to_bytes()],
        )?;

        let blob: Vec<u8> = tx.query_row(
            "SELECT count_set FROM issue_buckets WHERE issue_id = ? AND date = ?",
            params![issue_id, date_text],
            |row| row.get(0),
        )?;

        let mut sketch = HyperLogLog::from_bytes(&blob)?;
        sketch.insert(element_id.as_bytes());

        tx.execute(
            "UPDATE issue_buckets SET count_set = ? WHERE issue_id = ? AND date = ?",
            params![sketch.to_bytes(), issue_id, date_text],
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Approximate distinct-event count over all buckets matching the
    /// filters. No matching buckets estimates to 0.
    pub fn event_count(
        &self,
        issue_id: Option<i64>,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Result<f64, StoreError> {
        let (where_query, sql_params) = bucket_filters(issue_id, start_date, end_date);
        let query = format!("SELECT count_set FROM issue_buckets{}", where_query);

        let conn = self.conn();
        let mut stmt = conn.prepare(&query)?;
        let mut rows = stmt.query(params_from_iter(sql_params))?;

        let mut union: Option<HyperLogLog> = None;
        while let Some(row) = rows.next()? {
            let blob: Vec<u8> = row.get(0)?;
            let sketch = HyperLogLog::from_bytes(&blob)?;
            match union {
                Some(ref mut acc) => acc.merge(&sketch)?,
                None => union = Some(sketch),
            }
        }

        Ok(union.map(|s| s.estimate()).unwrap_or(0.0))
    }

    /// Per-issue event counts over a date range, ranked descending.
    /// The dashboard/evaluator top-N query.
    pub fn top_issues(
        &self,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
        limit: usize,
    ) -> Result<Vec<(f64, Issue)>, StoreError> {
        let (where_query, sql_params) = bucket_filters(None, start_date, end_date);
        let query = format!("SELECT issue_id, count_set FROM issue_buckets{}", where_query);

        let mut unions: HashMap<i64, HyperLogLog> = HashMap::new();
        {
            let conn = self.conn();
            let mut stmt = conn.prepare(&query)?;
            let mut rows = stmt.query(params_from_iter(sql_params))?;

            while let Some(row) = rows.next()? {
                let issue_id: i64 = row.get(0)?;
                let blob: Vec<u8> = row.get(1)?;
                let sketch = HyperLogLog::from_bytes(&blob)?;
                match unions.entry(issue_id) {
                    Entry::Occupied(mut entry) => entry.get_mut().merge(&sketch)?,
                    Entry::Vacant(entry) => {
                        entry.insert(sketch);
                    }
                }
            }
        }

        let mut ranked: Vec<(f64, i64)> = unions
            .into_iter()
            .map(|(issue_id, sketch)| (sketch.estimate(), issue_id))
            .collect();
        ranked.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(limit);

        let mut results = Vec::with_capacity(ranked.len());
        for (estimate, issue_id) in ranked {
            if let Some(issue) = self.get_issue_by_id(issue_id)? {
                results.push((estimate, issue));
            }
        }
        Ok(results)
    }

    /// Distinct issue ids with at least one bucket in the window. The
    /// evaluator scans these instead of every issue ever seen.
    pub fn issue_ids_in_window(
        &self,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Result<Vec<i64>, StoreError> {
        let (where_query, sql_params) = bucket_filters(None, start_date, end_date);
        let query = format!(
            "SELECT DISTINCT issue_id FROM issue_buckets{} ORDER BY issue_id",
            where_query
        );

        let conn = self.conn();
        let mut stmt = conn.prepare(&query)?;
        let ids = stmt
            .query_map(params_from_iter(sql_params), |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(ids)
    }
}
