//! SQLite-backed storage for issues, buckets, and notification state
//!
//! One `Store` handle wraps a single connection behind a mutex; clones share
//! the connection, which is how the ingestion workers and the trigger
//! evaluator see consistent state. All sketch merges happen inside IMMEDIATE
//! transactions (see `buckets`), so no lock is ever held across an await and
//! concurrent bucket updates cannot lose inserts.
//!
//! Table ownership mirrors the pipeline split: ingestion writes `issues` and
//! `issue_buckets`; the evaluator writes `user_issues` and `trigger_runs`.

mod alerts;
mod buckets;
mod issues;
mod schema;

pub use alerts::TriggerRunRecord;
pub use issues::Issue;
pub use schema::run_schema_migrations;

use crate::sketch::{SketchError, DEFAULT_PRECISION};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(Debug)]
pub enum StoreError {
    Database(rusqlite::Error),
    Sketch(SketchError),
    Json(serde_json::Error),
    Schema(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(err)
    }
}

impl From<SketchError> for StoreError {
    fn from(err: SketchError) -> Self {
        StoreError::Sketch(err)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Json(err)
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Database(e) => write!(f, "Database error: {}", e),
            StoreError::Sketch(e) => write!(f, "Sketch error: {}", e),
            StoreError::Json(e) => write!(f, "JSON error: {}", e),
            StoreError::Schema(e) => write!(f, "Schema error: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

/// Shared storage handle. Cheap to clone; all clones serialize on one
/// connection, and cross-process writers serialize through SQLite itself.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    /// Register precision for newly created bucket sketches. Fixed per
    /// deployment: sketches of different precision cannot be unioned.
    precision: u8,
}

impl Store {
    /// Open (or create) the database and apply schema migrations.
    pub fn open(db_path: impl AsRef<Path>, schema_dir: &str) -> Result<Self, StoreError> {
        Self::open_with_precision(db_path, schema_dir, DEFAULT_PRECISION)
    }

    /// Open with an explicit sketch precision. Tests use a lower precision
    /// to keep bucket blobs small.
    pub fn open_with_precision(
        db_path: impl AsRef<Path>,
        schema_dir: &str,
        precision: u8,
    ) -> Result<Self, StoreError> {
        let mut conn = Connection::open(db_path)?;
        // Set before migrations run: two processes opening the same database
        // at once must retry, not fail, when the other holds the write lock
        // mid-migration.
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        run_schema_migrations(&mut conn, schema_dir)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            precision,
        })
    }

    pub fn precision(&self) -> u8 {
        self.precision
    }

    pub(crate) fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }
}
