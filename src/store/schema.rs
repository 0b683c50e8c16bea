//! Idempotent schema migration loader
//!
//! Executes every `.sql` file in the schema directory in filename order
//! (`01_`, `02_`, ...). All files must use `IF NOT EXISTS` clauses so the
//! loader can run on every startup.

use super::StoreError;
use rusqlite::Connection;
use std::fs;
use std::path::Path;

/// Run all schema migrations from a directory of numbered `.sql` files.
///
/// Also switches the database to WAL mode, which the concurrent ingestion
/// workers depend on for non-blocking reads during bucket merges.
pub fn run_schema_migrations(conn: &mut Connection, schema_dir: &str) -> Result<(), StoreError> {
    let schema_path = Path::new(schema_dir);

    if !schema_path.exists() {
        return Err(StoreError::Schema(format!(
            "Schema directory not found: {}",
            schema_dir
        )));
    }

    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    let mut sql_files: Vec<_> = fs::read_dir(schema_path)
        .map_err(|e| StoreError::Schema(format!("Cannot read {}: {}", schema_dir, e)))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().extension().and_then(|s| s.to_str()) == Some("sql"))
        .collect();

    sql_files.sort_by_key(|entry| entry.file_name());

    log::info!("🔧 Running schema migrations from: {}", schema_dir);

    for entry in sql_files {
        let path = entry.path();
        let filename = path.file_name().unwrap_or_default().to_string_lossy().into_owned();

        let sql_content = fs::read_to_string(&path)
            .map_err(|e| StoreError::Schema(format!("Cannot read {}: {}", filename, e)))?;

        conn.execute_batch(&sql_content)?;
        log::debug!("   ├─ Applied: {}", filename);
    }

    log::info!("✅ Schema migrations complete");
    Ok(())
}
