//! Schema migrations.
//!
//! Numbered SQL files are embedded at compile time and applied once each,
//! tracked by the `schema_version` table.

use rusqlite::Connection;
use tracing::info;

use crate::error::AppError;

struct Migration {
    version: i32,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    sql: include_str!("migrations/001_baseline.sql"),
}];

fn ensure_schema_version_table(conn: &Connection) -> Result<(), AppError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;
    Ok(())
}

/// Highest applied migration version, or 0 for a fresh database.
pub fn current_version(conn: &Connection) -> Result<i32, AppError> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?)
}

/// Runs all pending migrations and returns how many were applied.
///
/// A database written by a newer build is refused instead of being
/// modified.
pub fn run_migrations(conn: &Connection) -> Result<usize, AppError> {
    ensure_schema_version_table(conn)?;

    let current = current_version(conn)?;
    let max_known = MIGRATIONS.last().map(|m| m.version).unwrap_or(0);
    if current > max_known {
        return Err(AppError::config_error(format!(
            "Database schema version ({current}) is newer than this build supports ({max_known})"
        )));
    }

    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > current).collect();
    for migration in &pending {
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(migration.sql)?;
        tx.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            [migration.version],
        )?;
        tx.commit()?;
        info!("Applied schema migration v{}", migration.version);
    }

    Ok(pending.len())
}
