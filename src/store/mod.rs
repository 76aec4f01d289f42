//! SQLite persistence for identities, observations and the two mapping tiers.
//!
//! Each repository borrows a [`Connection`] (or a transaction, which derefs to
//! one) and owns one table family:
//! - [`PlayerRepo`] for canonical identities
//! - [`ObservationRepo`] for sub-matches and observations
//! - [`OverrideRepo`] for per-observation corrections
//! - [`GlobalMappingRepo`] for coarse merge suggestions
//!
//! State changes go through [`Database::unit_of_work`], which wraps one
//! logical unit in an immediate transaction and retries on lock contention.

pub mod global_mappings;
pub mod migrations;
pub mod models;
pub mod observations;
pub mod overrides;
pub mod players;
pub mod retry;

use std::path::Path;
use std::time::Duration;

use rusqlite::functions::FunctionFlags;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::{debug, info};

use crate::constants;
use crate::error::AppError;

pub use global_mappings::{ApplyOutcome, GlobalMappingRepo, VerifyIssue};
pub use models::*;
pub use observations::{ActivePlayer, ObservationRepo, ResolutionRecord, RosterEntry};
pub use overrides::OverrideRepo;
pub use players::{PlayerRegistry, PlayerRepo, PlayerUsage};

/// Owned connection to the identity store.
pub struct Database {
    conn: Connection,
    max_attempts: u32,
}

impl Database {
    /// Opens (or creates) the database file and applies pending migrations.
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self, AppError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        debug!("Opened {} with journal_mode={mode}", path.display());
        info!("Using identity database at {}", path.display());
        Self::init(conn)
    }

    /// Opens a private in-memory database, mainly for tests and dry runs.
    pub fn open_in_memory() -> Result<Self, AppError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, AppError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        register_functions(&conn)?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn,
            max_attempts: constants::retry::MAX_ATTEMPTS,
        })
    }

    /// Overrides how many times a busy unit of work is attempted.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Read access for queries that do not need a transaction.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Runs `work` inside one immediate transaction, committing on success.
    ///
    /// Any error rolls the transaction back. Busy/locked errors restart the
    /// whole unit with backoff, so `work` must not have side effects outside
    /// the transaction.
    pub fn unit_of_work<T, F>(&mut self, label: &str, mut work: F) -> Result<T, AppError>
    where
        F: FnMut(&Transaction<'_>) -> Result<T, AppError>,
    {
        let conn = &mut self.conn;
        retry::with_retry(label, self.max_attempts, || {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let value = work(&tx)?;
            tx.commit()?;
            Ok(value)
        })
    }
}

/// Registers SQL helpers used by the repositories.
///
/// `fold_case` lowercases with full Unicode rules, unlike SQLite's built-in
/// `lower()` and `NOCASE` which only fold ASCII.
fn register_functions(conn: &Connection) -> Result<(), AppError> {
    conn.create_scalar_function(
        "fold_case",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let value = ctx.get::<Option<String>>(0)?;
            Ok(value.map(|s| s.to_lowercase()))
        },
    )?;
    Ok(())
}
