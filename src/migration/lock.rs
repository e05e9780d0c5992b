//! Table-based migration lock (`outlay_migration_lock`)
//!
//! The lock is a single row with the fixed key `1`. Whoever inserts it holds
//! the lock; absence of the row means unlocked. Acquisition polls with
//! `INSERT ... ON CONFLICT DO NOTHING` so it works the same on SQLite and
//! PostgreSQL without advisory-lock support.

use crate::cancel::CancelToken;
use crate::executor::{DbError, Executor};
use crate::migration::ledger::{parse_timestamp, table_exists};
use crate::migration::{MigrationError, Operation};
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

pub const LOCK_TABLE: &str = "outlay_migration_lock";

/// Key of the single lock row; bound as INT8, hence the `BIGINT` column
const LOCK_KEY: i64 = 1;

/// Delay between two acquisition attempts
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Bound for a single acquisition attempt, so a wedged insert cannot outlive the caller's timeout
const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);

const CREATE_LOCK_SQL: &str = r"
    CREATE TABLE IF NOT EXISTS outlay_migration_lock (
        lock_key BIGINT PRIMARY KEY,
        holder VARCHAR(255) NOT NULL,
        acquired_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
";

/// Current holder of the lock
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct LockInfo {
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
}

/// Default holder token: `<host>:<pid>:<uuid>`
///
/// The host comes from `HOSTNAME` and falls back to `local`.
#[must_use]
pub fn default_holder_token() -> String {
    let host = std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.trim().is_empty())
        .unwrap_or_else(|| "local".to_string());
    format!("{host}:{}:{}", std::process::id(), uuid::Uuid::new_v4())
}

/// Create the lock table if absent
///
/// # Errors
///
/// Returns `DbError` if the DDL fails.
pub fn init(executor: &dyn Executor) -> Result<(), DbError> {
    executor.execute_batch(CREATE_LOCK_SQL)
}

/// # Errors
///
/// Returns `DbError` if the catalogue cannot be read.
pub fn is_initialized(executor: &dyn Executor) -> Result<bool, DbError> {
    table_exists(executor, LOCK_TABLE)
}

/// Holder and acquisition time of the current lock, if any
///
/// # Errors
///
/// Returns `DbError` if the read fails.
pub fn current(executor: &dyn Executor) -> Result<Option<LockInfo>, DbError> {
    let rows = executor.query_all(
        "SELECT holder, CAST(acquired_at AS TEXT) FROM outlay_migration_lock WHERE lock_key = $1",
        &[LOCK_KEY.into()],
    )?;
    match rows.first() {
        Some(row) => Ok(Some(LockInfo {
            holder: row.get_string(0)?,
            acquired_at: parse_timestamp(&row.get_string(1)?)?,
        })),
        None => Ok(None),
    }
}

/// One insert attempt; `true` when this call created the row
fn try_acquire(executor: &dyn Executor, holder: &str) -> Result<bool, DbError> {
    let inserted = executor.execute(
        "INSERT INTO outlay_migration_lock (lock_key, holder, acquired_at) \
         VALUES ($1, $2, CURRENT_TIMESTAMP) \
         ON CONFLICT (lock_key) DO NOTHING",
        &[LOCK_KEY.into(), holder.into()],
    )?;
    Ok(inserted > 0)
}

/// Release the lock if `holder` still owns it
///
/// Returns whether a row was removed. A lock that was force-released and
/// re-acquired by someone else is left alone.
///
/// # Errors
///
/// Returns `DbError` if the delete fails.
pub fn release(executor: &dyn Executor, holder: &str) -> Result<bool, DbError> {
    let removed = executor.execute(
        "DELETE FROM outlay_migration_lock WHERE lock_key = $1 AND holder = $2",
        &[LOCK_KEY.into(), holder.into()],
    )?;
    if removed == 0 {
        log::warn!("Migration lock was no longer held by {holder} at release");
    }
    Ok(removed > 0)
}

/// Remove the lock whoever holds it
///
/// Bypasses mutual exclusion; only for clearing a lock left behind by a
/// process that died while holding it. Returns the lock that was removed.
///
/// # Errors
///
/// Returns `DbError` if the read or delete fails.
pub fn force_unlock(executor: &dyn Executor) -> Result<Option<LockInfo>, DbError> {
    let existing = current(executor)?;
    executor.execute(
        "DELETE FROM outlay_migration_lock WHERE lock_key = $1",
        &[LOCK_KEY.into()],
    )?;
    match &existing {
        Some(info) => log::error!(
            "Migration lock held by {} since {} was force-released",
            info.holder,
            info.acquired_at
        ),
        None => log::error!("Force-unlock requested but no migration lock was held"),
    }
    Ok(existing)
}

enum Attempt {
    Acquired,
    TimedOut(Duration),
    Cancelled,
    Failed(DbError),
}

/// Scoped ownership of the migration lock
///
/// Dropping the guard releases the lock, including on early return and
/// unwinding.
pub struct LockGuard<'a> {
    executor: &'a dyn Executor,
    holder: String,
}

impl<'a> LockGuard<'a> {
    /// Acquire the migration lock
    ///
    /// # Arguments
    ///
    /// * `executor` - The database executor (borrowed for the guard's lifetime)
    /// * `holder` - Token identifying this process in the lock row
    /// * `timeout` - Maximum time to wait; `Duration::ZERO` tries once
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::LockHeld` when another holder keeps the lock
    /// past `timeout`, and `MigrationError::Storage` for any other database error.
    pub fn acquire(
        executor: &'a dyn Executor,
        holder: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, MigrationError> {
        Self::acquire_for(Operation::Migrate, executor, holder.into(), timeout, None)
    }

    /// Like [`LockGuard::acquire`], additionally giving up with
    /// `MigrationError::Cancelled` once `cancel` is set
    ///
    /// # Errors
    ///
    /// See [`LockGuard::acquire`].
    pub fn acquire_cancellable(
        executor: &'a dyn Executor,
        holder: impl Into<String>,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<Self, MigrationError> {
        Self::acquire_for(Operation::Migrate, executor, holder.into(), timeout, Some(cancel))
    }

    /// [`LockGuard::acquire`] attributing errors to `operation`
    pub(crate) fn acquire_for(
        operation: Operation,
        executor: &'a dyn Executor,
        holder: String,
        timeout: Duration,
        cancel: Option<&CancelToken>,
    ) -> Result<Self, MigrationError> {
        let start = Instant::now();
        let cancelled = || cancel.is_some_and(CancelToken::is_cancelled);

        if let Err(e) = executor.set_statement_timeout(Some(ATTEMPT_TIMEOUT)) {
            log::debug!("Could not bound lock attempts: {e}");
        }

        let mut reported = false;
        let outcome = loop {
            if cancelled() {
                break Attempt::Cancelled;
            }

            // A single attempt never waits on the database longer than the remaining budget
            let remaining = timeout.saturating_sub(start.elapsed());
            if let Err(e) = executor.set_lock_wait_timeout(Some(remaining.min(ATTEMPT_TIMEOUT))) {
                log::debug!("Could not bound lock wait: {e}");
            }

            match try_acquire(executor, &holder) {
                Ok(true) => break Attempt::Acquired,
                Ok(false) if !reported && !timeout.is_zero() => {
                    reported = true;
                    log::info!("Migration lock is held elsewhere, waiting up to {timeout:?}");
                }
                Ok(false) => {}
                // Contention on the row itself (SQLite busy, PostgreSQL timeout): retry
                Err(e) if e.is_busy() => log::debug!("Lock attempt hit contention: {e}"),
                // Interrupted by the cancel token; reported at the top of the loop
                Err(_) if cancelled() => continue,
                Err(source) => break Attempt::Failed(source),
            }

            let waited = start.elapsed();
            if waited >= timeout {
                break Attempt::TimedOut(waited);
            }
            std::thread::sleep(POLL_INTERVAL.min(timeout - waited));
        };

        if let Err(e) = executor.set_lock_wait_timeout(None) {
            log::debug!("Could not reset lock wait: {e}");
        }
        if let Err(e) = executor.set_statement_timeout(None) {
            log::debug!("Could not reset statement timeout: {e}");
        }

        match outcome {
            Attempt::Acquired => {
                log::debug!("Migration lock acquired by {holder} after {:?}", start.elapsed());
                Ok(Self { executor, holder })
            }
            Attempt::TimedOut(waited) => {
                let holder = current(executor).ok().flatten().map(|info| info.holder);
                Err(MigrationError::LockHeld { holder, waited })
            }
            Attempt::Cancelled => {
                log::warn!("{operation} cancelled while waiting for the migration lock");
                Err(MigrationError::Cancelled {
                    operation,
                    completed: Vec::new(),
                })
            }
            Attempt::Failed(source) => Err(MigrationError::Storage { operation, source }),
        }
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        match release(self.executor, &self.holder) {
            Ok(_) => log::debug!("Migration lock released by {}", self.holder),
            Err(e) => log::warn!("Failed to release migration lock held by {}: {e}", self.holder),
        }
    }
}
