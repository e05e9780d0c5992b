//! Migrator - Core migration execution engine

use crate::cancel::CancelToken;
use crate::executor::{DbError, Executor, Transaction};
use crate::migration::lock::{self, default_holder_token, LockGuard, LockInfo};
use crate::migration::scaffold::{self, Scaffold};
use crate::migration::{
    ledger, Direction, MigrationDefinition, MigrationError, MigrationStatus, Operation, Registry,
};
use chrono::Utc;
use std::fmt;
use std::time::{Duration, Instant};

/// Default time to wait for the migration lock
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(60);

/// Runtime knobs of a [`Migrator`]
#[derive(Debug, Clone)]
pub struct MigratorOptions {
    /// How long `migrate`/`rollback` wait for the lock before `LockHeld`
    pub lock_timeout: Duration,
    /// Bound on every statement of an apply/revert step (`None` = unbounded)
    pub statement_timeout: Option<Duration>,
    /// Token written to the lock row
    pub holder: String,
    /// Checked while waiting for the lock and before every step
    pub cancel: Option<CancelToken>,
}

impl Default for MigratorOptions {
    fn default() -> Self {
        Self {
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            statement_timeout: None,
            holder: default_holder_token(),
            cancel: None,
        }
    }
}

impl MigratorOptions {
    #[must_use]
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_statement_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.statement_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_holder(mut self, holder: impl Into<String>) -> Self {
        self.holder = holder.into();
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Definitions applied (or reverted) by one `migrate`/`rollback` call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationGroup {
    /// Ledger group id; 0 when nothing ran
    pub id: i64,
    /// Names in execution order
    pub names: Vec<String>,
}

impl MigrationGroup {
    /// The empty group (nothing pending / nothing to roll back)
    #[must_use]
    pub fn zero() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.id == 0 && self.names.is_empty()
    }
}

impl fmt::Display for MigrationGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            return write!(f, "group #0 (empty)");
        }
        write!(f, "group #{} ({})", self.id, self.names.join(", "))
    }
}

#[derive(Debug, Clone, Copy)]
enum RunState {
    Idle,
    Locked,
    Applying,
    Committed,
    PartiallyFailed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunState::Idle => "idle",
            RunState::Locked => "locked",
            RunState::Applying => "applying",
            RunState::Committed => "committed",
            RunState::PartiallyFailed => "partially-failed",
        })
    }
}

fn transition(operation: Operation, from: RunState, to: RunState) {
    log::debug!("{operation}: {from} -> {to}");
}

/// Applies the statement timeout for the lifetime of a run
struct StatementTimeoutScope<'a> {
    executor: &'a dyn Executor,
    active: bool,
}

impl<'a> StatementTimeoutScope<'a> {
    fn set(
        executor: &'a dyn Executor,
        timeout: Option<Duration>,
        operation: Operation,
    ) -> Result<Self, MigrationError> {
        if let Some(timeout) = timeout {
            executor
                .set_statement_timeout(Some(timeout))
                .map_err(MigrationError::storage(operation))?;
        }
        Ok(Self {
            executor,
            active: timeout.is_some(),
        })
    }
}

impl Drop for StatementTimeoutScope<'_> {
    fn drop(&mut self) {
        if self.active {
            if let Err(e) = self.executor.set_statement_timeout(None) {
                log::warn!("Failed to reset statement timeout: {e}");
            }
        }
    }
}

/// Core migration execution engine
///
/// Borrows an immutable [`Registry`] and runs the init / migrate / rollback /
/// status operations against an [`Executor`]. `migrate` and `rollback` hold
/// the migration lock for their whole run and execute every definition in its
/// own transaction (step plus ledger write); a failure stops the run and
/// leaves the earlier steps recorded.
///
/// # Example
///
/// ```rust
/// use outlay::migration::{MigrationDefinition, Migrator, Registry, Step};
/// use outlay::sqlite::SqliteExecutor;
///
/// let registry = Registry::from_definitions([MigrationDefinition::new(
///     "20250221192022_categories",
///     Step::sql(["CREATE TABLE categories (id INTEGER PRIMARY KEY, name TEXT NOT NULL UNIQUE)"]),
///     Step::drop_table("categories"),
/// )])?;
///
/// let executor = SqliteExecutor::open_in_memory()?;
/// let migrator = Migrator::new(&registry);
/// migrator.init(&executor)?;
///
/// let group = migrator.migrate(&executor)?;
/// assert_eq!(group.to_string(), "group #1 (20250221192022_categories)");
/// assert!(migrator.migrate(&executor)?.is_zero());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct Migrator<'r> {
    registry: &'r Registry,
    options: MigratorOptions,
}

impl<'r> Migrator<'r> {
    /// Create a migrator with default options
    pub fn new(registry: &'r Registry) -> Self {
        Self::with_options(registry, MigratorOptions::default())
    }

    pub fn with_options(registry: &'r Registry, options: MigratorOptions) -> Self {
        Self { registry, options }
    }

    pub fn registry(&self) -> &'r Registry {
        self.registry
    }

    pub fn options(&self) -> &MigratorOptions {
        &self.options
    }

    /// Create the ledger and lock tables if they do not exist
    ///
    /// Takes no lock; concurrent calls are safe and repeated calls are no-ops.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::Storage` if the DDL fails.
    pub fn init(&self, executor: &dyn Executor) -> Result<(), MigrationError> {
        let storage = MigrationError::storage(Operation::Init);
        ledger::init(executor)
            .and_then(|()| lock::init(executor))
            .map_err(storage)?;
        log::info!("Migration tables ready");
        Ok(())
    }

    /// Whether `init` has run against this database
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::Storage` if the catalogue cannot be read.
    pub fn is_initialized(&self, executor: &dyn Executor) -> Result<bool, MigrationError> {
        Self::probe(executor, Operation::Status)
    }

    fn probe(executor: &dyn Executor, operation: Operation) -> Result<bool, MigrationError> {
        let ledger_ready =
            ledger::is_initialized(executor).map_err(MigrationError::storage(operation))?;
        let lock_ready =
            lock::is_initialized(executor).map_err(MigrationError::storage(operation))?;
        Ok(ledger_ready && lock_ready)
    }

    fn require_initialized(
        executor: &dyn Executor,
        operation: Operation,
    ) -> Result<(), MigrationError> {
        if Self::probe(executor, operation)? {
            Ok(())
        } else {
            Err(MigrationError::NotInitialized)
        }
    }

    fn acquire_lock<'e>(
        &self,
        executor: &'e dyn Executor,
        operation: Operation,
    ) -> Result<LockGuard<'e>, MigrationError> {
        Self::require_initialized(executor, operation)?;
        let guard = LockGuard::acquire_for(
            operation,
            executor,
            self.options.holder.clone(),
            self.options.lock_timeout,
            self.options.cancel.as_ref(),
        )?;
        transition(operation, RunState::Idle, RunState::Locked);
        Ok(guard)
    }

    fn check_cancelled(
        &self,
        operation: Operation,
        completed: &[String],
    ) -> Result<(), MigrationError> {
        match &self.options.cancel {
            Some(token) if token.is_cancelled() => {
                log::warn!(
                    "{operation} cancelled after {} step(s)",
                    completed.len()
                );
                Err(MigrationError::Cancelled {
                    operation,
                    completed: completed.to_vec(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Apply every pending definition as one new group
    ///
    /// Pending = registered but not in the ledger, ascending by name. Each
    /// definition runs in its own transaction together with its ledger entry.
    ///
    /// # Returns
    ///
    /// The applied group, or the zero group when nothing was pending.
    ///
    /// # Errors
    ///
    /// * `NotInitialized` if `init` never ran
    /// * `LockHeld` if another migrator keeps the lock past the timeout
    /// * `ExecutionFailed` naming the first definition whose step or ledger
    ///   write failed; earlier definitions of the group stay applied
    /// * `Cancelled` if the cancel token was set
    /// * `Storage` if the ledger cannot be read or written
    pub fn migrate(&self, executor: &dyn Executor) -> Result<MigrationGroup, MigrationError> {
        let result = self.migrate_locked(executor);
        transition(Operation::Migrate, RunState::Locked, RunState::Idle);
        result
    }

    fn migrate_locked(&self, executor: &dyn Executor) -> Result<MigrationGroup, MigrationError> {
        let operation = Operation::Migrate;
        let _lock = self.acquire_lock(executor, operation)?;

        let applied = ledger::applied_names(executor).map_err(MigrationError::storage(operation))?;
        let pending: Vec<&MigrationDefinition> = self
            .registry
            .all()
            .filter(|definition| !applied.contains(definition.name()))
            .collect();

        if pending.is_empty() {
            log::info!("No pending migrations");
            return Ok(MigrationGroup::zero());
        }

        let group_id = ledger::max_group_id(executor).map_err(MigrationError::storage(operation))? + 1;
        log::info!(
            "Applying {} pending migration(s) as group #{group_id}",
            pending.len()
        );

        let names = self.run_group(executor, operation, group_id, &pending, Direction::Apply)?;
        let group = MigrationGroup { id: group_id, names };
        log::info!("Migrated to {group}");
        Ok(group)
    }

    /// Revert the most recent group, newest definition first
    ///
    /// # Returns
    ///
    /// The reverted group (names in revert order), or the zero group when the
    /// ledger is empty.
    ///
    /// # Errors
    ///
    /// * `NotInitialized` if `init` never ran
    /// * `LockHeld` if another migrator keeps the lock past the timeout
    /// * `MissingDefinition` if an entry of the group is no longer registered;
    ///   nothing is reverted in that case
    /// * `ExecutionFailed` naming the first definition whose revert failed;
    ///   the rest of the group stays recorded
    /// * `Cancelled` if the cancel token was set
    /// * `Storage` if the ledger cannot be read or written
    pub fn rollback(&self, executor: &dyn Executor) -> Result<MigrationGroup, MigrationError> {
        let result = self.rollback_locked(executor);
        transition(Operation::Rollback, RunState::Locked, RunState::Idle);
        result
    }

    fn rollback_locked(&self, executor: &dyn Executor) -> Result<MigrationGroup, MigrationError> {
        let operation = Operation::Rollback;
        let _lock = self.acquire_lock(executor, operation)?;

        let entries = ledger::latest_group(executor).map_err(MigrationError::storage(operation))?;
        let Some(group_id) = entries.first().map(|entry| entry.group_id) else {
            log::info!("No migrations to roll back");
            return Ok(MigrationGroup::zero());
        };

        let definitions = entries
            .iter()
            .map(|entry| {
                self.registry
                    .get(&entry.name)
                    .ok_or_else(|| MigrationError::MissingDefinition {
                        name: entry.name.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        log::warn!(
            "Rolling back group #{group_id} ({} migration(s))",
            definitions.len()
        );

        let names = self.run_group(executor, operation, group_id, &definitions, Direction::Revert)?;
        let group = MigrationGroup { id: group_id, names };
        log::info!("Rolled back {group}");
        Ok(group)
    }

    /// Run `definitions` in order, one transaction each, stopping at the first failure
    fn run_group(
        &self,
        executor: &dyn Executor,
        operation: Operation,
        group_id: i64,
        definitions: &[&MigrationDefinition],
        direction: Direction,
    ) -> Result<Vec<String>, MigrationError> {
        let _timeout = StatementTimeoutScope::set(executor, self.options.statement_timeout, operation)?;
        transition(operation, RunState::Locked, RunState::Applying);

        let mut completed = Vec::with_capacity(definitions.len());
        for definition in definitions {
            let outcome = self
                .check_cancelled(operation, &completed)
                .and_then(|()| self.run_definition(executor, operation, group_id, definition, direction));

            if let Err(err) = outcome {
                transition(operation, RunState::Applying, RunState::PartiallyFailed);
                // An interrupted statement caused by cancellation reports as a cancel
                if matches!(err, MigrationError::ExecutionFailed { .. }) {
                    self.check_cancelled(operation, &completed)?;
                }
                if !completed.is_empty() {
                    log::warn!(
                        "{operation} stopped at {}; group #{group_id} kept {} completed step(s): {}",
                        definition.name(),
                        completed.len(),
                        completed.join(", ")
                    );
                }
                return Err(err);
            }
            completed.push(definition.name().to_string());
        }

        transition(operation, RunState::Applying, RunState::Committed);
        Ok(completed)
    }

    /// One definition and its ledger write in a single transaction
    fn run_definition(
        &self,
        executor: &dyn Executor,
        operation: Operation,
        group_id: i64,
        definition: &MigrationDefinition,
        direction: Direction,
    ) -> Result<(), MigrationError> {
        let name = definition.name();
        let failed = |source: DbError| MigrationError::ExecutionFailed {
            operation,
            name: name.to_string(),
            group_id,
            source,
        };

        let start = Instant::now();
        let tx = Transaction::begin(executor).map_err(&failed)?;
        definition.step(direction).run(tx.executor()).map_err(&failed)?;

        let elapsed_ms = i64::try_from(start.elapsed().as_millis()).unwrap_or(i64::MAX);
        match direction {
            Direction::Apply => ledger::record(tx.executor(), name, group_id, elapsed_ms),
            Direction::Revert => ledger::remove(tx.executor(), name),
        }
        .map_err(&failed)?;

        tx.commit().map_err(&failed)?;

        match direction {
            Direction::Apply => log::info!("Applied {name} in {elapsed_ms}ms"),
            Direction::Revert => log::info!("Reverted {name} in {elapsed_ms}ms"),
        }
        Ok(())
    }

    /// Applied/unapplied split of the registry
    ///
    /// Lock-free; may observe a run in progress.
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` if `init` never ran, `Storage` if the ledger
    /// cannot be read.
    pub fn status(&self, executor: &dyn Executor) -> Result<MigrationStatus, MigrationError> {
        let operation = Operation::Status;
        Self::require_initialized(executor, operation)?;

        let entries = ledger::entries(executor).map_err(MigrationError::storage(operation))?;
        let lock = lock::current(executor).map_err(MigrationError::storage(operation))?;
        let status = MigrationStatus::compute(self.registry, entries, lock);

        for orphan in &status.orphaned {
            log::warn!(
                "Ledger entry {} (group #{}) has no registered definition",
                orphan.name,
                orphan.group_id
            );
        }
        Ok(status)
    }

    /// New definition name and authoring skeleton for `label`
    ///
    /// Touches neither the ledger nor the lock.
    ///
    /// # Errors
    ///
    /// Returns `EmptyName` for a blank label and `DuplicateName` on collision.
    pub fn create_definition(&self, label: &str) -> Result<Scaffold, MigrationError> {
        scaffold::create_definition_at(self.registry, label, Utc::now())
    }

    /// Remove the migration lock whoever holds it
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` if `init` never ran, `Storage` if the lock
    /// table cannot be read or written.
    pub fn force_unlock(&self, executor: &dyn Executor) -> Result<Option<LockInfo>, MigrationError> {
        let operation = Operation::Unlock;
        Self::require_initialized(executor, operation)?;
        lock::force_unlock(executor).map_err(MigrationError::storage(operation))
    }
}
