//! Migration definitions and their steps

use crate::executor::{Backend, DbError, Executor};
use crate::migration::schema::{drop_table_sql, TableDescriptor};
use std::fmt;
use std::sync::Arc;

/// Procedural step body
pub type StepFn = dyn Fn(&dyn Executor) -> Result<(), DbError> + Send + Sync;

/// One half (apply or revert) of a migration
///
/// SQL and schema steps are rendered to statements that are logged verbatim
/// before they run; callbacks are logged by label.
///
/// Steps run inside the per-step transaction opened by the migrator and must
/// not issue `BEGIN`/`COMMIT` themselves.
#[derive(Clone)]
pub enum Step {
    /// Raw statements, executed in order. Empty = no-op.
    Sql(Vec<String>),
    /// `CREATE TABLE IF NOT EXISTS` rendered from a descriptor
    CreateTable(TableDescriptor),
    /// `DROP TABLE IF EXISTS <name>`
    DropTable(String),
    /// Arbitrary procedural migration
    Callback { label: String, run: Arc<StepFn> },
}

impl Step {
    pub fn sql<I, S>(statements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Step::Sql(statements.into_iter().map(Into::into).collect())
    }

    /// A step that does nothing (scaffold placeholder)
    #[must_use]
    pub fn noop() -> Self {
        Step::Sql(Vec::new())
    }

    pub fn create_table(table: TableDescriptor) -> Self {
        Step::CreateTable(table)
    }

    pub fn drop_table(table: impl Into<String>) -> Self {
        Step::DropTable(table.into())
    }

    pub fn callback<F>(label: impl Into<String>, run: F) -> Self
    where
        F: Fn(&dyn Executor) -> Result<(), DbError> + Send + Sync + 'static,
    {
        Step::Callback {
            label: label.into(),
            run: Arc::new(run),
        }
    }

    #[must_use]
    pub fn is_noop(&self) -> bool {
        matches!(self, Step::Sql(statements) if statements.iter().all(|s| s.trim().is_empty()))
    }

    /// Statements this step executes on `backend`; `None` for callbacks
    #[must_use]
    pub fn statements(&self, backend: Backend) -> Option<Vec<String>> {
        match self {
            Step::Sql(statements) => Some(
                statements
                    .iter()
                    .filter(|s| !s.trim().is_empty())
                    .cloned()
                    .collect(),
            ),
            Step::CreateTable(table) => Some(vec![table.create_sql(backend)]),
            Step::DropTable(table) => Some(vec![drop_table_sql(table, backend)]),
            Step::Callback { .. } => None,
        }
    }

    /// Execute the step
    ///
    /// # Errors
    ///
    /// Returns the first `DbError` raised by a statement or the callback.
    pub fn run(&self, executor: &dyn Executor) -> Result<(), DbError> {
        match self {
            Step::Callback { label, run } => {
                log::debug!("running callback step '{label}'");
                run(executor)
            }
            other => {
                for statement in other.statements(executor.backend()).unwrap_or_default() {
                    log::debug!("{statement}");
                    executor.execute_batch(&statement)?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Sql(statements) => f.debug_tuple("Sql").field(statements).finish(),
            Step::CreateTable(table) => f.debug_tuple("CreateTable").field(&table.name).finish(),
            Step::DropTable(table) => f.debug_tuple("DropTable").field(table).finish(),
            Step::Callback { label, .. } => {
                f.debug_struct("Callback").field("label", label).finish_non_exhaustive()
            }
        }
    }
}

/// Which half of a definition to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Apply,
    Revert,
}

/// A named, reversible schema change
///
/// The name is `YYYYMMDDHHMMSS_label`; ascending name order is apply order.
/// `revert` must undo exactly what `apply` does.
///
/// # Example
///
/// ```rust
/// use outlay::migration::{MigrationDefinition, Step};
///
/// let definition = MigrationDefinition::new(
///     "20250301090000_add_expense_notes",
///     Step::sql(["ALTER TABLE expenses ADD COLUMN notes TEXT"]),
///     Step::sql(["ALTER TABLE expenses DROP COLUMN notes"]),
/// );
/// assert_eq!(definition.name(), "20250301090000_add_expense_notes");
/// ```
#[derive(Debug, Clone)]
pub struct MigrationDefinition {
    name: String,
    apply: Step,
    revert: Step,
}

impl MigrationDefinition {
    pub fn new(name: impl Into<String>, apply: Step, revert: Step) -> Self {
        Self {
            name: name.into(),
            apply,
            revert,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn apply(&self) -> &Step {
        &self.apply
    }

    pub fn revert(&self) -> &Step {
        &self.revert
    }

    pub fn step(&self, direction: Direction) -> &Step {
        match direction {
            Direction::Apply => &self.apply,
            Direction::Revert => &self.revert,
        }
    }
}
