//! Migration-specific error types

use crate::executor::DbError;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// The engine operation an error surfaced from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Init,
    Migrate,
    Rollback,
    Status,
    Create,
    Unlock,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Init => "init",
            Operation::Migrate => "migrate",
            Operation::Rollback => "rollback",
            Operation::Status => "status",
            Operation::Create => "create",
            Operation::Unlock => "unlock",
        })
    }
}

/// Migration-specific errors
#[derive(Debug)]
pub enum MigrationError {
    /// A definition with this name is already registered (or scaffolded)
    DuplicateName { name: String },
    /// Definition name does not follow `YYYYMMDDHHMMSS_label`
    InvalidName { name: String, reason: String },
    /// Scaffold label is blank after normalisation
    EmptyName,
    /// Another migrator holds the lock
    LockHeld {
        holder: Option<String>,
        waited: Duration,
    },
    /// Ledger or lock table missing
    NotInitialized,
    /// An apply/revert step failed; the ledger reflects every step before it
    ExecutionFailed {
        operation: Operation,
        name: String,
        group_id: i64,
        source: DbError,
    },
    /// The ledger references a definition the registry does not know
    MissingDefinition { name: String },
    /// The run was cancelled between steps
    Cancelled {
        operation: Operation,
        completed: Vec<String>,
    },
    /// Ledger or lock storage unreachable or corrupt
    Storage {
        operation: Operation,
        source: DbError,
    },
    /// Scaffold file could not be written
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl MigrationError {
    /// Only lock contention is worth retrying as-is
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, MigrationError::LockHeld { .. })
    }

    /// Adapter for `map_err` on ledger/lock storage calls
    pub(crate) fn storage(operation: Operation) -> impl FnOnce(DbError) -> MigrationError {
        move |source| MigrationError::Storage { operation, source }
    }
}

impl fmt::Display for MigrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationError::DuplicateName { name } => {
                write!(f, "Migration '{name}' is already registered")
            }
            MigrationError::InvalidName { name, reason } => {
                write!(f, "Invalid migration name '{name}': {reason}")
            }
            MigrationError::EmptyName => write!(f, "Missing migration name"),
            MigrationError::LockHeld { holder, waited } => {
                write!(
                    f,
                    "Migration lock held by {} (waited {}s)\n\
                     Another process may be running migrations. Retry later; if no migrator is \
                     running, a crashed process left the lock behind and `db unlock` clears it.",
                    holder.as_deref().unwrap_or("another process"),
                    waited.as_secs()
                )
            }
            MigrationError::NotInitialized => {
                write!(f, "Migration tables do not exist; run `db init` first")
            }
            MigrationError::ExecutionFailed {
                operation,
                name,
                group_id,
                source,
            } => {
                write!(
                    f,
                    "{operation} of migration '{name}' (group #{group_id}) failed: {source}"
                )
            }
            MigrationError::MissingDefinition { name } => {
                write!(
                    f,
                    "Applied migration '{name}' is not registered\n\
                     Suggestion: Ensure all migration definitions are present in the registry"
                )
            }
            MigrationError::Cancelled {
                operation,
                completed,
            } => {
                write!(
                    f,
                    "{operation} cancelled after {} step(s)",
                    completed.len()
                )?;
                if !completed.is_empty() {
                    write!(f, " ({})", completed.join(", "))?;
                }
                Ok(())
            }
            MigrationError::Storage { operation, source } => {
                write!(f, "Migration storage error during {operation}: {source}")
            }
            MigrationError::Io { path, source } => {
                write!(f, "Failed to write {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for MigrationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MigrationError::ExecutionFailed { source, .. }
            | MigrationError::Storage { source, .. } => Some(source),
            MigrationError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_failed_names_definition() {
        let err = MigrationError::ExecutionFailed {
            operation: Operation::Migrate,
            name: "20250221192022_categories".to_string(),
            group_id: 1,
            source: DbError::QueryError("no such table".to_string()),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("migrate of migration '20250221192022_categories'"));
        assert!(msg.contains("group #1"));
        assert!(msg.contains("no such table"));
        assert!(std::error::Error::source(&err).is_some());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_lock_held_is_retryable() {
        let err = MigrationError::LockHeld {
            holder: Some("web-1:4242:abc".to_string()),
            waited: Duration::from_secs(5),
        };
        assert!(err.is_retryable());
        assert!(err.to_string().contains("web-1:4242:abc"));
    }

    #[test]
    fn test_cancelled_lists_completed_steps() {
        let err = MigrationError::Cancelled {
            operation: Operation::Rollback,
            completed: vec!["b".to_string(), "a".to_string()],
        };
        assert_eq!(err.to_string(), "rollback cancelled after 2 step(s) (b, a)");
    }
}
