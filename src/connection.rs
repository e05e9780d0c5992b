//! Connection Module
//!
//! Turns a database URL into a boxed [`Executor`] for the matching backend.
//!
//! Supported forms:
//! - `sqlite::memory:` — private in-memory SQLite database
//! - `sqlite://path/to/file.db` or `sqlite:path/to/file.db` — SQLite file
//! - `postgres://...`, `postgresql://...` or key-value `host=... user=...` —
//!   PostgreSQL (requires the `postgres` feature)

use crate::cancel::CancelToken;
use crate::executor::{Backend, DbError, Executor};
use std::fmt;
use std::path::PathBuf;

/// Connection error type
#[derive(Debug)]
pub enum ConnectionError {
    /// Invalid connection string format
    InvalidConnectionString(String),
    /// Backend recognised but not compiled into this build
    BackendNotEnabled(Backend),
    /// Error raised while opening the connection
    Database(DbError),
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionError::InvalidConnectionString(s) => {
                write!(f, "Invalid connection string: {s}")
            }
            ConnectionError::BackendNotEnabled(backend) => {
                write!(
                    f,
                    "The {backend} backend is not enabled in this build (rebuild with `--features {backend}`)"
                )
            }
            ConnectionError::Database(e) => write!(f, "Connection error: {e}"),
        }
    }
}

impl std::error::Error for ConnectionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConnectionError::Database(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DbError> for ConnectionError {
    fn from(err: DbError) -> Self {
        ConnectionError::Database(err)
    }
}

/// Where a connection string points
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionTarget {
    SqliteMemory,
    SqliteFile(PathBuf),
    Postgres(String),
}

impl ConnectionTarget {
    #[must_use]
    pub fn backend(&self) -> Backend {
        match self {
            ConnectionTarget::SqliteMemory | ConnectionTarget::SqliteFile(_) => Backend::Sqlite,
            ConnectionTarget::Postgres(_) => Backend::Postgres,
        }
    }
}

/// Parse and validate a connection string
///
/// # Errors
///
/// Returns `ConnectionError::InvalidConnectionString` for empty strings,
/// SQLite URLs without a path, and unknown schemes.
pub fn parse_connection_string(connection_string: &str) -> Result<ConnectionTarget, ConnectionError> {
    let s = connection_string.trim();
    if s.is_empty() {
        return Err(ConnectionError::InvalidConnectionString(
            "Connection string cannot be empty".to_string(),
        ));
    }

    if s == "sqlite::memory:" || s == "sqlite://:memory:" {
        return Ok(ConnectionTarget::SqliteMemory);
    }

    if let Some(rest) = s.strip_prefix("sqlite:") {
        let path = rest.strip_prefix("//").unwrap_or(rest);
        if path.is_empty() {
            return Err(ConnectionError::InvalidConnectionString(format!(
                "SQLite connection string '{s}' has no file path"
            )));
        }
        return Ok(ConnectionTarget::SqliteFile(PathBuf::from(path)));
    }

    if s.starts_with("postgres://") || s.starts_with("postgresql://") || s.contains("host=") {
        return Ok(ConnectionTarget::Postgres(s.to_string()));
    }

    Err(ConnectionError::InvalidConnectionString(format!(
        "'{s}' must start with sqlite:, postgres:// or postgresql://, or be a key-value string containing host="
    )))
}

/// Establish a connection and return it as an executor
///
/// # Errors
///
/// Returns `ConnectionError` if the string is invalid, the backend is not
/// compiled in, or the database cannot be opened.
///
/// # Examples
///
/// ```no_run
/// use outlay::connection::connect;
///
/// let executor = connect("sqlite://expenses.db")?;
/// # Ok::<(), outlay::connection::ConnectionError>(())
/// ```
pub fn connect(connection_string: &str) -> Result<Box<dyn Executor>, ConnectionError> {
    connect_with_cancel(connection_string, None)
}

/// Like [`connect`], additionally interrupting in-flight statements when
/// `cancel` fires (SQLite only; PostgreSQL relies on `statement_timeout`).
///
/// # Errors
///
/// See [`connect`].
pub fn connect_with_cancel(
    connection_string: &str,
    cancel: Option<CancelToken>,
) -> Result<Box<dyn Executor>, ConnectionError> {
    let target = parse_connection_string(connection_string)?;
    log::debug!("Connecting to {} database", target.backend());

    match target {
        #[cfg(feature = "sqlite")]
        ConnectionTarget::SqliteMemory => {
            let executor = crate::sqlite::SqliteExecutor::open_in_memory()?;
            Ok(Box::new(with_cancel(executor, cancel)))
        }
        #[cfg(feature = "sqlite")]
        ConnectionTarget::SqliteFile(path) => {
            let executor = crate::sqlite::SqliteExecutor::open(&path)?;
            Ok(Box::new(with_cancel(executor, cancel)))
        }
        #[cfg(feature = "postgres")]
        ConnectionTarget::Postgres(url) => {
            let _ = cancel;
            let client = may_postgres::connect(&url).map_err(DbError::PostgresError)?;
            Ok(Box::new(crate::postgres::MayPostgresExecutor::new(client)))
        }
        #[allow(unreachable_patterns)]
        other => {
            let _ = cancel;
            Err(ConnectionError::BackendNotEnabled(other.backend()))
        }
    }
}

#[cfg(feature = "sqlite")]
fn with_cancel(
    executor: crate::sqlite::SqliteExecutor,
    cancel: Option<CancelToken>,
) -> crate::sqlite::SqliteExecutor {
    match cancel {
        Some(token) => executor.with_cancel(token),
        None => executor,
    }
}
