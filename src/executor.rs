//! Executor Module
//!
//! Provides the `Executor` trait that abstracts synchronous database execution
//! over the supported backends (SQLite through `rusqlite`, PostgreSQL through
//! `may_postgres`).
//!
//! The migration engine only needs a narrow surface: run a statement, run a
//! batch of statements, read rows back, and bound how long a statement may
//! run. Values cross the trait boundary as [`SqlValue`] so the engine never
//! depends on a driver's parameter types.

use std::fmt;
use std::time::Duration;

/// Database backend behind an [`Executor`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// SQLite (embedded, file or in-memory)
    Sqlite,
    /// PostgreSQL
    Postgres,
}

impl Backend {
    /// Human-readable backend name
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Sqlite => "sqlite",
            Backend::Postgres => "postgres",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A parameter or column value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Text(String),
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Integer(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(SqlValue::Null, Into::into)
    }
}

/// A result row, values in select-list order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    values: Vec<SqlValue>,
}

impl Row {
    /// Create a row from its column values
    #[must_use]
    pub fn new(values: Vec<SqlValue>) -> Self {
        Self { values }
    }

    /// Number of columns
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn value(&self, idx: usize) -> Result<&SqlValue, DbError> {
        self.values.get(idx).ok_or_else(|| {
            DbError::ParseError(format!(
                "column index {idx} out of range (row has {} columns)",
                self.values.len()
            ))
        })
    }

    /// Read an integer column that must not be NULL
    ///
    /// # Errors
    ///
    /// Returns `DbError::ParseError` if the column is missing, NULL, or not an integer.
    pub fn get_i64(&self, idx: usize) -> Result<i64, DbError> {
        self.get_opt_i64(idx)?
            .ok_or_else(|| DbError::ParseError(format!("column {idx} is NULL, expected integer")))
    }

    /// Read a nullable integer column
    ///
    /// Text values holding a decimal integer are accepted, since some drivers
    /// hand back aggregates as text.
    ///
    /// # Errors
    ///
    /// Returns `DbError::ParseError` if the column is missing or not an integer.
    pub fn get_opt_i64(&self, idx: usize) -> Result<Option<i64>, DbError> {
        match self.value(idx)? {
            SqlValue::Null => Ok(None),
            SqlValue::Integer(v) => Ok(Some(*v)),
            SqlValue::Text(s) => s.trim().parse::<i64>().map(Some).map_err(|e| {
                DbError::ParseError(format!("column {idx}: '{s}' is not an integer: {e}"))
            }),
        }
    }

    /// Read a text column that must not be NULL
    ///
    /// # Errors
    ///
    /// Returns `DbError::ParseError` if the column is missing or NULL.
    pub fn get_string(&self, idx: usize) -> Result<String, DbError> {
        self.get_opt_string(idx)?
            .ok_or_else(|| DbError::ParseError(format!("column {idx} is NULL, expected text")))
    }

    /// Read a nullable text column (integers are rendered as text)
    ///
    /// # Errors
    ///
    /// Returns `DbError::ParseError` if the column is missing.
    pub fn get_opt_string(&self, idx: usize) -> Result<Option<String>, DbError> {
        match self.value(idx)? {
            SqlValue::Null => Ok(None),
            SqlValue::Integer(v) => Ok(Some(v.to_string())),
            SqlValue::Text(s) => Ok(Some(s.clone())),
        }
    }
}

/// Database execution error
#[derive(Debug)]
pub enum DbError {
    /// SQLite error from `rusqlite`
    #[cfg(feature = "sqlite")]
    SqliteError(rusqlite::Error),
    /// `PostgreSQL` error from `may_postgres`
    #[cfg(feature = "postgres")]
    PostgresError(may_postgres::Error),
    /// Statement interrupted (statement timeout or cancellation)
    Interrupted(String),
    /// Query execution error
    QueryError(String),
    /// Row parsing/conversion error
    ParseError(String),
    /// Other execution errors
    Other(String),
}

impl DbError {
    /// Whether the error is transient contention worth retrying
    /// (SQLite busy/locked, `PostgreSQL` lock or statement timeout).
    #[must_use]
    pub fn is_busy(&self) -> bool {
        match self {
            #[cfg(feature = "sqlite")]
            DbError::SqliteError(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            #[cfg(feature = "postgres")]
            DbError::PostgresError(e) => {
                let msg = e.to_string();
                msg.contains("canceling statement") || msg.contains("lock timeout")
            }
            _ => false,
        }
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            #[cfg(feature = "sqlite")]
            DbError::SqliteError(e) => write!(f, "SQLite error: {e}"),
            #[cfg(feature = "postgres")]
            DbError::PostgresError(e) => write!(f, "PostgreSQL error: {e}"),
            DbError::Interrupted(s) => write!(f, "Statement interrupted: {s}"),
            DbError::QueryError(s) => write!(f, "Query error: {s}"),
            DbError::ParseError(s) => write!(f, "Parse error: {s}"),
            DbError::Other(s) => write!(f, "Execution error: {s}"),
        }
    }
}

impl std::error::Error for DbError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            #[cfg(feature = "sqlite")]
            DbError::SqliteError(e) => Some(e),
            #[cfg(feature = "postgres")]
            DbError::PostgresError(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for DbError {
    fn from(err: rusqlite::Error) -> Self {
        DbError::SqliteError(err)
    }
}

#[cfg(feature = "postgres")]
impl From<may_postgres::Error> for DbError {
    fn from(err: may_postgres::Error) -> Self {
        DbError::PostgresError(err)
    }
}

/// Trait for executing database operations
///
/// Queries use `$1`, `$2`, ... placeholders on every backend; implementations
/// translate them where the driver expects a different syntax.
///
/// Implementations are used from a single thread per migration run; they are
/// not required to be `Sync`.
pub trait Executor {
    /// The backend this executor talks to
    fn backend(&self) -> Backend;

    /// Execute a single statement and return the number of rows affected
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the statement fails.
    fn execute(&self, query: &str, params: &[SqlValue]) -> Result<u64, DbError>;

    /// Execute one or more statements without parameters
    ///
    /// # Errors
    ///
    /// Returns `DbError` if any statement fails; later statements are not run.
    fn execute_batch(&self, sql: &str) -> Result<(), DbError>;

    /// Execute a query and return all rows
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the query fails or a value cannot be converted.
    fn query_all(&self, query: &str, params: &[SqlValue]) -> Result<Vec<Row>, DbError>;

    /// Execute a query that must return exactly one row
    ///
    /// # Errors
    ///
    /// Returns `DbError::QueryError` if zero or several rows come back.
    fn query_one(&self, query: &str, params: &[SqlValue]) -> Result<Row, DbError> {
        let mut rows = self.query_all(query, params)?;
        match rows.len() {
            1 => Ok(rows.remove(0)),
            n => Err(DbError::QueryError(format!("expected exactly one row, got {n}"))),
        }
    }

    /// Bound how long any later statement may run (`None` = unbounded)
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the backend rejects the setting.
    fn set_statement_timeout(&self, timeout: Option<Duration>) -> Result<(), DbError>;

    /// Bound how long a statement may wait on another connection's lock
    /// (`None` restores the backend default)
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the backend rejects the setting.
    fn set_lock_wait_timeout(&self, timeout: Option<Duration>) -> Result<(), DbError>;
}

impl<E: Executor + ?Sized> Executor for Box<E> {
    fn backend(&self) -> Backend {
        (**self).backend()
    }

    fn execute(&self, query: &str, params: &[SqlValue]) -> Result<u64, DbError> {
        (**self).execute(query, params)
    }

    fn execute_batch(&self, sql: &str) -> Result<(), DbError> {
        (**self).execute_batch(sql)
    }

    fn query_all(&self, query: &str, params: &[SqlValue]) -> Result<Vec<Row>, DbError> {
        (**self).query_all(query, params)
    }

    fn query_one(&self, query: &str, params: &[SqlValue]) -> Result<Row, DbError> {
        (**self).query_one(query, params)
    }

    fn set_statement_timeout(&self, timeout: Option<Duration>) -> Result<(), DbError> {
        (**self).set_statement_timeout(timeout)
    }

    fn set_lock_wait_timeout(&self, timeout: Option<Duration>) -> Result<(), DbError> {
        (**self).set_lock_wait_timeout(timeout)
    }
}

/// A database transaction scoped to a borrowed executor
///
/// Statements are issued through [`Transaction::executor`]. A transaction
/// that is dropped without `commit()` is rolled back, including when the
/// stack unwinds through it.
///
/// # Examples
///
/// ```no_run
/// use outlay::executor::{DbError, Executor, Transaction};
///
/// fn rename(executor: &dyn Executor) -> Result<(), DbError> {
///     let tx = Transaction::begin(executor)?;
///     tx.executor().execute("UPDATE categories SET name = $1 WHERE id = $2", &["food".into(), 1i64.into()])?;
///     tx.commit()
/// }
/// ```
pub struct Transaction<'a> {
    executor: &'a dyn Executor,
    closed: bool,
}

impl<'a> Transaction<'a> {
    /// Start a transaction
    ///
    /// # Errors
    ///
    /// Returns `DbError` if `BEGIN` fails (e.g. a transaction is already open).
    pub fn begin(executor: &'a dyn Executor) -> Result<Self, DbError> {
        executor.execute_batch("BEGIN")?;
        Ok(Self {
            executor,
            closed: false,
        })
    }

    /// The executor statements of this transaction run on
    #[must_use]
    pub fn executor(&self) -> &'a dyn Executor {
        self.executor
    }

    /// Commit the transaction
    ///
    /// # Errors
    ///
    /// Returns `DbError` if `COMMIT` fails; the transaction is then rolled back on drop.
    pub fn commit(mut self) -> Result<(), DbError> {
        self.executor.execute_batch("COMMIT")?;
        self.closed = true;
        Ok(())
    }

    /// Roll the transaction back explicitly
    ///
    /// # Errors
    ///
    /// Returns `DbError` if `ROLLBACK` fails.
    pub fn rollback(mut self) -> Result<(), DbError> {
        self.closed = true;
        self.executor.execute_batch("ROLLBACK")
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.executor.execute_batch("ROLLBACK") {
                log::warn!("Failed to roll back abandoned transaction: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_error_display() {
        let err = DbError::QueryError("test error".to_string());
        assert!(err.to_string().contains("Query error"));

        let err = DbError::ParseError("test".to_string());
        assert!(err.to_string().contains("Parse error"));

        let err = DbError::Interrupted("statement timeout of 1s exceeded".to_string());
        assert!(err.to_string().contains("interrupted"));
        assert!(err.to_string().contains("1s"));

        let err = DbError::Other("test".to_string());
        assert!(err.to_string().contains("Execution error"));
        assert!(!err.is_busy());
    }

    #[test]
    fn test_sql_value_conversions() {
        assert_eq!(SqlValue::from(7i64), SqlValue::Integer(7));
        assert_eq!(SqlValue::from("users"), SqlValue::Text("users".to_string()));
        assert_eq!(SqlValue::from(None::<i64>), SqlValue::Null);
        assert_eq!(SqlValue::from(Some(3i64)), SqlValue::Integer(3));
    }

    #[test]
    #[allow(clippy::expect_used)] // Test code - expect is acceptable
    fn test_row_getters() {
        let row = Row::new(vec![
            SqlValue::Text("20250221191532_users".to_string()),
            SqlValue::Integer(1),
            SqlValue::Null,
            SqlValue::Text("42".to_string()),
        ]);

        assert_eq!(row.len(), 4);
        assert_eq!(row.get_string(0).expect("text column"), "20250221191532_users");
        assert_eq!(row.get_i64(1).expect("integer column"), 1);
        assert_eq!(row.get_opt_i64(2).expect("nullable column"), None);
        assert_eq!(row.get_i64(3).expect("numeric text"), 42);
        assert_eq!(row.get_opt_string(1).expect("integer as text"), Some("1".to_string()));

        assert!(matches!(row.get_i64(2), Err(DbError::ParseError(_))));
        assert!(matches!(row.get_i64(0), Err(DbError::ParseError(_))));
        assert!(matches!(row.get_string(9), Err(DbError::ParseError(_))));
    }
}
