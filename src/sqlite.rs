//! SQLite executor over `rusqlite`
//!
//! The expense service keeps its data in a local `expenses.db`; this is the
//! default backend. Statement timeouts and cancellation use SQLite's progress
//! handler, which interrupts the running statement with `SQLITE_INTERRUPT`.

use crate::cancel::CancelToken;
use crate::executor::{Backend, DbError, Executor, Row, SqlValue};
use regex::Regex;
use rusqlite::types::{Value, ValueRef};
use rusqlite::{params_from_iter, Connection, ErrorCode};
use std::borrow::Cow;
use std::cell::Cell;
use std::path::Path;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

/// How long a connection waits on another connection's write lock
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// VM instructions between two progress-handler polls
const PROGRESS_INTERVAL_OPS: i32 = 1_000;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)] // Constant pattern
    Regex::new(r"\$(\d+)").expect("placeholder pattern is valid")
});

/// Rewrite `$N` placeholders into SQLite's explicit `?N` form
pub(crate) fn rewrite_placeholders(query: &str) -> Cow<'_, str> {
    PLACEHOLDER.replace_all(query, "?$1")
}

/// Implementation of `Executor` for a `rusqlite::Connection`
pub struct SqliteExecutor {
    conn: Connection,
    statement_timeout: Cell<Option<Duration>>,
    cancel: Option<CancelToken>,
}

impl SqliteExecutor {
    /// Open (or create) a database file
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the file cannot be opened or configured.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DbError> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Open a private in-memory database
    ///
    /// # Errors
    ///
    /// Returns `DbError` if the connection cannot be configured.
    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Wrap an existing connection
    ///
    /// Enables foreign keys (the service relies on cascading deletes) and sets
    /// the busy timeout so concurrent migrators contend on the lock row instead
    /// of failing on SQLite's file lock.
    ///
    /// # Errors
    ///
    /// Returns `DbError` if a pragma fails.
    pub fn from_connection(conn: Connection) -> Result<Self, DbError> {
        conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA foreign_keys = ON")?;
        Ok(Self {
            conn,
            statement_timeout: Cell::new(None),
            cancel: None,
        })
    }

    /// Interrupt running statements once `token` is cancelled
    #[must_use]
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Get a reference to the underlying connection
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Consume the executor and return the underlying connection
    pub fn into_connection(self) -> Connection {
        self.conn
    }

    /// Run `f` with the progress handler armed for the configured deadline
    /// and cancel token, translating interrupts into `DbError::Interrupted`.
    fn guarded<T>(&self, f: impl FnOnce() -> rusqlite::Result<T>) -> Result<T, DbError> {
        let timeout = self.statement_timeout.get();
        let armed = timeout.is_some() || self.cancel.is_some();

        if armed {
            let deadline = timeout.map(|t| Instant::now() + t);
            let cancel = self.cancel.clone();
            self.conn.progress_handler(
                PROGRESS_INTERVAL_OPS,
                Some(move || {
                    deadline.is_some_and(|d| Instant::now() >= d)
                        || cancel.as_ref().is_some_and(CancelToken::is_cancelled)
                }),
            );
        }

        let result = f();

        if armed {
            self.conn.progress_handler(0, None::<fn() -> bool>);
        }

        result.map_err(|err| self.translate(err, timeout))
    }

    fn translate(&self, err: rusqlite::Error, timeout: Option<Duration>) -> DbError {
        match &err {
            rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::OperationInterrupted => {
                if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                    DbError::Interrupted("cancelled".to_string())
                } else if let Some(t) = timeout {
                    DbError::Interrupted(format!(
                        "statement timeout of {}ms exceeded",
                        t.as_millis()
                    ))
                } else {
                    DbError::Interrupted("interrupted".to_string())
                }
            }
            _ => DbError::SqliteError(err),
        }
    }
}

fn to_sqlite_value(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(v) => Value::Integer(*v),
        SqlValue::Text(s) => Value::Text(s.clone()),
    }
}

fn from_sqlite_value(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(v) => SqlValue::Integer(v),
        ValueRef::Real(v) => SqlValue::Text(v.to_string()),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            SqlValue::Text(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

impl Executor for SqliteExecutor {
    fn backend(&self) -> Backend {
        Backend::Sqlite
    }

    fn execute(&self, query: &str, params: &[SqlValue]) -> Result<u64, DbError> {
        let sql = rewrite_placeholders(query);
        log::trace!("sqlite execute: {sql}");
        self.guarded(|| {
            let mut stmt = self.conn.prepare(&sql)?;
            let affected = stmt.execute(params_from_iter(params.iter().map(to_sqlite_value)))?;
            Ok(affected as u64)
        })
    }

    fn execute_batch(&self, sql: &str) -> Result<(), DbError> {
        log::trace!("sqlite batch: {sql}");
        // Transaction control must never be interrupted, or a cancelled run
        // could leave its step transaction open.
        if matches!(sql.trim(), "BEGIN" | "COMMIT" | "ROLLBACK") {
            return self.conn.execute_batch(sql).map_err(DbError::SqliteError);
        }
        self.guarded(|| self.conn.execute_batch(sql))
    }

    fn query_all(&self, query: &str, params: &[SqlValue]) -> Result<Vec<Row>, DbError> {
        let sql = rewrite_placeholders(query);
        log::trace!("sqlite query: {sql}");
        self.guarded(|| {
            let mut stmt = self.conn.prepare(&sql)?;
            let columns = stmt.column_count();
            let mut rows = stmt.query(params_from_iter(params.iter().map(to_sqlite_value)))?;

            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let mut values = Vec::with_capacity(columns);
                for idx in 0..columns {
                    values.push(from_sqlite_value(row.get_ref(idx)?));
                }
                out.push(Row::new(values));
            }
            Ok(out)
        })
    }

    fn set_statement_timeout(&self, timeout: Option<Duration>) -> Result<(), DbError> {
        self.statement_timeout.set(timeout);
        Ok(())
    }

    fn set_lock_wait_timeout(&self, timeout: Option<Duration>) -> Result<(), DbError> {
        // Zero disables the busy handler: a locked database fails at once with SQLITE_BUSY
        self.conn
            .busy_timeout(timeout.unwrap_or(DEFAULT_BUSY_TIMEOUT))
            .map_err(DbError::SqliteError)
    }
}
