//! Ledger of applied migrations (`outlay_migrations`)
//!
//! One row per applied definition. Writes happen inside the transaction of
//! the step that produced them, so "step executed" and "step recorded" commit
//! together.

use crate::executor::{Backend, DbError, Executor, Row, SqlValue};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::collections::BTreeSet;

pub const LEDGER_TABLE: &str = "outlay_migrations";

const CREATE_LEDGER_SQL: &str = r"
    CREATE TABLE IF NOT EXISTS outlay_migrations (
        name VARCHAR(255) PRIMARY KEY,
        group_id BIGINT NOT NULL,
        applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        execution_time_ms BIGINT
    )
";

const CREATE_LEDGER_INDEX_SQL: &str = r"
    CREATE INDEX IF NOT EXISTS idx_outlay_migrations_group_id
    ON outlay_migrations(group_id)
";

const SELECT_COLUMNS: &str =
    "SELECT name, group_id, CAST(applied_at AS TEXT), execution_time_ms FROM outlay_migrations";

/// One applied migration
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct LedgerEntry {
    pub name: String,
    pub group_id: i64,
    pub applied_at: DateTime<Utc>,
    /// `None` for rows written without timing
    pub execution_time_ms: Option<i64>,
}

impl LedgerEntry {
    /// Expected column order: `name`, `group_id`, `applied_at` (as text), `execution_time_ms`
    fn from_row(row: &Row) -> Result<Self, DbError> {
        Ok(Self {
            name: row.get_string(0)?,
            group_id: row.get_i64(1)?,
            applied_at: parse_timestamp(&row.get_string(2)?)?,
            execution_time_ms: row.get_opt_i64(3)?,
        })
    }
}

/// Parse a database timestamp rendered as text
///
/// Accepts the SQLite `CURRENT_TIMESTAMP` form, PostgreSQL's text cast, ISO 8601
/// with a `T` separator, and RFC 3339 with an offset.
pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, DbError> {
    const FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
    ];
    let raw = raw.trim();
    for format in FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(naive.and_utc());
        }
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DbError::ParseError(format!("failed to parse timestamp '{raw}': {e}")))
}

/// Does a table exist in the current schema?
pub(crate) fn table_exists(executor: &dyn Executor, table: &str) -> Result<bool, DbError> {
    let sql = match executor.backend() {
        Backend::Sqlite => "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = $1",
        Backend::Postgres => {
            "SELECT COUNT(*) FROM information_schema.tables \
             WHERE table_schema = current_schema() AND table_name = $1"
        }
    };
    let row = executor.query_one(sql, &[table.into()])?;
    Ok(row.get_i64(0)? > 0)
}

/// Create the ledger table and its index if absent
///
/// # Errors
///
/// Returns `DbError` if the DDL fails.
pub fn init(executor: &dyn Executor) -> Result<(), DbError> {
    executor.execute_batch(CREATE_LEDGER_SQL)?;
    executor.execute_batch(CREATE_LEDGER_INDEX_SQL)?;
    Ok(())
}

/// # Errors
///
/// Returns `DbError` if the catalogue cannot be read.
pub fn is_initialized(executor: &dyn Executor) -> Result<bool, DbError> {
    table_exists(executor, LEDGER_TABLE)
}

/// All entries, ascending by name
///
/// # Errors
///
/// Returns `DbError` if the read fails or a row is malformed.
pub fn entries(executor: &dyn Executor) -> Result<Vec<LedgerEntry>, DbError> {
    let sql = format!("{SELECT_COLUMNS} ORDER BY name ASC");
    executor
        .query_all(&sql, &[])?
        .iter()
        .map(LedgerEntry::from_row)
        .collect()
}

/// Names currently recorded
///
/// # Errors
///
/// Returns `DbError` if the read fails.
pub fn applied_names(executor: &dyn Executor) -> Result<BTreeSet<String>, DbError> {
    executor
        .query_all("SELECT name FROM outlay_migrations", &[])?
        .iter()
        .map(|row| row.get_string(0))
        .collect()
}

/// Highest group id, 0 when the ledger is empty
///
/// # Errors
///
/// Returns `DbError` if the read fails.
pub fn max_group_id(executor: &dyn Executor) -> Result<i64, DbError> {
    let row = executor.query_one("SELECT MAX(group_id) FROM outlay_migrations", &[])?;
    Ok(row.get_opt_i64(0)?.unwrap_or(0))
}

/// Entries of the highest group, descending by name (rollback order)
///
/// # Errors
///
/// Returns `DbError` if the read fails.
pub fn latest_group(executor: &dyn Executor) -> Result<Vec<LedgerEntry>, DbError> {
    let group_id = max_group_id(executor)?;
    if group_id == 0 {
        return Ok(Vec::new());
    }
    let sql = format!("{SELECT_COLUMNS} WHERE group_id = $1 ORDER BY name DESC");
    executor
        .query_all(&sql, &[group_id.into()])?
        .iter()
        .map(LedgerEntry::from_row)
        .collect()
}

/// Record an applied definition; `applied_at` is set by the database
///
/// # Errors
///
/// Returns `DbError` if the insert fails (including a duplicate name).
pub fn record(
    executor: &dyn Executor,
    name: &str,
    group_id: i64,
    execution_time_ms: i64,
) -> Result<(), DbError> {
    executor.execute(
        "INSERT INTO outlay_migrations (name, group_id, applied_at, execution_time_ms) \
         VALUES ($1, $2, CURRENT_TIMESTAMP, $3)",
        &[name.into(), group_id.into(), SqlValue::Integer(execution_time_ms)],
    )?;
    Ok(())
}

/// Remove one entry
///
/// # Errors
///
/// Returns `DbError::QueryError` if no entry had that name.
pub fn remove(executor: &dyn Executor, name: &str) -> Result<(), DbError> {
    let removed = executor.execute("DELETE FROM outlay_migrations WHERE name = $1", &[name.into()])?;
    if removed == 0 {
        return Err(DbError::QueryError(format!(
            "ledger has no entry for '{name}'"
        )));
    }
    Ok(())
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use crate::sqlite::SqliteExecutor;
    use chrono::{Datelike, Timelike};

    #[allow(clippy::expect_used)] // Test code - expect is acceptable
    fn ledger() -> SqliteExecutor {
        let executor = SqliteExecutor::open_in_memory().expect("in-memory database");
        init(&executor).expect("ledger init");
        executor
    }

    #[test]
    #[allow(clippy::expect_used)] // Test code - expect is acceptable
    fn test_init_is_idempotent() {
        let executor = SqliteExecutor::open_in_memory().expect("in-memory database");
        assert!(!is_initialized(&executor).expect("probe"));
        init(&executor).expect("first init");
        init(&executor).expect("second init");
        assert!(is_initialized(&executor).expect("probe"));
    }

    #[test]
    #[allow(clippy::expect_used)] // Test code - expect is acceptable
    fn test_record_and_read_back() {
        let executor = ledger();
        assert_eq!(max_group_id(&executor).expect("max"), 0);
        assert!(latest_group(&executor).expect("latest").is_empty());

        record(&executor, "20250221191532_users", 1, 4).expect("record");
        record(&executor, "20250221192022_categories", 1, 2).expect("record");
        record(&executor, "20250221192157_expenses", 2, 7).expect("record");

        let all = entries(&executor).expect("entries");
        let names: Vec<&str> = all.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(
            names,
            ["20250221191532_users", "20250221192022_categories", "20250221192157_expenses"]
        );
        assert_eq!(all[0].execution_time_ms, Some(4));
        assert_eq!(max_group_id(&executor).expect("max"), 2);

        let latest = latest_group(&executor).expect("latest");
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].name, "20250221192157_expenses");

        assert!(applied_names(&executor)
            .expect("names")
            .contains("20250221192022_categories"));
    }

    #[test]
    #[allow(clippy::expect_used)] // Test code - expect is acceptable
    fn test_latest_group_is_descending() {
        let executor = ledger();
        record(&executor, "20250221191532_users", 1, 0).expect("record");
        record(&executor, "20250221192022_categories", 1, 0).expect("record");
        let latest = latest_group(&executor).expect("latest");
        assert_eq!(latest[0].name, "20250221192022_categories");
        assert_eq!(latest[1].name, "20250221191532_users");
    }

    #[test]
    #[allow(clippy::expect_used)] // Test code - expect is acceptable
    fn test_duplicate_record_fails_and_remove_missing_fails() {
        let executor = ledger();
        record(&executor, "20250221191532_users", 1, 0).expect("record");
        assert!(record(&executor, "20250221191532_users", 2, 0).is_err());

        remove(&executor, "20250221191532_users").expect("remove");
        assert!(matches!(
            remove(&executor, "20250221191532_users"),
            Err(DbError::QueryError(_))
        ));
    }

    #[test]
    #[allow(clippy::expect_used)] // Test code - expect is acceptable
    fn test_parse_timestamp_formats() {
        let ts = parse_timestamp("2025-02-21 19:15:32").expect("sqlite format");
        assert_eq!((ts.year(), ts.month(), ts.day()), (2025, 2, 21));
        assert_eq!((ts.hour(), ts.minute(), ts.second()), (19, 15, 32));

        assert!(parse_timestamp("2025-02-21 19:15:32.123456").is_ok());
        assert!(parse_timestamp("2025-02-21T19:15:32").is_ok());
        assert!(parse_timestamp("2025-02-21T19:15:32Z").is_ok());
        assert!(matches!(parse_timestamp("yesterday"), Err(DbError::ParseError(_))));
    }
}
