//! PostgreSQL executor over `may_postgres`
//!
//! Enabled with the `postgres` feature. Statement timeouts map onto the
//! session-level `statement_timeout` setting.

use crate::executor::{Backend, DbError, Executor, Row, SqlValue};
use may_postgres::types::{ToSql, Type};
use may_postgres::Client;
use std::time::{Duration, Instant};

/// Implementation of `Executor` for `may_postgres::Client`
pub struct MayPostgresExecutor {
    client: Client,
}

impl MayPostgresExecutor {
    /// Create a new executor from a `may_postgres::Client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Get a reference to the underlying client
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Consume the executor and return the underlying client
    pub fn into_client(self) -> Client {
        self.client
    }
}

fn to_postgres_params(params: &[SqlValue]) -> Vec<Box<dyn ToSql>> {
    params
        .iter()
        .map(|value| -> Box<dyn ToSql> {
            match value {
                SqlValue::Null => Box::new(None::<String>),
                SqlValue::Integer(v) => Box::new(*v),
                SqlValue::Text(s) => Box::new(s.clone()),
            }
        })
        .collect()
}

fn convert_row(row: &may_postgres::Row) -> Result<Row, DbError> {
    let mut values = Vec::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        let ty = column.type_();
        let value = if *ty == Type::INT8 {
            row.try_get::<_, Option<i64>>(idx)?.map(SqlValue::Integer)
        } else if *ty == Type::INT4 {
            row.try_get::<_, Option<i32>>(idx)?
                .map(|v| SqlValue::Integer(i64::from(v)))
        } else if *ty == Type::INT2 {
            row.try_get::<_, Option<i16>>(idx)?
                .map(|v| SqlValue::Integer(i64::from(v)))
        } else if *ty == Type::BOOL {
            row.try_get::<_, Option<bool>>(idx)?
                .map(|v| SqlValue::Integer(i64::from(v)))
        } else {
            row.try_get::<_, Option<String>>(idx)?.map(SqlValue::Text)
        };
        values.push(value.unwrap_or(SqlValue::Null));
    }
    Ok(Row::new(values))
}

impl Executor for MayPostgresExecutor {
    fn backend(&self) -> Backend {
        Backend::Postgres
    }

    fn execute(&self, query: &str, params: &[SqlValue]) -> Result<u64, DbError> {
        let start = Instant::now();
        let owned = to_postgres_params(params);
        let refs: Vec<&dyn ToSql> = owned.iter().map(AsRef::as_ref).collect();
        let result = self.client.execute(query, &refs).map_err(DbError::PostgresError);
        log::trace!("postgres execute ({:?}): {query}", start.elapsed());
        result
    }

    fn execute_batch(&self, sql: &str) -> Result<(), DbError> {
        log::trace!("postgres batch: {sql}");
        self.client.batch_execute(sql).map_err(DbError::PostgresError)
    }

    fn query_all(&self, query: &str, params: &[SqlValue]) -> Result<Vec<Row>, DbError> {
        let start = Instant::now();
        let owned = to_postgres_params(params);
        let refs: Vec<&dyn ToSql> = owned.iter().map(AsRef::as_ref).collect();
        let rows = self.client.query(query, &refs)?;
        log::trace!("postgres query ({:?}): {query}", start.elapsed());
        rows.iter().map(convert_row).collect()
    }

    fn set_statement_timeout(&self, timeout: Option<Duration>) -> Result<(), DbError> {
        match timeout {
            Some(t) => self.execute_batch(&format!("SET statement_timeout = '{}ms'", t.as_millis())),
            None => self.execute_batch("RESET statement_timeout"),
        }
    }

    fn set_lock_wait_timeout(&self, timeout: Option<Duration>) -> Result<(), DbError> {
        match timeout {
            // `lock_timeout = 0` means "wait forever", so the shortest bound is 1ms
            Some(t) => self.execute_batch(&format!(
                "SET lock_timeout = '{}ms'",
                t.as_millis().max(1)
            )),
            None => self.execute_batch("RESET lock_timeout"),
        }
    }
}
