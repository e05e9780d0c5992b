//! # Outlay
//!
//! Schema migration engine for the Outlay expense service.
//!
//! Definitions are registered explicitly in a [`migration::Registry`] and
//! applied in groups by the [`migration::Migrator`], which records each run in
//! a ledger table and serialises concurrent runs with a table-based lock.
//! SQLite (default) and PostgreSQL (`postgres` feature) are supported through
//! the [`executor::Executor`] trait.

pub mod cancel;
pub mod config;
pub mod connection;
pub mod executor;
pub mod migration;

#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use cancel::CancelToken;
pub use config::MigrateConfig;
pub use connection::{connect, connect_with_cancel, ConnectionError};
pub use executor::{Backend, DbError, Executor, Row, SqlValue, Transaction};
#[cfg(feature = "postgres")]
pub use postgres::MayPostgresExecutor;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteExecutor;
