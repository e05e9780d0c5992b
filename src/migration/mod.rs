//! Migration system for Outlay
//!
//! This module provides the schema migration engine of the expense service:
//! - Migration definitions with apply/revert steps
//! - An explicit, startup-built registry
//! - Ledger of applied migrations grouped per run
//! - Table-based lock serialising migrators across processes
//! - The migrator runtime (init, migrate, rollback, status, force-unlock)
//! - Scaffold generation for new definitions
//!
//! # Example
//!
//! ```rust
//! use outlay::migration::schema::{ColumnDescriptor, ColumnType, TableDescriptor};
//! use outlay::migration::{MigrationDefinition, Migrator, Registry, Step};
//! use outlay::sqlite::SqliteExecutor;
//!
//! let users = TableDescriptor::new("users")
//!     .column(ColumnDescriptor::id("id"))
//!     .column(ColumnDescriptor::new("email", ColumnType::Varchar(None)).not_null().unique());
//!
//! let registry = Registry::from_definitions([MigrationDefinition::new(
//!     "20250221191532_users",
//!     Step::create_table(users),
//!     Step::drop_table("users"),
//! )])?;
//!
//! let executor = SqliteExecutor::open_in_memory()?;
//! let migrator = Migrator::new(&registry);
//! migrator.init(&executor)?;
//! migrator.migrate(&executor)?;
//!
//! let status = migrator.status(&executor)?;
//! assert_eq!(status.applied.len(), 1);
//! assert!(status.unapplied.is_empty());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod definition;
pub mod error;
pub mod ledger;
pub mod lock;
pub mod migrator;
pub mod registry;
pub mod scaffold;
pub mod schema;
pub mod startup;
pub mod status;

pub use definition::{Direction, MigrationDefinition, Step, StepFn};
pub use error::{MigrationError, Operation};
pub use ledger::LedgerEntry;
pub use lock::{LockGuard, LockInfo};
pub use migrator::{MigrationGroup, Migrator, MigratorOptions};
pub use registry::Registry;
pub use scaffold::Scaffold;
pub use startup::startup_migrations;
pub use status::MigrationStatus;
