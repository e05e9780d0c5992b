//! In-process migration execution helpers

use crate::executor::Executor;
use crate::migration::{MigrationError, MigrationGroup, Migrator, MigratorOptions, Registry};

/// Run migrations on application startup
///
/// Creates the migration tables if needed, then applies every pending
/// definition under the migration lock.
///
/// # Arguments
///
/// * `executor` - The database executor
/// * `registry` - Every known definition
/// * `options` - Lock timeout, statement timeout, holder token, cancellation
///
/// # Returns
///
/// The applied group (zero when the schema was already current).
///
/// # Behavior
///
/// - **First process wins:** the first instance to start takes the lock and migrates
/// - **Others wait:** later instances wait up to the lock timeout, then find nothing pending
/// - **Fail-fast:** an error here means the application should not start
///
/// # Example
///
/// ```rust,no_run
/// use outlay::connection::connect;
/// use outlay::migration::{startup_migrations, MigratorOptions, Registry};
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let executor = connect("sqlite://expenses.db")?;
///     let registry = Registry::new(); // usually built from the application's definitions
///
///     startup_migrations(executor.as_ref(), &registry, MigratorOptions::default())?;
///
///     // Continue with application startup...
///     Ok(())
/// }
/// ```
///
/// # Errors
///
/// Any `MigrationError` from `init` or `migrate`.
pub fn startup_migrations(
    executor: &dyn Executor,
    registry: &Registry,
    options: MigratorOptions,
) -> Result<MigrationGroup, MigrationError> {
    let migrator = Migrator::with_options(registry, options);
    migrator.init(executor)?;

    let group = migrator.migrate(executor)?;
    if group.is_zero() {
        log::debug!("No pending migrations to apply");
    } else {
        log::info!("Applied {} migration(s) on startup", group.names.len());
    }
    Ok(group)
}
