//! `db` subcommand handlers
//!
//! Each handler maps to one migrator operation and prints a human summary.
//! Errors are returned to `main`, which prints them and picks the exit code.

use colored::Colorize;
use outlay::migration::{MigrationError, MigrationStatus, Migrator};
use outlay::{ConnectionError, Executor, MigrateConfig};
use std::path::Path;
use thiserror::Error;

/// Exit code for "another migrator holds the lock, retry later"
pub const EXIT_LOCK_HELD: i32 = 2;
/// Exit code for every other failure
pub const EXIT_FAILURE: i32 = 1;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Migration(#[from] MigrationError),
    #[error("Failed to render status as JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Failed to install the interrupt handler: {0}")]
    Signal(#[from] ctrlc::Error),
}

impl CommandError {
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            CommandError::Migration(e) if e.is_retryable() => EXIT_LOCK_HELD,
            _ => EXIT_FAILURE,
        }
    }
}

/// Database URL precedence: `--database-url`, then `DATABASE_URL`, then configuration
#[must_use]
pub fn resolve_database_url(
    flag: Option<&str>,
    env: Option<String>,
    config: &MigrateConfig,
) -> String {
    flag.map(str::to_string)
        .or(env.filter(|url| !url.trim().is_empty()))
        .unwrap_or_else(|| config.database_url.clone())
}

pub fn handle_init(migrator: &Migrator, executor: &dyn Executor) -> Result<(), CommandError> {
    migrator.init(executor)?;
    println!("{} Migration tables initialized", "✅".green());
    Ok(())
}

pub fn handle_migrate(migrator: &Migrator, executor: &dyn Executor) -> Result<(), CommandError> {
    let group = migrator.migrate(executor)?;
    if group.is_zero() {
        println!("{} No new migrations to run", "✅".green());
    } else {
        println!("{} Migrations applied: {group}", "✅".green());
    }
    Ok(())
}

pub fn handle_rollback(migrator: &Migrator, executor: &dyn Executor) -> Result<(), CommandError> {
    let group = migrator.rollback(executor)?;
    if group.is_zero() {
        println!("{} No migrations to roll back", "✅".green());
    } else {
        println!("{} Migrations rolled back: {group}", "⚠️".yellow());
    }
    Ok(())
}

pub fn handle_status(
    migrator: &Migrator,
    executor: &dyn Executor,
    json: bool,
) -> Result<(), CommandError> {
    let status = migrator.status(executor)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print!("{}", render_status(&status));
    }
    Ok(())
}

/// Human-readable status report
#[must_use]
pub fn render_status(status: &MigrationStatus) -> String {
    let mut out = String::from("\n📊 Migration Status\n\n");

    if status.applied.is_empty() {
        out.push_str("✅ Applied Migrations: None\n");
    } else {
        out.push_str(&format!("✅ Applied Migrations ({}):\n", status.applied.len()));
        for entry in &status.applied {
            let time = entry
                .execution_time_ms
                .map_or_else(|| "N/A".to_string(), |ms| format!("{ms}ms"));
            out.push_str(&format!(
                "  {} {} (group #{}, {}, {time})\n",
                "✓".green(),
                entry.name,
                entry.group_id,
                entry.applied_at.format("%Y-%m-%d %H:%M:%S"),
            ));
        }
    }
    out.push('\n');

    if status.unapplied.is_empty() {
        out.push_str("⏳ Unapplied Migrations: None\n");
    } else {
        out.push_str(&format!("⏳ Unapplied Migrations ({}):\n", status.unapplied.len()));
        for name in &status.unapplied {
            out.push_str(&format!("  {} {name}\n", "⏳".yellow()));
        }
    }

    if !status.orphaned.is_empty() {
        out.push_str(&format!(
            "\n{} Applied but not registered ({}):\n",
            "⚠️".yellow(),
            status.orphaned.len()
        ));
        for entry in &status.orphaned {
            out.push_str(&format!("  ? {} (group #{})\n", entry.name, entry.group_id));
        }
    }

    if let Some(lock) = &status.lock {
        out.push_str(&format!(
            "\n🔒 Lock held by {} since {}\n",
            lock.holder.bold(),
            lock.acquired_at.format("%Y-%m-%d %H:%M:%S")
        ));
    }

    out.push_str(&format!(
        "\n📈 Summary: {} applied, {} unapplied\n",
        status.applied.len(),
        status.unapplied.len()
    ));
    out
}

/// Generate a new definition; the label words are joined with `_`
pub fn handle_create(
    migrator: &Migrator,
    labels: &[String],
    migrations_dir: &Path,
    dry_run: bool,
) -> Result<(), CommandError> {
    let scaffold = migrator.create_definition(&labels.join("_"))?;

    if dry_run {
        println!("Would create {}:\n", migrations_dir.join(&scaffold.file_name).display());
        print!("{}", scaffold.contents);
        return Ok(());
    }

    let path = scaffold.write_to(migrations_dir)?;
    println!("{} Generated migration: {}", "✅".green(), path.display());
    println!(
        "   Declare `pub mod {};` in {} and add `{}::definition()` to registry()",
        scaffold.module_name,
        migrations_dir.join("mod.rs").display(),
        scaffold.module_name
    );
    Ok(())
}

pub fn handle_unlock(migrator: &Migrator, executor: &dyn Executor) -> Result<(), CommandError> {
    match migrator.force_unlock(executor)? {
        Some(lock) => println!(
            "{} Released migration lock held by {} since {}",
            "⚠️".yellow(),
            lock.holder,
            lock.acquired_at.format("%Y-%m-%d %H:%M:%S")
        ),
        None => println!("{} No migration lock was held", "✅".green()),
    }
    Ok(())
}
