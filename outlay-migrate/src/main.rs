//! Outlay Migration CLI Tool
//!
//! Command-line interface for managing the expense service's database schema.
//! Exit codes: 0 on success (including "nothing to do"), 2 when another
//! migrator holds the lock, 1 for every other failure.

use clap::{Parser, Subcommand};
use outlay::migration::{Migrator, MigratorOptions};
use outlay::{connect_with_cancel, CancelToken, MigrateConfig};
use outlay_migrate::commands::{self, CommandError};
use outlay_migrate::migrations;
use std::path::PathBuf;
use std::process;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "outlay-migrate")]
#[command(about = "Schema migration tool for the Outlay expense service")]
#[command(version)]
struct Cli {
    /// Database connection URL (`sqlite://expenses.db`, `postgres://...`)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Directory `db create` writes new migration skeletons to
    #[arg(long, global = true)]
    migrations_dir: Option<PathBuf>,

    /// Seconds to wait for the migration lock
    #[arg(long, global = true)]
    lock_timeout: Option<u64>,

    /// Per-statement timeout in seconds for apply/revert steps
    #[arg(long, global = true)]
    statement_timeout: Option<u64>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet output (errors only)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database migrations
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
}

#[derive(Subcommand)]
enum DbCommand {
    /// Create the migration ledger and lock tables
    Init,

    /// Apply all pending migrations as one group
    Migrate,

    /// Roll back the most recent group
    Rollback,

    /// Show applied and unapplied migrations
    Status {
        /// Print the status as JSON
        #[arg(long)]
        json: bool,
    },

    /// Generate a new migration skeleton
    Create {
        /// Migration label; words are joined with `_` (e.g. `add expense notes`)
        labels: Vec<String>,

        /// Print the skeleton instead of writing it
        #[arg(long)]
        dry_run: bool,
    },

    /// Force-release a migration lock left behind by a crashed process
    Unlock,
}

fn main() {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    // Initialize logging
    if cli.quiet {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("error")).init();
    } else if cli.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    match run(cli) {
        Ok(()) => process::exit(0),
        Err(e) => {
            eprintln!("❌ Error: {e}");
            process::exit(e.exit_code());
        }
    }
}

fn run(cli: Cli) -> Result<(), CommandError> {
    let config = MigrateConfig::load().map_err(|e| CommandError::Config(e.to_string()))?;

    let database_url = commands::resolve_database_url(
        cli.database_url.as_deref(),
        std::env::var("DATABASE_URL").ok(),
        &config,
    );
    let migrations_dir = cli
        .migrations_dir
        .clone()
        .unwrap_or_else(|| config.migrations_dir.clone());

    let mut options = MigratorOptions::default()
        .with_lock_timeout(config.lock_timeout())
        .with_statement_timeout(config.statement_timeout());
    if let Some(seconds) = cli.lock_timeout {
        options = options.with_lock_timeout(Duration::from_secs(seconds));
    }
    if let Some(seconds) = cli.statement_timeout {
        options = options.with_statement_timeout(Some(Duration::from_secs(seconds)));
    }

    // Ctrl-C interrupts the running step; the lock guard still releases the lock
    let cancel = CancelToken::new();
    let on_signal = cancel.clone();
    ctrlc::set_handler(move || {
        log::warn!("Received interrupt signal, cancelling");
        on_signal.cancel();
    })?;
    let options = options.with_cancel(cancel.clone());

    let registry = migrations::registry()?;
    let migrator = Migrator::with_options(&registry, options);

    let Commands::Db { command } = cli.command;

    // Scaffolding never touches the database
    if let DbCommand::Create { labels, dry_run } = &command {
        return commands::handle_create(&migrator, labels, &migrations_dir, *dry_run);
    }

    log::debug!("Connecting to {database_url}");
    let executor = connect_with_cancel(&database_url, Some(cancel))?;
    let executor = executor.as_ref();

    match command {
        DbCommand::Init => commands::handle_init(&migrator, executor),
        DbCommand::Migrate => commands::handle_migrate(&migrator, executor),
        DbCommand::Rollback => commands::handle_rollback(&migrator, executor),
        DbCommand::Status { json } => commands::handle_status(&migrator, executor, json),
        DbCommand::Unlock => commands::handle_unlock(&migrator, executor),
        DbCommand::Create { .. } => Ok(()),
    }
}
