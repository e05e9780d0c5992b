//! Concurrent migrators against one SQLite database file
//!
//! Every migrator opens its own connection, the way separate processes would.

use outlay::executor::Executor;
use outlay::migration::{
    ledger, LockGuard, MigrationDefinition, MigrationError, MigrationGroup, Migrator,
    MigratorOptions, Registry, Step,
};
use outlay::SqliteExecutor;
use std::path::Path;
use std::sync::Barrier;
use std::time::{Duration, Instant};

#[allow(clippy::expect_used)] // Test code - expect is acceptable
fn registry(step_delay: Duration) -> Registry {
    Registry::from_definitions([
        MigrationDefinition::new(
            "20250221191532_users",
            Step::callback("create users slowly", move |executor| {
                executor.execute_batch("CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT)")?;
                std::thread::sleep(step_delay);
                Ok(())
            }),
            Step::drop_table("users"),
        ),
        MigrationDefinition::new(
            "20250221192022_categories",
            Step::sql(["CREATE TABLE categories (id INTEGER PRIMARY KEY, name TEXT)"]),
            Step::drop_table("categories"),
        ),
    ])
    .expect("registry")
}

#[allow(clippy::expect_used)] // Test code - expect is acceptable
fn open(path: &Path) -> SqliteExecutor {
    SqliteExecutor::open(path).expect("open database")
}

#[allow(clippy::expect_used)] // Test code - expect is acceptable
fn user_tables(executor: &dyn Executor) -> i64 {
    executor
        .query_one(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('users', 'categories')",
            &[],
        )
        .and_then(|row| row.get_i64(0))
        .expect("catalogue query")
}

#[test]
#[allow(clippy::expect_used)] // Test code - expect is acceptable
fn test_held_lock_blocks_second_migrator() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("expenses.db");
    let registry = registry(Duration::ZERO);

    let holder = open(&path);
    let migrator = Migrator::new(&registry);
    migrator.init(&holder).expect("init");
    let guard = LockGuard::acquire(&holder, "deploy-1:100:first", Duration::ZERO).expect("lock");

    let contender = open(&path);
    let blocked = Migrator::with_options(
        &registry,
        MigratorOptions::default()
            .with_lock_timeout(Duration::from_millis(300))
            .with_holder("deploy-2:200:second"),
    );
    match blocked.migrate(&contender) {
        Err(MigrationError::LockHeld { holder, waited }) => {
            assert_eq!(holder.as_deref(), Some("deploy-1:100:first"));
            assert!(waited >= Duration::from_millis(300));
        }
        other => unreachable!("Expected LockHeld, got {other:?}"),
    }
    assert_eq!(user_tables(&contender), 0, "no schema change without the lock");
    assert!(ledger::entries(&contender).expect("ledger").is_empty());

    // Status is lock-free and shows the holder
    let status = blocked.status(&contender).expect("status");
    assert_eq!(
        status.lock.map(|lock| lock.holder).as_deref(),
        Some("deploy-1:100:first")
    );

    drop(guard);

    let group = blocked.migrate(&contender).expect("migrate after release");
    assert_eq!(group.id, 1);
    assert_eq!(user_tables(&contender), 2);
}

#[test]
#[allow(clippy::expect_used)] // Test code - expect is acceptable
fn test_racing_migrators_apply_once() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("expenses.db");
    let registry = registry(Duration::from_millis(500));
    Migrator::new(&registry).init(&open(&path)).expect("init");

    let barrier = Barrier::new(2);
    let results: Vec<Result<MigrationGroup, MigrationError>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..2)
            .map(|i| {
                let (registry, barrier, path) = (&registry, &barrier, &path);
                scope.spawn(move || {
                    let executor = open(path);
                    let migrator = Migrator::with_options(
                        registry,
                        MigratorOptions::default()
                            .with_lock_timeout(Duration::ZERO)
                            .with_holder(format!("racer-{i}")),
                    );
                    barrier.wait();
                    migrator.migrate(&executor)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("migrator thread"))
            .collect()
    });

    let applied: Vec<&MigrationGroup> = results
        .iter()
        .filter_map(|result| result.as_ref().ok())
        .filter(|group| !group.is_zero())
        .collect();
    assert_eq!(applied.len(), 1, "exactly one migrator applies: {results:?}");
    assert_eq!(applied[0].id, 1);
    assert_eq!(applied[0].names.len(), 2);

    // The loser either saw the lock or, if it only got there afterwards, nothing pending
    for result in &results {
        match result {
            Ok(_) | Err(MigrationError::LockHeld { .. }) => {}
            Err(other) => unreachable!("Unexpected error: {other}"),
        }
    }

    let executor = open(&path);
    let entries = ledger::entries(&executor).expect("ledger");
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|entry| entry.group_id == 1));
    assert!(Migrator::new(&registry)
        .status(&executor)
        .expect("status")
        .lock
        .is_none());
}

#[test]
#[allow(clippy::expect_used)] // Test code - expect is acceptable
fn test_zero_lock_timeout_does_not_wait_on_a_busy_database() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("expenses.db");
    let registry = registry(Duration::ZERO);

    let writer = open(&path);
    Migrator::new(&registry).init(&writer).expect("init");
    // Another connection holds SQLite's write lock
    writer.execute_batch("BEGIN IMMEDIATE").expect("write lock");

    let contender = open(&path);
    let started = Instant::now();
    let result = Migrator::with_options(
        &registry,
        MigratorOptions::default().with_lock_timeout(Duration::ZERO),
    )
    .migrate(&contender);

    assert!(
        matches!(result, Err(MigrationError::LockHeld { .. })),
        "{result:?}"
    );
    assert!(
        started.elapsed() < Duration::from_secs(2),
        "waited {:?} despite a zero lock timeout",
        started.elapsed()
    );

    writer.execute_batch("ROLLBACK").expect("release write lock");
    let group = Migrator::new(&registry).migrate(&contender).expect("migrate");
    assert_eq!(group.id, 1);
}
