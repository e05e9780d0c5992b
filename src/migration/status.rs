//! Migration status reporting

use crate::migration::ledger::LedgerEntry;
use crate::migration::lock::LockInfo;
use crate::migration::Registry;
use serde::Serialize;
use std::collections::BTreeMap;

/// Applied/unapplied split of the registry at one point in time
///
/// `applied` and `unapplied` are disjoint and together cover the registry,
/// both in registry (ascending name) order. Ledger entries whose definition is
/// no longer registered are reported in `orphaned` and counted in neither.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    pub applied: Vec<LedgerEntry>,
    pub unapplied: Vec<String>,
    pub orphaned: Vec<LedgerEntry>,
    /// Current lock holder, if a migrate or rollback is in flight (or crashed)
    pub lock: Option<LockInfo>,
}

impl MigrationStatus {
    /// Partition `registry` against a ledger snapshot
    #[must_use]
    pub fn compute(registry: &Registry, entries: Vec<LedgerEntry>, lock: Option<LockInfo>) -> Self {
        let mut recorded: BTreeMap<String, LedgerEntry> = entries
            .into_iter()
            .map(|entry| (entry.name.clone(), entry))
            .collect();

        let mut applied = Vec::new();
        let mut unapplied = Vec::new();
        for name in registry.names() {
            match recorded.remove(name) {
                Some(entry) => applied.push(entry),
                None => unapplied.push(name.to_string()),
            }
        }

        Self {
            applied,
            unapplied,
            orphaned: recorded.into_values().collect(),
            lock,
        }
    }

    #[must_use]
    pub fn is_up_to_date(&self) -> bool {
        self.unapplied.is_empty()
    }

    /// Number of registered definitions
    #[must_use]
    pub fn total(&self) -> usize {
        self.applied.len() + self.unapplied.len()
    }

    /// Highest group among applied entries
    #[must_use]
    pub fn latest_group_id(&self) -> Option<i64> {
        self.applied
            .iter()
            .chain(&self.orphaned)
            .map(|entry| entry.group_id)
            .max()
    }

    /// The next definition `migrate` would apply
    #[must_use]
    pub fn next_pending(&self) -> Option<&str> {
        self.unapplied.first().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::{MigrationDefinition, Step};
    use chrono::Utc;

    fn entry(name: &str, group_id: i64) -> LedgerEntry {
        LedgerEntry {
            name: name.to_string(),
            group_id,
            applied_at: Utc::now(),
            execution_time_ms: Some(1),
        }
    }

    #[allow(clippy::expect_used)] // Test code - expect is acceptable
    fn registry() -> Registry {
        Registry::from_definitions(
            [
                "20250221191532_users",
                "20250221192022_categories",
                "20250221192157_expenses",
            ]
            .map(|name| MigrationDefinition::new(name, Step::noop(), Step::noop())),
        )
        .expect("registry")
    }

    #[test]
    fn test_partial_application() {
        let status = MigrationStatus::compute(
            &registry(),
            vec![entry("20250221191532_users", 1)],
            None,
        );
        assert_eq!(status.applied.len(), 1);
        assert_eq!(
            status.unapplied,
            ["20250221192022_categories", "20250221192157_expenses"]
        );
        assert_eq!(status.next_pending(), Some("20250221192022_categories"));
        assert_eq!(status.total(), 3);
        assert!(!status.is_up_to_date());
    }

    #[test]
    fn test_orphans_are_reported_separately() {
        let status = MigrationStatus::compute(
            &registry(),
            vec![
                entry("20250221191532_users", 1),
                entry("20240101000000_legacy", 1),
            ],
            None,
        );
        assert_eq!(status.orphaned.len(), 1);
        assert_eq!(status.orphaned[0].name, "20240101000000_legacy");
        assert_eq!(status.total(), 3);
        assert_eq!(status.latest_group_id(), Some(1));
    }

    #[test]
    #[allow(clippy::expect_used)] // Test code - expect is acceptable
    fn test_serializes_to_json() {
        let status = MigrationStatus::compute(&registry(), Vec::new(), None);
        let json = serde_json::to_value(&status).expect("serialize");
        assert_eq!(json["unapplied"].as_array().map(Vec::len), Some(3));
        assert!(json["lock"].is_null());
        assert!(status.latest_group_id().is_none());
    }
}
