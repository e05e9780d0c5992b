//! Migration registry
//!
//! The registry is an explicit value built once at process start and passed
//! by reference to the [`Migrator`](crate::migration::Migrator). It never
//! changes after startup.

use crate::migration::{MigrationDefinition, MigrationError};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// `YYYYMMDDHHMMSS_label`, label lowercase alphanumerics and underscores
static NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)] // Constant pattern
    Regex::new(r"^(\d{14})_([0-9a-z_]+)$").expect("name pattern is valid")
});

/// Split a definition name into its timestamp prefix and label
///
/// # Errors
///
/// Returns `MigrationError::InvalidName` if the name does not match
/// `YYYYMMDDHHMMSS_label`.
pub fn parse_name(name: &str) -> Result<(&str, &str), MigrationError> {
    let caps = NAME_PATTERN
        .captures(name)
        .ok_or_else(|| MigrationError::InvalidName {
            name: name.to_string(),
            reason: "expected YYYYMMDDHHMMSS_label with a lowercase [0-9a-z_] label".to_string(),
        })?;
    match (caps.get(1), caps.get(2)) {
        (Some(timestamp), Some(label)) => Ok((timestamp.as_str(), label.as_str())),
        _ => Err(MigrationError::InvalidName {
            name: name.to_string(),
            reason: "missing timestamp or label".to_string(),
        }),
    }
}

/// Catalogue of every known migration definition, ordered by name
#[derive(Debug, Clone, Default)]
pub struct Registry {
    definitions: BTreeMap<String, MigrationDefinition>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from definitions, failing on the first bad one
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::DuplicateName` or `MigrationError::InvalidName`.
    pub fn from_definitions<I>(definitions: I) -> Result<Self, MigrationError>
    where
        I: IntoIterator<Item = MigrationDefinition>,
    {
        let mut registry = Self::new();
        for definition in definitions {
            registry.register(definition)?;
        }
        Ok(registry)
    }

    /// Register a definition
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::DuplicateName` if the name is taken and
    /// `MigrationError::InvalidName` if it is not `YYYYMMDDHHMMSS_label`.
    pub fn register(&mut self, definition: MigrationDefinition) -> Result<(), MigrationError> {
        parse_name(definition.name())?;
        if self.definitions.contains_key(definition.name()) {
            return Err(MigrationError::DuplicateName {
                name: definition.name().to_string(),
            });
        }
        self.definitions
            .insert(definition.name().to_string(), definition);
        Ok(())
    }

    /// All definitions, ascending by name
    pub fn all(&self) -> impl DoubleEndedIterator<Item = &MigrationDefinition> + '_ {
        self.definitions.values()
    }

    pub fn names(&self) -> impl DoubleEndedIterator<Item = &str> + '_ {
        self.definitions.keys().map(String::as_str)
    }

    pub fn get(&self, name: &str) -> Option<&MigrationDefinition> {
        self.definitions.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    /// The name that sorts last, if any
    pub fn last_name(&self) -> Option<&str> {
        self.definitions.keys().next_back().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::Step;

    fn def(name: &str) -> MigrationDefinition {
        MigrationDefinition::new(name, Step::noop(), Step::noop())
    }

    #[test]
    #[allow(clippy::expect_used)] // Test code - expect is acceptable
    fn test_all_is_sorted_and_restartable() {
        let registry = Registry::from_definitions([
            def("20250221192157_expenses"),
            def("20250221191532_users"),
            def("20250221192022_categories"),
        ])
        .expect("valid registry");

        let expected = [
            "20250221191532_users",
            "20250221192022_categories",
            "20250221192157_expenses",
        ];
        let first: Vec<&str> = registry.all().map(MigrationDefinition::name).collect();
        let second: Vec<&str> = registry.names().collect();
        assert_eq!(first, expected);
        assert_eq!(second, expected);
        assert_eq!(registry.last_name(), Some("20250221192157_expenses"));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    #[allow(clippy::expect_used)] // Test code - expect is acceptable
    fn test_duplicate_name_is_rejected() {
        let mut registry = Registry::new();
        registry
            .register(def("20250221191532_users"))
            .expect("first registration succeeds");

        match registry.register(def("20250221191532_users")) {
            Err(MigrationError::DuplicateName { name }) => assert_eq!(name, "20250221191532_users"),
            #[allow(clippy::panic)] // Test code - panic is acceptable
            other => panic!("Expected DuplicateName, got {other:?}"),
        }
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_invalid_names_are_rejected() {
        for name in ["users", "2025_users", "20250221191532_Users", "20250221191532_", "20250221191532-users"] {
            assert!(
                matches!(Registry::new().register(def(name)), Err(MigrationError::InvalidName { .. })),
                "{name} should be rejected"
            );
        }
    }

    #[test]
    #[allow(clippy::expect_used)] // Test code - expect is acceptable
    fn test_parse_name() {
        let (timestamp, label) = parse_name("20250221192157_expenses").expect("valid name");
        assert_eq!(timestamp, "20250221192157");
        assert_eq!(label, "expenses");
    }

    #[test]
    fn test_empty_registry() {
        let registry = Registry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.last_name(), None);
        assert_eq!(registry.all().count(), 0);
    }
}
