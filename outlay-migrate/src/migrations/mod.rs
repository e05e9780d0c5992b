//! Migration definitions of the expense service
//!
//! `db create <label>` writes a new `m<name>.rs` skeleton here; declare it
//! below and add its `definition()` to [`registry`].

use outlay::migration::{MigrationError, Registry};

pub mod m20250221191532_users;
pub mod m20250221192022_categories;
pub mod m20250221192157_expenses;

/// Every definition of the service, built once at startup
///
/// # Errors
///
/// Returns `MigrationError::DuplicateName` or `MigrationError::InvalidName`
/// if a definition is misnamed.
pub fn registry() -> Result<Registry, MigrationError> {
    Registry::from_definitions([
        m20250221191532_users::definition(),
        m20250221192022_categories::definition(),
        m20250221192157_expenses::definition(),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use outlay::Backend;

    #[test]
    #[allow(clippy::expect_used)] // Test code - expect is acceptable
    fn test_registry_order() {
        let registry = registry().expect("registry builds");
        let names: Vec<&str> = registry.names().collect();
        assert_eq!(
            names,
            [
                "20250221191532_users",
                "20250221192022_categories",
                "20250221192157_expenses",
            ]
        );
    }

    #[test]
    fn test_expenses_references_users_and_categories() {
        let sql = m20250221192157_expenses::table().create_sql(Backend::Sqlite);
        assert!(sql.contains("REFERENCES \"users\""), "{sql}");
        assert!(sql.contains("REFERENCES \"categories\""), "{sql}");
        assert!(sql.contains("ON DELETE CASCADE"), "{sql}");
        assert!(sql.contains("ON DELETE SET NULL"), "{sql}");
    }

    #[test]
    fn test_users_email_is_unique() {
        let sql = m20250221191532_users::table().create_sql(Backend::Postgres);
        assert!(sql.contains("\"email\""), "{sql}");
        assert!(sql.contains("UNIQUE"), "{sql}");
    }
}
