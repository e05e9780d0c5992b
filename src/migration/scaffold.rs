//! Scaffold generation for new migration definitions

use crate::migration::registry::parse_name;
use crate::migration::{MigrationError, Registry};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Lowercase `label`, turn every run of non-alphanumerics into one `_`,
/// and trim leading/trailing underscores
///
/// ```rust
/// use outlay::migration::scaffold::normalize_label;
///
/// assert_eq!(normalize_label("Add Expense  notes!"), "add_expense_notes");
/// assert_eq!(normalize_label(" -- "), "");
/// ```
#[must_use]
pub fn normalize_label(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    for ch in label.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
        } else if !out.is_empty() && !out.ends_with('_') {
            out.push('_');
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

/// Smallest timestamp prefix that sorts after `last`
fn next_timestamp(last: &str) -> String {
    match NaiveDateTime::parse_from_str(last, TIMESTAMP_FORMAT) {
        Ok(ts) => (ts + Duration::seconds(1)).format(TIMESTAMP_FORMAT).to_string(),
        // Not a calendar date; any larger 14-digit number still sorts after it
        Err(_) => last
            .parse::<u64>()
            .map(|n| format!("{:014}", n.saturating_add(1)))
            .unwrap_or_else(|_| last.to_string()),
    }
}

/// A generated definition name and its Rust authoring skeleton
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scaffold {
    /// `YYYYMMDDHHMMSS_label`
    pub name: String,
    /// `m<name>`, the module the skeleton is meant to live in
    pub module_name: String,
    /// `m<name>.rs`
    pub file_name: String,
    /// Skeleton source with no-op apply/revert steps
    pub contents: String,
}

impl Scaffold {
    fn new(name: String, generated_at: DateTime<Utc>) -> Self {
        let module_name = format!("m{name}");
        let file_name = format!("{module_name}.rs");
        let contents = format!(
            r#"//! Migration: {name}
//! Generated: {generated}

use outlay::migration::{{MigrationDefinition, Step}};

pub fn definition() -> MigrationDefinition {{
    MigrationDefinition::new(
        "{name}",
        // TODO: apply, e.g. Step::sql(["ALTER TABLE expenses ADD COLUMN notes TEXT"])
        Step::noop(),
        // TODO: revert, undoing exactly what apply does
        Step::noop(),
    )
}}
"#,
            generated = generated_at.format("%Y-%m-%d %H:%M:%S UTC"),
        );
        Self {
            name,
            module_name,
            file_name,
            contents,
        }
    }

    /// Write the skeleton into `dir`, creating the directory if needed
    ///
    /// # Returns
    ///
    /// The path of the new file.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::DuplicateName` if the file already exists and
    /// `MigrationError::Io` for any other filesystem error.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf, MigrationError> {
        std::fs::create_dir_all(dir).map_err(|source| MigrationError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let path = dir.join(&self.file_name);
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|source| match source.kind() {
                ErrorKind::AlreadyExists => MigrationError::DuplicateName {
                    name: self.name.clone(),
                },
                _ => MigrationError::Io {
                    path: path.clone(),
                    source,
                },
            })?;
        file.write_all(self.contents.as_bytes())
            .map_err(|source| MigrationError::Io {
                path: path.clone(),
                source,
            })?;

        log::info!("Generated migration {}", path.display());
        Ok(path)
    }
}

/// Generate a definition name for `label` as of `now`
///
/// The name is `now` formatted as `YYYYMMDDHHMMSS` plus the normalised label.
/// When that would not sort after the last registered name (clock skew, or
/// two scaffolds within one second), the timestamp becomes one second after
/// the last registered one.
///
/// # Errors
///
/// Returns `EmptyName` if the label normalises to nothing and
/// `DuplicateName` if the name is already registered.
pub fn create_definition_at(
    registry: &Registry,
    label: &str,
    now: DateTime<Utc>,
) -> Result<Scaffold, MigrationError> {
    let label = normalize_label(label);
    if label.is_empty() {
        return Err(MigrationError::EmptyName);
    }

    let mut timestamp = now.format(TIMESTAMP_FORMAT).to_string();
    if let Some(last) = registry.last_name() {
        let (last_timestamp, _) = parse_name(last)?;
        if timestamp.as_str() <= last_timestamp {
            timestamp = next_timestamp(last_timestamp);
        }
    }

    let name = format!("{timestamp}_{label}");
    if registry.contains(&name) {
        return Err(MigrationError::DuplicateName { name });
    }
    parse_name(&name)?;

    Ok(Scaffold::new(name, now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::{MigrationDefinition, Step};
    use chrono::TimeZone;

    #[allow(clippy::expect_used)] // Test code - expect is acceptable
    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s)
            .single()
            .expect("valid timestamp")
    }

    #[allow(clippy::expect_used)] // Test code - expect is acceptable
    fn registry(names: &[&str]) -> Registry {
        Registry::from_definitions(
            names
                .iter()
                .map(|name| MigrationDefinition::new(*name, Step::noop(), Step::noop())),
        )
        .expect("registry")
    }

    #[test]
    fn test_normalize_label() {
        assert_eq!(normalize_label("users"), "users");
        assert_eq!(normalize_label("Add expense notes"), "add_expense_notes");
        assert_eq!(normalize_label("__a--b__"), "a_b");
        assert_eq!(normalize_label("späte_liste"), "sp_te_liste");
        assert_eq!(normalize_label("   "), "");
    }

    #[test]
    #[allow(clippy::expect_used)] // Test code - expect is acceptable
    fn test_name_uses_current_timestamp() {
        let scaffold = create_definition_at(
            &registry(&["20250221192157_expenses"]),
            "add notes",
            at(2025, 3, 1, 9, 0, 0),
        )
        .expect("scaffold");
        assert_eq!(scaffold.name, "20250301090000_add_notes");
        assert_eq!(scaffold.module_name, "m20250301090000_add_notes");
        assert_eq!(scaffold.file_name, "m20250301090000_add_notes.rs");
        assert!(scaffold.contents.contains("\"20250301090000_add_notes\""));
        assert!(scaffold.contents.contains("Step::noop()"));
    }

    #[test]
    #[allow(clippy::expect_used)] // Test code - expect is acceptable
    fn test_clock_behind_registry_is_bumped() {
        let registry = registry(&["20250221192157_expenses"]);

        let scaffold = create_definition_at(&registry, "backfill", at(2024, 1, 1, 0, 0, 0))
            .expect("scaffold");
        assert_eq!(scaffold.name, "20250221192158_backfill");

        // Same second, label sorting before the registered one
        let scaffold = create_definition_at(&registry, "a", at(2025, 2, 21, 19, 21, 57))
            .expect("scaffold");
        assert_eq!(scaffold.name, "20250221192158_a");
        assert!(scaffold.name.as_str() > "20250221192157_expenses");
    }

    #[test]
    fn test_next_timestamp_rolls_over() {
        assert_eq!(next_timestamp("20251231235959"), "20260101000000");
        assert_eq!(next_timestamp("20259999999999"), "20260000000000");
    }

    #[test]
    fn test_empty_label() {
        let result = create_definition_at(&Registry::new(), " ?! ", Utc::now());
        assert!(matches!(result, Err(MigrationError::EmptyName)));
    }

    #[test]
    #[allow(clippy::expect_used)] // Test code - expect is acceptable
    fn test_write_refuses_to_overwrite() {
        let dir = tempfile::tempdir().expect("temp dir");
        let target = dir.path().join("migrations");
        let scaffold = create_definition_at(&Registry::new(), "users", at(2025, 2, 21, 19, 15, 32))
            .expect("scaffold");

        let path = scaffold.write_to(&target).expect("first write");
        assert_eq!(path, target.join("m20250221191532_users.rs"));
        let written = std::fs::read_to_string(&path).expect("read back");
        assert_eq!(written, scaffold.contents);

        match scaffold.write_to(&target) {
            Err(MigrationError::DuplicateName { name }) => assert_eq!(name, "20250221191532_users"),
            other => unreachable!("Expected DuplicateName, got {other:?}"),
        }
    }
}
