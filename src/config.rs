//! Migration settings
//!
//! [`MigrateConfig::load`] reads `config/config.toml` (optional) and
//! `OUTLAY__*` environment variables, section `[migrations]`:
//!
//! ```toml
//! [migrations]
//! database_url = "sqlite://expenses.db"
//! migrations_dir = "outlay-migrate/src/migrations"
//! lock_timeout_seconds = 60
//! statement_timeout_seconds = 300
//! ```
//!
//! e.g. `OUTLAY__MIGRATIONS__LOCK_TIMEOUT_SECONDS=10`.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

const CONFIG_FILE: &str = "config/config.toml";

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct MigrateConfig {
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_migrations_dir")]
    pub migrations_dir: PathBuf,
    #[serde(default = "default_lock_timeout_seconds")]
    pub lock_timeout_seconds: u64,
    /// Per-statement bound for apply/revert steps; `None` leaves statements unbounded
    #[serde(default)]
    pub statement_timeout_seconds: Option<u64>,
}

fn default_database_url() -> String {
    "sqlite://expenses.db".to_string()
}

fn default_migrations_dir() -> PathBuf {
    PathBuf::from("outlay-migrate/src/migrations")
}

fn default_lock_timeout_seconds() -> u64 {
    60
}

impl Default for MigrateConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            migrations_dir: default_migrations_dir(),
            lock_timeout_seconds: default_lock_timeout_seconds(),
            statement_timeout_seconds: None,
        }
    }
}

impl MigrateConfig {
    /// Load the migration configuration from `config/config.toml`, falling back to env vars.
    ///
    /// A missing `[migrations]` section yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if neither the file nor the environment can be read,
    /// or if the section has values of the wrong type.
    pub fn load() -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name(CONFIG_FILE).required(false))
            .add_source(Environment::with_prefix("OUTLAY").separator("__"));

        let settings = match builder.build() {
            Ok(cfg) => cfg,
            Err(err) => {
                // File existed but was unreadable: warn and retry with env only
                if std::path::Path::new(CONFIG_FILE).exists() {
                    log::warn!("Failed to load {CONFIG_FILE}, falling back to env. Error: {err}");
                }
                Config::builder()
                    .add_source(Environment::with_prefix("OUTLAY").separator("__"))
                    .build()
                    .map_err(|env_err| {
                        ConfigError::Message(format!(
                            "Failed to load configuration from file and env: {err}, then env-only error: {env_err}"
                        ))
                    })?
            }
        };

        Self::from_settings(&settings)
    }

    fn from_settings(settings: &Config) -> Result<Self, ConfigError> {
        match settings.get::<MigrateConfig>("migrations") {
            Ok(cfg) => Ok(cfg),
            Err(ConfigError::NotFound(_)) => Ok(Self::default()),
            Err(e) => Err(ConfigError::Message(format!(
                "Migration configuration is invalid: {e}"
            ))),
        }
    }

    #[must_use]
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_seconds)
    }

    #[must_use]
    pub fn statement_timeout(&self) -> Option<Duration> {
        self.statement_timeout_seconds.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    #[test]
    #[allow(clippy::expect_used)] // Test code - expect is acceptable
    fn test_missing_section_uses_defaults() {
        let settings = Config::builder().build().expect("empty config");
        let cfg = MigrateConfig::from_settings(&settings).expect("defaults");
        assert_eq!(cfg, MigrateConfig::default());
        assert_eq!(cfg.lock_timeout(), Duration::from_secs(60));
        assert_eq!(cfg.statement_timeout(), None);
    }

    #[test]
    #[allow(clippy::expect_used)] // Test code - expect is acceptable
    fn test_partial_section_fills_defaults() {
        let settings = Config::builder()
            .add_source(File::from_str(
                "[migrations]\ndatabase_url = \"sqlite::memory:\"\nstatement_timeout_seconds = 30\n",
                FileFormat::Toml,
            ))
            .build()
            .expect("toml config");
        let cfg = MigrateConfig::from_settings(&settings).expect("parsed");
        assert_eq!(cfg.database_url, "sqlite::memory:");
        assert_eq!(cfg.statement_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(cfg.lock_timeout_seconds, 60);
        assert_eq!(cfg.migrations_dir, PathBuf::from("outlay-migrate/src/migrations"));
    }

    #[test]
    #[allow(clippy::expect_used)] // Test code - expect is acceptable
    fn test_wrong_type_is_error() {
        let settings = Config::builder()
            .add_source(File::from_str(
                "[migrations]\nlock_timeout_seconds = \"soon\"\n",
                FileFormat::Toml,
            ))
            .build()
            .expect("toml config");
        assert!(MigrateConfig::from_settings(&settings).is_err());
    }
}
