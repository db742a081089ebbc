//! Typed settings for the Cohort allocator.
//!
//! Settings are resolved once at startup from an optional TOML file, then from
//! environment variables prefixed `COHORT__` using `__` as the section
//! separator (`COHORT__DATABASE__BUSY_TIMEOUT_MS=2000`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use cohort_core::{is_sql_identifier, DEFAULT_MAX_ATTEMPTS};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

pub const ENV_PREFIX: &str = "COHORT";
pub const ENV_SEPARATOR: &str = "__";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatorSettings {
    pub database: DatabaseSettings,
    pub allocation: AllocationSettings,
    pub legacy: LegacySettings,
    pub reconcile: ReconcileSettings,
    pub telemetry: TelemetrySettings,
}

/// Location of the counter store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub path: PathBuf,
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/cohort.db"),
            busy_timeout_ms: 5_000,
        }
    }
}

impl DatabaseSettings {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocationSettings {
    /// Bootstrap conflicts tolerated before an allocation fails.
    pub max_attempts: u32,
}

impl Default for AllocationSettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Where legacy patient identifiers live.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LegacySettings {
    /// Patient database, when it is not the counter database.
    pub path: Option<PathBuf>,
    pub table: String,
    pub form_column: String,
    pub identifier_column: String,
}

impl Default for LegacySettings {
    fn default() -> Self {
        Self {
            path: None,
            table: "patients".to_string(),
            form_column: "form_id".to_string(),
            identifier_column: "patient_identifier".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileSettings {
    pub on_startup: bool,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self { on_startup: true }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    pub json: bool,
    /// Also write daily-rotated log files here.
    pub log_dir: Option<PathBuf>,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
            log_dir: None,
        }
    }
}

impl AllocatorSettings {
    /// Parse settings from a TOML document, ignoring the environment.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let settings: Self = Config::builder()
            .add_source(File::from_str(contents, FileFormat::Toml))
            .build()
            .context("failed to parse settings")?
            .try_deserialize()
            .context("invalid settings")?;
        settings.validate()?;
        Ok(settings)
    }

    /// Patient database path, falling back to the counter database.
    pub fn legacy_path(&self) -> &Path {
        self.legacy.path.as_deref().unwrap_or(self.database.path.as_path())
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.path.as_os_str().is_empty() {
            bail!("database.path must not be empty");
        }
        if self.database.busy_timeout_ms == 0 {
            bail!("database.busy_timeout_ms must be positive");
        }
        if self.allocation.max_attempts == 0 {
            bail!("allocation.max_attempts must be at least 1");
        }
        for (key, value) in [
            ("legacy.table", &self.legacy.table),
            ("legacy.form_column", &self.legacy.form_column),
            ("legacy.identifier_column", &self.legacy.identifier_column),
        ] {
            if !is_sql_identifier(value) {
                bail!("{key} must be a plain SQL identifier, got {value:?}");
            }
        }
        Ok(())
    }
}

/// Load settings from `path` (when given) and the process environment.
pub fn load_settings(path: Option<&Path>) -> Result<AllocatorSettings> {
    load_with_environment(path, environment())
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_SEPARATOR)
        .separator(ENV_SEPARATOR)
        .try_parsing(true)
}

fn load_with_environment(path: Option<&Path>, env: Environment) -> Result<AllocatorSettings> {
    let mut builder = Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
    }
    let settings: AllocatorSettings = builder
        .add_source(env)
        .build()
        .with_context(|| match path {
            Some(path) => format!("failed to load settings from {}", path.display()),
            None => "failed to load settings from environment".to_string(),
        })?
        .try_deserialize()
        .context("invalid settings")?;
    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::tempdir;

    fn env(vars: &[(&str, &str)]) -> Environment {
        let source: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        environment().source(Some(source))
    }

    #[test]
    fn defaults_apply_without_sources() {
        let settings = load_with_environment(None, env(&[])).unwrap();
        assert_eq!(settings, AllocatorSettings::default());
        assert_eq!(settings.allocation.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert!(settings.reconcile.on_startup);
        assert_eq!(settings.legacy_path(), Path::new("data/cohort.db"));
    }

    #[test]
    fn file_values_are_overridden_by_environment() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cohort.toml");
        fs::write(
            &path,
            r#"
[database]
path = "/var/lib/cohort/counters.db"
busy_timeout_ms = 250

[legacy]
path = "/var/lib/clinic/app.db"
table = "patient"

[telemetry]
json = true
"#,
        )
        .unwrap();

        let settings = load_with_environment(
            Some(&path),
            env(&[
                ("COHORT__DATABASE__BUSY_TIMEOUT_MS", "900"),
                ("COHORT__RECONCILE__ON_STARTUP", "false"),
            ]),
        )
        .unwrap();
        assert_eq!(
            settings.database.path,
            PathBuf::from("/var/lib/cohort/counters.db")
        );
        assert_eq!(settings.database.busy_timeout(), Duration::from_millis(900));
        assert_eq!(settings.legacy_path(), Path::new("/var/lib/clinic/app.db"));
        assert_eq!(settings.legacy.table, "patient");
        assert_eq!(settings.legacy.identifier_column, "patient_identifier");
        assert!(!settings.reconcile.on_startup);
        assert!(settings.telemetry.json);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        let err = load_with_environment(Some(&dir.path().join("absent.toml")), env(&[]));
        assert!(err.is_err());
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(AllocatorSettings::from_toml("[allocation]\nmax_attempts = 0\n").is_err());
        assert!(AllocatorSettings::from_toml("[legacy]\ntable = \"patients--\"\n").is_err());
        assert!(AllocatorSettings::from_toml("[database]\nbusy_timeout_ms = 0\n").is_err());
        let settings = AllocatorSettings::from_toml("[allocation]\nmax_attempts = 5\n").unwrap();
        assert_eq!(settings.allocation.max_attempts, 5);
    }
}
