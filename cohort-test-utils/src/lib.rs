//! Fixtures simulating a clinic database that predates the allocator.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use cohort_config::AllocatorSettings;
use rusqlite::{params, Connection};
use tempfile::TempDir;

const PATIENT_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS patients (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    form_id TEXT NOT NULL,
    patient_identifier TEXT
);
"#;

/// Temporary SQLite database holding a `patients` table with the default
/// legacy schema. The directory is removed on drop.
pub struct LegacyDatabase {
    dir: TempDir,
    path: PathBuf,
}

impl LegacyDatabase {
    pub fn new() -> Result<Self> {
        Self::with_schema(PATIENT_SCHEMA)
    }

    /// Create the fixture from arbitrary DDL, for clinic tables whose column
    /// types differ from the default schema.
    pub fn with_schema(ddl: &str) -> Result<Self> {
        let dir = tempfile::tempdir().context("failed to create fixture directory")?;
        let path = dir.path().join("clinic.db");
        let db = Self { dir, path };
        db.execute(ddl)?;
        Ok(db)
    }

    /// Create the fixture pre-populated with `(form, identifier)` rows.
    pub fn with_patients(rows: &[(&str, &str)]) -> Result<Self> {
        let db = Self::new()?;
        for (form, identifier) in rows {
            db.insert_patient(form, identifier)?;
        }
        Ok(db)
    }

    pub fn insert_patient(&self, form: &str, identifier: &str) -> Result<()> {
        let conn = Connection::open(&self.path)?;
        conn.execute(
            "INSERT INTO patients (form_id, patient_identifier) VALUES (?1, ?2)",
            params![form, identifier],
        )?;
        Ok(())
    }

    /// Run raw SQL against the fixture database.
    pub fn execute(&self, sql: &str) -> Result<()> {
        let conn = Connection::open(&self.path)?;
        conn.execute_batch(sql)
            .with_context(|| format!("failed to execute fixture SQL on {}", self.path.display()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Settings pointing both the counter store and the legacy scan at this database.
    pub fn settings(&self) -> AllocatorSettings {
        let mut settings = AllocatorSettings::default();
        settings.database.path = self.path.clone();
        settings
    }

    /// Serialize `settings` to a TOML file inside the fixture directory.
    pub fn write_settings(&self, settings: &AllocatorSettings) -> Result<PathBuf> {
        let path = self.dir.path().join("cohort.toml");
        let contents = toml::to_string(settings).context("failed to encode settings")?;
        fs::write(&path, contents)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }
}
