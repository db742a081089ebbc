use std::path::{Path, PathBuf};
use std::time::Duration;

use cohort_core::{is_sql_identifier, FormId};
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::{CounterError, CounterResult, DEFAULT_BUSY_TIMEOUT};

/// Read-only view over persisted patient records.
pub trait PatientDirectory: Send + Sync {
    /// Every stored patient identifier belonging to `form_id`. Values that are
    /// not text are rendered as text rather than rejected.
    fn identifiers_for_form(&self, form_id: &FormId) -> CounterResult<Vec<String>>;

    /// Distinct forms with at least one patient record, in ascending order.
    fn forms_with_patients(&self) -> CounterResult<Vec<FormId>>;
}

/// Table and column names of the patient records consulted for legacy identifiers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LegacySchema {
    pub table: String,
    pub form_column: String,
    pub identifier_column: String,
}

impl Default for LegacySchema {
    fn default() -> Self {
        Self {
            table: "patients".to_string(),
            form_column: "form_id".to_string(),
            identifier_column: "patient_identifier".to_string(),
        }
    }
}

impl LegacySchema {
    pub fn validate(&self) -> CounterResult<()> {
        for name in [&self.table, &self.form_column, &self.identifier_column] {
            if !is_sql_identifier(name) {
                return Err(CounterError::Unavailable(format!(
                    "invalid legacy schema identifier: {name:?}"
                )));
            }
        }
        Ok(())
    }
}

/// Patient directory backed by a SQLite table owned by the submission workflow.
#[derive(Clone, Debug)]
pub struct SqlitePatientDirectory {
    path: PathBuf,
    schema: LegacySchema,
    busy_timeout: Duration,
}

impl SqlitePatientDirectory {
    pub fn new(path: impl Into<PathBuf>, schema: LegacySchema) -> CounterResult<Self> {
        schema.validate()?;
        Ok(Self {
            path: path.into(),
            schema,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        })
    }

    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn schema(&self) -> &LegacySchema {
        &self.schema
    }

    fn connect(&self) -> CounterResult<Option<Connection>> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "legacy patient database not found");
            return Ok(None);
        }
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(self.busy_timeout)?;
        let present = conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![self.schema.table],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if !present {
            debug!(table = %self.schema.table, "legacy patient table not found");
            return Ok(None);
        }
        Ok(Some(conn))
    }
}

impl PatientDirectory for SqlitePatientDirectory {
    fn identifiers_for_form(&self, form_id: &FormId) -> CounterResult<Vec<String>> {
        let Some(conn) = self.connect()? else {
            return Ok(Vec::new());
        };
        let sql = format!(
            "SELECT {identifier} FROM {table} \
             WHERE CAST({form} AS TEXT) = ?1 AND {identifier} IS NOT NULL",
            identifier = self.schema.identifier_column,
            table = self.schema.table,
            form = self.schema.form_column,
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params![form_id.as_str()])?;
        let mut identifiers = Vec::new();
        while let Some(row) = rows.next()? {
            if let Some(identifier) = text_value(row.get_ref(0)?) {
                identifiers.push(identifier);
            }
        }
        Ok(identifiers)
    }

    fn forms_with_patients(&self) -> CounterResult<Vec<FormId>> {
        let Some(conn) = self.connect()? else {
            return Ok(Vec::new());
        };
        let sql = format!(
            "SELECT DISTINCT CAST({form} AS TEXT) AS form_key FROM {table} \
             WHERE {form} IS NOT NULL ORDER BY form_key ASC",
            table = self.schema.table,
            form = self.schema.form_column,
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;
        let mut forms = Vec::new();
        while let Some(row) = rows.next()? {
            if let Some(form) = text_value(row.get_ref(0)?) {
                forms.push(FormId::from(form));
            }
        }
        Ok(forms)
    }
}

// Legacy columns are not guaranteed to be declared TEXT, and an untyped column
// may hold integers or blobs next to proper identifiers.
fn text_value(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(value) => Some(value.to_string()),
        ValueRef::Real(value) => Some(value.to_string()),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Some(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}
