use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use cohort_core::FormId;
use rusqlite::{ffi, params, Connection, OptionalExtension};
use tracing::warn;

use crate::{CounterError, CounterRecord, CounterResult, CounterStore, CounterTransaction};

/// How long a connection waits on the write lock before giving up.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const COUNTER_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS form_counters (
    form_id TEXT PRIMARY KEY NOT NULL,
    counter_value INTEGER NOT NULL CHECK (counter_value >= 0),
    updated_at TEXT NOT NULL
);
"#;

/// SQLite-backed counter store.
///
/// SQLite has no row locks. Transactions start with `BEGIN IMMEDIATE`, which
/// takes the database write lock, so locking a form's row excludes every other
/// writer until commit or rollback.
#[derive(Clone, Debug)]
pub struct SqliteCounterStore {
    path: PathBuf,
    busy_timeout: Duration,
}

impl SqliteCounterStore {
    pub fn new(path: impl Into<PathBuf>) -> CounterResult<Self> {
        Self::with_busy_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    pub fn with_busy_timeout(
        path: impl Into<PathBuf>,
        busy_timeout: Duration,
    ) -> CounterResult<Self> {
        let store = Self {
            path: path.into(),
            busy_timeout,
        };
        store.initialize_schema()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn initialize_schema(&self) -> CounterResult<()> {
        let conn = self.connect()?;
        conn.execute_batch(COUNTER_SCHEMA)?;
        Ok(())
    }

    fn connect(&self) -> CounterResult<Connection> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(self.busy_timeout)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
        Ok(conn)
    }
}

impl CounterStore for SqliteCounterStore {
    fn begin(&self) -> CounterResult<Box<dyn CounterTransaction>> {
        let conn = self.connect()?;
        Ok(Box::new(SqliteCounterTransaction::begin(conn)?))
    }

    fn get(&self, form_id: &FormId) -> CounterResult<Option<CounterRecord>> {
        let conn = self.connect()?;
        select_counter(&conn, form_id)
    }

    fn list(&self) -> CounterResult<Vec<CounterRecord>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT form_id, counter_value, updated_at FROM form_counters ORDER BY form_id ASC",
        )?;
        let mut rows = stmt.query([])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            let form_id: String = row.get(0)?;
            records.push(decode_record(FormId::from(form_id), row.get(1)?, row.get(2)?)?);
        }
        Ok(records)
    }
}

/// Transaction holding its own connection. Rolls back on drop unless committed.
struct SqliteCounterTransaction {
    conn: Connection,
    open: bool,
}

impl SqliteCounterTransaction {
    fn begin(conn: Connection) -> CounterResult<Self> {
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(Self { conn, open: true })
    }
}

impl CounterTransaction for SqliteCounterTransaction {
    fn lock_for_update(&mut self, form_id: &FormId) -> CounterResult<Option<CounterRecord>> {
        select_counter(&self.conn, form_id)
    }

    fn create(&mut self, form_id: &FormId, initial_value: u64) -> CounterResult<CounterRecord> {
        let record = CounterRecord::new(form_id.clone(), initial_value);
        let result = self.conn.execute(
            "INSERT INTO form_counters (form_id, counter_value, updated_at) VALUES (?1, ?2, ?3)",
            params![
                record.form_id.as_str(),
                to_sql_value(record.counter_value)?,
                record.updated_at.to_rfc3339()
            ],
        );
        match result {
            Ok(_) => Ok(record),
            Err(rusqlite::Error::SqliteFailure(err, _)) if is_unique_violation(&err) => {
                Err(CounterError::DuplicateKey(form_id.clone()))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn save(&mut self, record: &CounterRecord) -> CounterResult<()> {
        let changed = self.conn.execute(
            "UPDATE form_counters SET counter_value = ?2, updated_at = ?3 WHERE form_id = ?1",
            params![
                record.form_id.as_str(),
                to_sql_value(record.counter_value)?,
                record.updated_at.to_rfc3339()
            ],
        )?;
        if changed != 1 {
            return Err(CounterError::Unavailable(format!(
                "counter for form {} disappeared while locked",
                record.form_id
            )));
        }
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> CounterResult<()> {
        self.conn.execute_batch("COMMIT")?;
        self.open = false;
        Ok(())
    }
}

impl Drop for SqliteCounterTransaction {
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        if let Err(err) = self.conn.execute_batch("ROLLBACK") {
            warn!(error = %err, "failed to roll back counter transaction");
        }
    }
}

fn is_unique_violation(err: &ffi::Error) -> bool {
    err.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        || err.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
}

fn select_counter(conn: &Connection, form_id: &FormId) -> CounterResult<Option<CounterRecord>> {
    let row = conn
        .query_row(
            "SELECT counter_value, updated_at FROM form_counters WHERE form_id = ?1",
            params![form_id.as_str()],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
        )
        .optional()?;
    row.map(|(value, updated_at)| decode_record(form_id.clone(), value, updated_at))
        .transpose()
}

fn decode_record(form_id: FormId, value: i64, updated_at: String) -> CounterResult<CounterRecord> {
    let counter_value = u64::try_from(value).map_err(|_| {
        CounterError::Unavailable(format!("negative counter {value} stored for form {form_id}"))
    })?;
    let updated_at = DateTime::parse_from_rfc3339(&updated_at)
        .map_err(|err| {
            CounterError::Unavailable(format!(
                "invalid timestamp {updated_at} stored for form {form_id}: {err}"
            ))
        })?
        .with_timezone(&Utc);
    Ok(CounterRecord {
        form_id,
        counter_value,
        updated_at,
    })
}

fn to_sql_value(value: u64) -> CounterResult<i64> {
    i64::try_from(value).map_err(|_| {
        CounterError::Unavailable(format!("counter value {value} exceeds storage range"))
    })
}
