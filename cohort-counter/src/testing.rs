//! Shared fixtures for unit tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cohort_core::{legacy_suffix, FormId};
use tempfile::TempDir;

use crate::{
    AllocationService, CounterError, CounterResult, CounterStore, LegacyScanEstimator,
    PatientDirectory, SqliteCounterStore,
};

/// SQLite counter store living in a temporary directory.
pub struct TestStore {
    _dir: TempDir,
    store: Arc<SqliteCounterStore>,
}

impl TestStore {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteCounterStore::new(dir.path().join("counters.db")).unwrap());
        Self { _dir: dir, store }
    }

    pub fn store(&self) -> Arc<SqliteCounterStore> {
        self.store.clone()
    }
}

pub fn service_with(
    store: &TestStore,
    directory: impl PatientDirectory + 'static,
) -> AllocationService {
    AllocationService::new(store.store(), LegacyScanEstimator::new(Arc::new(directory)))
}

/// In-memory patient records.
#[derive(Clone, Debug, Default)]
pub struct StaticDirectory {
    rows: BTreeMap<FormId, Vec<String>>,
}

impl StaticDirectory {
    pub fn new(rows: &[(&str, &str)]) -> Self {
        let mut directory = Self::default();
        for (form, identifier) in rows {
            directory
                .rows
                .entry(FormId::from(*form))
                .or_default()
                .push(identifier.to_string());
        }
        directory
    }
}

impl PatientDirectory for StaticDirectory {
    fn identifiers_for_form(&self, form_id: &FormId) -> CounterResult<Vec<String>> {
        Ok(self.rows.get(form_id).cloned().unwrap_or_default())
    }

    fn forms_with_patients(&self) -> CounterResult<Vec<FormId>> {
        Ok(self.rows.keys().cloned().collect())
    }
}

/// Simulates a concurrent writer that seeds the counter row while the first
/// legacy scan is in flight.
pub struct RacingDirectory {
    inner: StaticDirectory,
    store: Arc<SqliteCounterStore>,
    raced: AtomicBool,
}

impl RacingDirectory {
    pub fn new(store: Arc<SqliteCounterStore>, rows: &[(&str, &str)]) -> Self {
        Self {
            inner: StaticDirectory::new(rows),
            store,
            raced: AtomicBool::new(false),
        }
    }
}

impl PatientDirectory for RacingDirectory {
    fn identifiers_for_form(&self, form_id: &FormId) -> CounterResult<Vec<String>> {
        let identifiers = self.inner.identifiers_for_form(form_id)?;
        if !self.raced.swap(true, Ordering::SeqCst) {
            let seed = identifiers
                .iter()
                .filter_map(|identifier| legacy_suffix(identifier))
                .max()
                .unwrap_or(0)
                + 1;
            let mut tx = self.store.begin()?;
            match tx.create(form_id, seed) {
                Ok(_) => tx.commit()?,
                Err(CounterError::DuplicateKey(_)) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(identifiers)
    }

    fn forms_with_patients(&self) -> CounterResult<Vec<FormId>> {
        self.inner.forms_with_patients()
    }
}

/// Fails scans for the listed forms.
pub struct FailingDirectory {
    inner: StaticDirectory,
    failing: Vec<FormId>,
}

impl FailingDirectory {
    pub fn new(inner: StaticDirectory, failing: &[&str]) -> Self {
        Self {
            inner,
            failing: failing.iter().map(|form| FormId::from(*form)).collect(),
        }
    }
}

impl PatientDirectory for FailingDirectory {
    fn identifiers_for_form(&self, form_id: &FormId) -> CounterResult<Vec<String>> {
        if self.failing.contains(form_id) {
            return Err(CounterError::Unavailable(format!(
                "patient table unreadable for {form_id}"
            )));
        }
        self.inner.identifiers_for_form(form_id)
    }

    fn forms_with_patients(&self) -> CounterResult<Vec<FormId>> {
        self.inner.forms_with_patients()
    }
}
