use std::sync::Arc;

use anyhow::{Context, Result};
use cohort_config::AllocatorSettings;
use cohort_core::{format_suffix, FormId};
use cohort_counter::{
    AllocationService, BackfillReconciler, CounterResult, CounterStore, LegacySchema,
    LegacyScanEstimator, PatientDirectory, ReconcileReport, SqliteCounterStore,
    SqlitePatientDirectory,
};
use tracing::{error, info, warn};

/// Allocator wired from settings and ready to serve enrollments.
pub struct AllocatorRuntime {
    service: AllocationService,
    reconcile_report: Option<ReconcileReport>,
}

impl AllocatorRuntime {
    /// Open storage, run the startup reconciliation pass and return the
    /// runtime. Allocation must not begin before this returns.
    pub fn start(settings: &AllocatorSettings) -> Result<Self> {
        settings.validate()?;
        let store = SqliteCounterStore::with_busy_timeout(
            &settings.database.path,
            settings.database.busy_timeout(),
        )
        .with_context(|| {
            format!(
                "failed to open counter store at {}",
                settings.database.path.display()
            )
        })?;
        let schema = LegacySchema {
            table: settings.legacy.table.clone(),
            form_column: settings.legacy.form_column.clone(),
            identifier_column: settings.legacy.identifier_column.clone(),
        };
        let patients = SqlitePatientDirectory::new(settings.legacy_path(), schema)?
            .with_busy_timeout(settings.database.busy_timeout());
        info!(
            store = %store.path().display(),
            legacy = %patients.path().display(),
            "starting patient number allocator"
        );
        Self::from_parts(
            Arc::new(store),
            Arc::new(patients),
            settings.allocation.max_attempts,
            settings.reconcile.on_startup,
        )
    }

    /// Assemble a runtime around an arbitrary store and patient directory.
    pub fn from_parts(
        store: Arc<dyn CounterStore>,
        patients: Arc<dyn PatientDirectory>,
        max_attempts: u32,
        reconcile_on_startup: bool,
    ) -> Result<Self> {
        let estimator = LegacyScanEstimator::new(patients);
        let reconcile_report = if reconcile_on_startup {
            let reconciler = BackfillReconciler::new(store.clone(), estimator.clone());
            let report = reconciler
                .run()
                .context("failed to enumerate forms for counter reconciliation")?;
            for (form, reason) in &report.failed {
                error!(
                    form = %form,
                    reason = %reason,
                    "form left without counter after reconciliation"
                );
            }
            Some(report)
        } else {
            warn!("startup reconciliation disabled; counters bootstrap lazily");
            None
        };
        let service = AllocationService::new(store, estimator).with_max_attempts(max_attempts);
        Ok(Self {
            service,
            reconcile_report,
        })
    }

    /// Next counter value for `form_id`. Failure means the enrollment must be aborted.
    pub fn allocate(&self, form_id: &FormId) -> CounterResult<u64> {
        self.service.allocate(form_id)
    }

    /// Allocate and render the value as the zero-padded identifier suffix.
    pub fn allocate_formatted(&self, form_id: &FormId) -> CounterResult<String> {
        self.allocate(form_id).map(format_suffix)
    }

    /// Last value issued for `form_id`, if it has a counter.
    pub fn counter(&self, form_id: &FormId) -> CounterResult<Option<u64>> {
        self.service.current(form_id)
    }

    pub fn reconcile_report(&self) -> Option<&ReconcileReport> {
        self.reconcile_report.as_ref()
    }

    pub fn service(&self) -> &AllocationService {
        &self.service
    }
}
