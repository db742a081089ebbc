use std::sync::Arc;

use cohort_core::FormId;
use serde::Serialize;
use tracing::{info, warn};

use crate::{CounterError, CounterResult, CounterStore, LegacyScanEstimator};

/// Outcome of a single reconciliation pass.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Forms that received a counter row, with the value they were seeded at.
    pub seeded: Vec<(FormId, u64)>,
    /// Forms that already had a counter row.
    pub skipped: Vec<FormId>,
    /// Forms whose reconciliation failed, with the reason.
    pub failed: Vec<(FormId, String)>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn forms_seen(&self) -> usize {
        self.seeded.len() + self.skipped.len() + self.failed.len()
    }
}

enum FormOutcome {
    Seeded(u64),
    Skipped,
}

/// Startup pass that materializes counter rows for every form already holding
/// patient data, so lazy bootstrap only happens for brand-new forms.
pub struct BackfillReconciler {
    store: Arc<dyn CounterStore>,
    estimator: LegacyScanEstimator,
}

impl BackfillReconciler {
    pub fn new(store: Arc<dyn CounterStore>, estimator: LegacyScanEstimator) -> Self {
        Self { store, estimator }
    }

    /// Reconcile every known form. Each form is committed on its own; one
    /// form failing is recorded in the report and does not stop the pass.
    pub fn run(&self) -> CounterResult<ReconcileReport> {
        let forms = self.estimator.patients().forms_with_patients()?;
        let mut report = ReconcileReport::default();
        for form_id in forms {
            match self.reconcile_form(&form_id) {
                Ok(FormOutcome::Seeded(value)) => report.seeded.push((form_id, value)),
                Ok(FormOutcome::Skipped) => report.skipped.push(form_id),
                Err(err) => {
                    warn!(form = %form_id, error = %err, "failed to reconcile form counter");
                    report.failed.push((form_id, err.to_string()));
                }
            }
        }
        info!(
            seeded = report.seeded.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "counter reconciliation complete"
        );
        Ok(report)
    }

    fn reconcile_form(&self, form_id: &FormId) -> CounterResult<FormOutcome> {
        if self.store.get(form_id)?.is_some() {
            return Ok(FormOutcome::Skipped);
        }
        let legacy_max = self.estimator.estimate_max(form_id)?;
        let seed = legacy_max.checked_add(1).ok_or_else(|| {
            CounterError::Unavailable(format!("legacy counter for form {form_id} is exhausted"))
        })?;
        let mut tx = self.store.begin()?;
        match tx.create(form_id, seed) {
            Ok(_) => {
                tx.commit()?;
                info!(form = %form_id, legacy_max, value = seed, "seeded form counter");
                Ok(FormOutcome::Seeded(seed))
            }
            // A live allocation created the row first.
            Err(CounterError::DuplicateKey(_)) => Ok(FormOutcome::Skipped),
            Err(err) => Err(err),
        }
    }
}
