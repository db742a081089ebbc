use std::sync::Arc;

use cohort_core::{legacy_suffix, FormId};
use tracing::debug;

use crate::{CounterResult, PatientDirectory};

/// Infers the highest counter already handed out for a form from the patient
/// identifiers stored before the form had a counter row.
#[derive(Clone)]
pub struct LegacyScanEstimator {
    patients: Arc<dyn PatientDirectory>,
}

impl LegacyScanEstimator {
    pub fn new(patients: Arc<dyn PatientDirectory>) -> Self {
        Self { patients }
    }

    pub fn patients(&self) -> &Arc<dyn PatientDirectory> {
        &self.patients
    }

    /// Highest suffix embedded in the form's patient identifiers, or 0 when none parse.
    ///
    /// Takes no locks.
    pub fn estimate_max(&self, form_id: &FormId) -> CounterResult<u64> {
        let identifiers = self.patients.identifiers_for_form(form_id)?;
        let mut skipped = 0usize;
        let mut max = 0u64;
        for identifier in &identifiers {
            match legacy_suffix(identifier) {
                Some(value) => max = max.max(value),
                None => skipped += 1,
            }
        }
        debug!(
            form = %form_id,
            scanned = identifiers.len(),
            skipped,
            max,
            "estimated legacy counter"
        );
        Ok(max)
    }
}
