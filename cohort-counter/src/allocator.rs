use std::sync::Arc;

use cohort_core::{FormId, DEFAULT_MAX_ATTEMPTS};
use tracing::{debug, info};

use crate::{CounterError, CounterResult, CounterStore, LegacyScanEstimator};

/// Hands out fresh counter values per form.
///
/// All state lives in the [`CounterStore`]; nothing is cached in-process, so
/// several service instances may share one store.
#[derive(Clone)]
pub struct AllocationService {
    store: Arc<dyn CounterStore>,
    estimator: LegacyScanEstimator,
    max_attempts: u32,
}

impl AllocationService {
    pub fn new(store: Arc<dyn CounterStore>, estimator: LegacyScanEstimator) -> Self {
        Self {
            store,
            estimator,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Values below one are treated as one.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.store
    }

    pub fn estimator(&self) -> &LegacyScanEstimator {
        &self.estimator
    }

    /// Return a counter value never issued before for `form_id`.
    ///
    /// The first allocation for a form seeds its counter from the highest legacy
    /// suffix. A concurrent first allocation that wins the insert forces this one
    /// to retry against the now-existing row.
    pub fn allocate(&self, form_id: &FormId) -> CounterResult<u64> {
        for attempt in 1..=self.max_attempts {
            if let Some(value) = self.increment_existing(form_id)? {
                debug!(form = %form_id, value, attempt, "allocated counter");
                return Ok(value);
            }

            // The scan runs outside any transaction.
            let legacy_max = self.estimator.estimate_max(form_id)?;
            let seed = legacy_max.checked_add(1).ok_or_else(|| {
                CounterError::Unavailable(format!("legacy counter for form {form_id} is exhausted"))
            })?;
            match self.create_seeded(form_id, seed) {
                Ok(()) => {
                    info!(form = %form_id, legacy_max, value = seed, "bootstrapped form counter");
                    return Ok(seed);
                }
                Err(CounterError::DuplicateKey(_)) => {
                    debug!(form = %form_id, attempt, "counter bootstrap raced; retrying");
                }
                Err(err) => return Err(err),
            }
        }
        Err(CounterError::Unavailable(format!(
            "counter for form {form_id} still conflicting after {} attempts",
            self.max_attempts
        )))
    }

    /// Current counter value without allocating, if the form has a counter row.
    pub fn current(&self, form_id: &FormId) -> CounterResult<Option<u64>> {
        Ok(self.store.get(form_id)?.map(|record| record.counter_value))
    }

    fn increment_existing(&self, form_id: &FormId) -> CounterResult<Option<u64>> {
        let mut tx = self.store.begin()?;
        let Some(mut record) = tx.lock_for_update(form_id)? else {
            return Ok(None);
        };
        let value = record.advance().ok_or_else(|| {
            CounterError::Unavailable(format!("counter for form {form_id} is exhausted"))
        })?;
        tx.save(&record)?;
        tx.commit()?;
        Ok(Some(value))
    }

    fn create_seeded(&self, form_id: &FormId, seed: u64) -> CounterResult<()> {
        let mut tx = self.store.begin()?;
        tx.create(form_id, seed)?;
        tx.commit()
    }
}
