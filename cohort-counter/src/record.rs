use chrono::{DateTime, Utc};
use cohort_core::FormId;
use serde::{Deserialize, Serialize};

/// Last counter value issued for a form.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterRecord {
    pub form_id: FormId,
    pub counter_value: u64,
    pub updated_at: DateTime<Utc>,
}

impl CounterRecord {
    pub fn new(form_id: FormId, counter_value: u64) -> Self {
        Self {
            form_id,
            counter_value,
            updated_at: Utc::now(),
        }
    }

    /// Advance the counter by one and return the newly issued value.
    ///
    /// Returns `None` when the counter is already at `u64::MAX`.
    pub fn advance(&mut self) -> Option<u64> {
        let next = self.counter_value.checked_add(1)?;
        self.counter_value = next;
        self.updated_at = Utc::now();
        Some(next)
    }
}
