use cohort_core::FormId;

use crate::{CounterRecord, CounterResult};

/// Abstraction over durable, lockable counter storage.
pub trait CounterStore: Send + Sync {
    /// Open a transaction. Dropping it without [`CounterTransaction::commit`]
    /// rolls back every change made through it.
    fn begin(&self) -> CounterResult<Box<dyn CounterTransaction>>;

    /// Read the current record without taking any lock.
    fn get(&self, form_id: &FormId) -> CounterResult<Option<CounterRecord>>;

    /// Every counter record, ordered by form.
    fn list(&self) -> CounterResult<Vec<CounterRecord>>;
}

/// Unit of work against a [`CounterStore`].
pub trait CounterTransaction: Send {
    /// Read the record for `form_id` and hold an exclusive lock on it until the
    /// transaction ends. Returns `None` without locking anything when no record exists.
    fn lock_for_update(&mut self, form_id: &FormId) -> CounterResult<Option<CounterRecord>>;

    /// Insert a new record. Fails with [`crate::CounterError::DuplicateKey`] when a
    /// record for the same form already exists.
    fn create(&mut self, form_id: &FormId, initial_value: u64) -> CounterResult<CounterRecord>;

    /// Persist the value of a record previously returned by `lock_for_update`.
    fn save(&mut self, record: &CounterRecord) -> CounterResult<()>;

    fn commit(self: Box<Self>) -> CounterResult<()>;
}
