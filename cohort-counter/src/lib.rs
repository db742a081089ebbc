//! Per-form counter allocation backed by durable storage.
//!
//! [`AllocationService`] hands out strictly increasing counter values per form.
//! Forms without a counter row are bootstrapped from the highest suffix found in
//! their legacy patient identifiers, either lazily on first allocation or eagerly
//! by [`BackfillReconciler`] at startup.

mod allocator;
mod error;
mod estimator;
mod patients;
mod reconcile;
mod record;
mod sqlite;
mod store;

#[cfg(test)]
mod testing;

pub use allocator::AllocationService;
pub use error::{CounterError, CounterResult};
pub use estimator::LegacyScanEstimator;
pub use patients::{LegacySchema, PatientDirectory, SqlitePatientDirectory};
pub use reconcile::{BackfillReconciler, ReconcileReport};
pub use record::CounterRecord;
pub use sqlite::{SqliteCounterStore, DEFAULT_BUSY_TIMEOUT};
pub use store::{CounterStore, CounterTransaction};
