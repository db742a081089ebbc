use cohort_core::FormId;
use thiserror::Error;

/// Result alias for counter operations.
pub type CounterResult<T> = Result<T, CounterError>;

/// Error type surfaced by counter storage and allocation.
#[derive(Debug, Error)]
pub enum CounterError {
    /// The backing store could not be reached, or a transaction could not be
    /// started or committed. Callers must abort the enrollment.
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
    /// A counter row for the form was inserted concurrently.
    #[error("counter for form {0} already exists")]
    DuplicateKey(FormId),
}

impl From<rusqlite::Error> for CounterError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Unavailable(value.to_string())
    }
}

impl From<std::io::Error> for CounterError {
    fn from(value: std::io::Error) -> Self {
        Self::Unavailable(value.to_string())
    }
}
