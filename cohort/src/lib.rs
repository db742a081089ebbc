//! Patient number allocation for clinical data collection.
//!
//! Every new patient enrolled under a form receives the next value of that
//! form's counter. Counters live in a relational store, are advanced under an
//! exclusive lock, and are bootstrapped from legacy patient identifiers the
//! first time a form is seen.
//!
//! ```no_run
//! use cohort::{AllocatorRuntime, FormId};
//!
//! # fn main() -> anyhow::Result<()> {
//! let settings = cohort::config::load_settings(None)?;
//! let _guard = cohort::telemetry::init_tracing(&settings.telemetry)?;
//! let runtime = AllocatorRuntime::start(&settings)?;
//! let suffix = runtime.allocate_formatted(&FormId::from("F1"))?;
//! println!("S-0001-{suffix}");
//! # Ok(())
//! # }
//! ```

mod runtime;
pub mod telemetry;

pub use cohort_config as config;
pub use cohort_core::{format_suffix, legacy_suffix, FormId};
pub use cohort_counter as counter;
pub use cohort_counter::{CounterError, CounterResult, ReconcileReport};
pub use runtime::AllocatorRuntime;
