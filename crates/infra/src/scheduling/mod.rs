//! Background timers
//!
//! The cache reconciler and the delivery queue both run periodic work on a
//! [`PeriodicTask`].

pub mod error;
pub mod timer;

pub use error::{SchedulerError, SchedulerResult};
pub use timer::PeriodicTask;
