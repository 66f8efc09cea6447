//! Shared test doubles and fixtures for Smartsite services.

mod backend;
mod clock;
mod listener;
mod records;

pub use backend::{FailingBackend, FailurePoint};
pub use clock::{FixedClock, SteppingClock, fixed_time};
pub use listener::{FailingListener, RecordingListener};
pub use records::{as_consumer_records, record_for};
