//! Time-based alarms.

mod scheduler;

pub use scheduler::{AlarmScheduler, ScheduleOutcome};
