//! Recurring task scheduler.
//!
//! One dedicated worker thread executes every due task synchronously, one at
//! a time, so an action that outlives its period delays its own next cycle
//! (back-to-back, never concurrent) and every other due task on the same
//! scheduler.

pub mod runner;
pub mod tasks;

pub use runner::{Scheduler, SchedulerHandle, SchedulerSnapshot, TaskRecord};
pub use tasks::{
    Schedule, ScheduledTask, TaskResult, TaskRunOutcome, TaskRunRecord, TaskState,
};
