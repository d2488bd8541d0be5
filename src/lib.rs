//! Cadence: fair shared/exclusive locking and recurring task scheduling.
//!
//! Two independent primitives for thread-based workers:
//!
//! - [`SharedExclusiveLock`]: one protected region, two acquisition modes.
//!   Shared admits any number of concurrent holders; exclusive admits one
//!   and excludes everything else. Grants follow a strict FIFO ticket queue,
//!   so neither mode starves the other. Blocking, non-blocking, bounded,
//!   and token-cancellable acquisitions are provided, all returning RAII
//!   guards.
//! - [`Scheduler`]: runs registered actions at a first-run time and then at
//!   a fixed period on one dedicated worker thread. An action that outlives
//!   its period delays its own next cycle (back-to-back, never concurrent)
//!   and every other due task on the same scheduler. Failing or panicking
//!   actions are recorded and never stop the worker.
//!
//! Both are explicitly constructed and explicitly owned; there is no
//! process-wide instance of either.

pub mod config;
pub mod error;
pub mod lock;
pub mod logging;
pub mod scheduler;

pub use config::{CadenceConfig, SchedulerConfig};
pub use error::{CadenceError, Result};
pub use lock::{CancelToken, ExclusiveGuard, LockMode, SharedExclusiveLock, SharedGuard};
pub use scheduler::{Schedule, ScheduledTask, Scheduler, SchedulerHandle, TaskResult};
