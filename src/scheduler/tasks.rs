//! Scheduled task definitions and timing.
//!
//! Defines the [`ScheduledTask`] type, the [`Schedule`] pairing a first-run
//! time with a fixed period, and the run-history record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// When a task first runs and how often it repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    /// Wall-clock time of the first run. `None` means as soon as the
    /// scheduler starts. A time already in the past is due immediately.
    pub first_run: Option<DateTime<Utc>>,
    /// Fixed period between run starts.
    pub period: Duration,
}

impl Schedule {
    /// Repeat every `period`, starting as soon as the scheduler runs.
    pub fn every(period: Duration) -> Self {
        Self {
            first_run: None,
            period,
        }
    }

    /// Repeat every `period`, starting at `first_run`.
    pub fn starting_at(first_run: DateTime<Utc>, period: Duration) -> Self {
        Self {
            first_run: Some(first_run),
            period,
        }
    }

    /// Epoch milliseconds of the first due time, given the current time.
    pub(crate) fn first_due_at(&self, now_ms: u64) -> u64 {
        match self.first_run {
            Some(at) => u64::try_from(at.timestamp_millis()).unwrap_or(0),
            None => now_ms,
        }
    }

    pub(crate) fn period_ms(&self) -> u64 {
        u64::try_from(self.period.as_millis()).unwrap_or(u64::MAX)
    }
}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.first_run {
            None => write!(f, "every {:?}", self.period),
            Some(at) => write!(f, "every {:?} from {}", self.period, at.to_rfc3339()),
        }
    }
}

/// Outcome of executing a task action.
#[derive(Debug, Clone)]
pub enum TaskResult {
    /// Action completed successfully with a summary message.
    Success(String),
    /// Action failed with an error message.
    Error(String),
}

impl TaskResult {
    /// Collapse into the recorded outcome kind.
    pub fn outcome(&self) -> TaskRunOutcome {
        match self {
            Self::Success(_) => TaskRunOutcome::Success,
            Self::Error(_) => TaskRunOutcome::Failure,
        }
    }

    /// The carried summary or error message.
    pub fn summary(&self) -> String {
        match self {
            Self::Success(msg) | Self::Error(msg) => msg.clone(),
        }
    }
}

/// How one recorded run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskRunOutcome {
    Success,
    Failure,
}

/// One entry in the scheduler's run history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRunRecord {
    /// Id of the task that ran.
    pub task_id: String,
    /// Epoch milliseconds when the action started.
    pub started_at: u64,
    /// Epoch milliseconds when the action returned.
    pub finished_at: u64,
    /// How the run ended.
    pub outcome: TaskRunOutcome,
    /// Summary or error message from the action.
    pub summary: String,
}

/// Lifecycle state of a scheduled task.
///
/// `Pending → Running → Pending → … → Cancelled`. A cancelled task never
/// re-enters scheduling; an in-flight run finishes first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Cancelled,
}

/// The unit of work a task runs each cycle.
pub type TaskAction = Box<dyn FnMut() -> TaskResult + Send>;

/// A task that runs on a schedule.
pub struct ScheduledTask {
    /// Unique task identifier (e.g. `"compact_store"`).
    pub id: String,
    /// Human-readable task name.
    pub name: String,
    /// When and how often to run.
    pub schedule: Schedule,
    pub(crate) action: TaskAction,
    /// Disabled tasks keep their planned time but never run.
    pub enabled: bool,
    /// Lifecycle state.
    pub state: TaskState,
    /// Epoch milliseconds of the next planned start, set once armed.
    pub next_run: Option<u64>,
    /// Completed cycles, failures included.
    pub runs_completed: u64,
    /// Message from the most recent failed run, if any.
    pub last_error: Option<String>,
}

impl ScheduledTask {
    /// Create an enabled task with the given schedule and action.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        schedule: Schedule,
        action: impl FnMut() -> TaskResult + Send + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            schedule,
            action: Box::new(action),
            enabled: true,
            state: TaskState::Pending,
            next_run: None,
            runs_completed: 0,
            last_error: None,
        }
    }

    /// Arm the task for its first run if it has no planned start yet.
    pub(crate) fn arm(&mut self, now_ms: u64) {
        if self.next_run.is_none() {
            self.next_run = Some(self.schedule.first_due_at(now_ms));
        }
    }

    /// `true` when the task should run at `now_ms`.
    pub fn is_due(&self, now_ms: u64) -> bool {
        self.enabled
            && self.state == TaskState::Pending
            && self.next_run.is_some_and(|due| due <= now_ms)
    }

    /// Plan the next cycle relative to the actual start of the previous one.
    ///
    /// When an action outlives its period, the planned time is already past
    /// by the time the action returns, so the next cycle starts immediately:
    /// back-to-back, never concurrent, and no burst of catch-up runs.
    pub(crate) fn reschedule_after(&mut self, started_at_ms: u64) {
        self.next_run = Some(started_at_ms.saturating_add(self.schedule.period_ms()));
    }

    /// Request that the task run on the next scheduler pass.
    pub fn mark_due_now(&mut self) {
        self.next_run = Some(now_epoch_millis());
    }

    /// Remove the task from future scheduling.
    pub fn cancel(&mut self) {
        self.state = TaskState::Cancelled;
    }
}

impl std::fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("schedule", &self.schedule)
            .field("enabled", &self.enabled)
            .field("state", &self.state)
            .field("next_run", &self.next_run)
            .field("runs_completed", &self.runs_completed)
            .field("last_error", &self.last_error)
            .finish_non_exhaustive()
    }
}

/// Current UTC milliseconds since epoch.
pub(crate) fn now_epoch_millis() -> u64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use chrono::TimeZone;

    fn noop() -> TaskResult {
        TaskResult::Success("ok".to_owned())
    }

    #[test]
    fn new_task_has_correct_defaults() {
        let task = ScheduledTask::new(
            "test",
            "Test Task",
            Schedule::every(Duration::from_secs(60)),
            noop,
        );
        assert_eq!(task.id, "test");
        assert_eq!(task.name, "Test Task");
        assert!(task.enabled);
        assert_eq!(task.state, TaskState::Pending);
        assert!(task.next_run.is_none());
        assert_eq!(task.runs_completed, 0);
        assert!(task.last_error.is_none());
    }

    #[test]
    fn arming_without_first_run_is_due_immediately() {
        let mut task = ScheduledTask::new("t", "T", Schedule::every(Duration::from_secs(60)), noop);
        task.arm(1_000);
        assert_eq!(task.next_run, Some(1_000));
        assert!(task.is_due(1_000));
    }

    #[test]
    fn arming_with_future_first_run_is_not_due_yet() {
        let first = Utc.timestamp_millis_opt(5_000).unwrap();
        let mut task = ScheduledTask::new(
            "t",
            "T",
            Schedule::starting_at(first, Duration::from_secs(1)),
            noop,
        );
        task.arm(1_000);
        assert_eq!(task.next_run, Some(5_000));
        assert!(!task.is_due(4_999));
        assert!(task.is_due(5_000));
    }

    #[test]
    fn arming_twice_keeps_the_planned_time() {
        let mut task = ScheduledTask::new("t", "T", Schedule::every(Duration::from_secs(60)), noop);
        task.arm(1_000);
        task.arm(9_000);
        assert_eq!(task.next_run, Some(1_000));
    }

    #[test]
    fn disabled_task_is_never_due() {
        let mut task = ScheduledTask::new("t", "T", Schedule::every(Duration::ZERO), noop);
        task.arm(0);
        task.enabled = false;
        assert!(!task.is_due(u64::MAX));
    }

    #[test]
    fn cancelled_task_is_never_due() {
        let mut task = ScheduledTask::new("t", "T", Schedule::every(Duration::ZERO), noop);
        task.arm(0);
        task.cancel();
        assert_eq!(task.state, TaskState::Cancelled);
        assert!(!task.is_due(u64::MAX));
    }

    #[test]
    fn reschedule_is_relative_to_the_actual_start() {
        let mut task = ScheduledTask::new("t", "T", Schedule::every(Duration::from_millis(100)), noop);
        // Planned at 1_000 but actually started late at 1_250.
        task.arm(1_000);
        task.reschedule_after(1_250);
        assert_eq!(task.next_run, Some(1_350));
    }

    #[test]
    fn overrun_reschedule_lands_in_the_past() {
        let mut task = ScheduledTask::new("t", "T", Schedule::every(Duration::from_millis(50)), noop);
        task.arm(1_000);
        // Action started at 1_000 and ran for 200ms; the next cycle was
        // planned for 1_050, which is already past when the action returns.
        task.reschedule_after(1_000);
        assert_eq!(task.next_run, Some(1_050));
        assert!(task.is_due(1_200));
    }

    #[test]
    fn mark_due_now_sets_a_current_planned_time() {
        let mut task = ScheduledTask::new("t", "T", Schedule::every(Duration::from_secs(3600)), noop);
        task.arm(now_epoch_millis());
        task.mark_due_now();
        assert!(task.is_due(now_epoch_millis()));
    }

    #[test]
    fn pre_epoch_first_run_is_due_immediately() {
        let first = Utc.timestamp_millis_opt(-1).unwrap();
        let schedule = Schedule::starting_at(first, Duration::from_secs(1));
        assert_eq!(schedule.first_due_at(1_000), 0);
    }

    #[test]
    fn schedule_display_mentions_period() {
        let schedule = Schedule::every(Duration::from_secs(5));
        assert!(schedule.to_string().contains("5s"));
    }

    #[test]
    fn task_result_outcome_and_summary() {
        let success = TaskResult::Success("done".to_owned());
        assert_eq!(success.outcome(), TaskRunOutcome::Success);
        assert_eq!(success.summary(), "done");

        let failure = TaskResult::Error("boom".to_owned());
        assert_eq!(failure.outcome(), TaskRunOutcome::Failure);
        assert_eq!(failure.summary(), "boom");
    }

    #[test]
    fn run_record_serde_round_trip() {
        let record = TaskRunRecord {
            task_id: "t".to_owned(),
            started_at: 1,
            finished_at: 2,
            outcome: TaskRunOutcome::Failure,
            summary: "boom".to_owned(),
        };
        let json = serde_json::to_string(&record).unwrap();
        let restored: TaskRunRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.task_id, "t");
        assert_eq!(restored.outcome, TaskRunOutcome::Failure);
    }
}
