//! Scheduler worker loop.
//!
//! [`Scheduler::run`] spawns one dedicated worker thread that executes due
//! tasks synchronously, one at a time, in due order. A slow action therefore
//! delays its own next cycle and every other due task on the same scheduler.
//! Task runtime state and run history are persisted as JSON when a state
//! path is configured.

use crate::config::SchedulerConfig;
use crate::error::{CadenceError, Result};
use crate::scheduler::tasks::{
    self, ScheduledTask, TaskResult, TaskRunRecord, TaskState,
};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How long the worker parks when no task has a planned run.
const IDLE_WAIT: Duration = Duration::from_millis(500);

/// Number of run-history entries to keep.
pub(crate) const DEFAULT_HISTORY_LIMIT: usize = 400;

/// Public snapshot of scheduler runtime state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerSnapshot {
    /// Persisted task runtime state.
    pub tasks: Vec<TaskRecord>,
    /// Recent run history.
    #[serde(default)]
    pub history: Vec<TaskRunRecord>,
}

/// Persisted runtime state of one task. The action itself is never
/// persisted; on restart it is re-supplied through task registration and
/// matched up by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub name: String,
    pub period_ms: u64,
    pub next_run: Option<u64>,
    pub enabled: bool,
    pub state: TaskState,
    #[serde(default)]
    pub runs_completed: u64,
    #[serde(default)]
    pub last_error: Option<String>,
}

/// On-disk scheduler state file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SchedulerState {
    #[serde(default = "default_state_version")]
    version: u8,
    #[serde(default)]
    tasks: Vec<TaskRecord>,
    #[serde(default)]
    history: Vec<TaskRunRecord>,
}

fn default_state_version() -> u8 {
    1
}

/// Commands accepted by the running worker.
enum Command {
    AddTask(ScheduledTask),
    Cancel(String),
    SetEnabled(String, bool),
    MarkDueNow(String),
    Shutdown,
}

/// Recurring task scheduler with a single dedicated worker thread.
///
/// Construct one explicitly, register tasks, then call [`run`](Self::run).
/// Every executed action's [`TaskResult`] is delivered on the result channel
/// supplied at construction.
pub struct Scheduler {
    tasks: Vec<ScheduledTask>,
    history: Vec<TaskRunRecord>,
    state_path: Option<PathBuf>,
    result_tx: Sender<TaskResult>,
    max_history_entries: usize,
}

impl Scheduler {
    /// Create a scheduler delivering results on the given channel.
    pub fn new(result_tx: Sender<TaskResult>) -> Self {
        Self {
            tasks: Vec::new(),
            history: Vec::new(),
            state_path: None,
            result_tx,
            max_history_entries: DEFAULT_HISTORY_LIMIT,
        }
    }

    /// Create a scheduler from configuration.
    pub fn from_config(config: &SchedulerConfig, result_tx: Sender<TaskResult>) -> Self {
        Self {
            tasks: Vec::new(),
            history: Vec::new(),
            state_path: config.state_path.clone(),
            result_tx,
            max_history_entries: config.history_limit.max(1),
        }
    }

    /// Persist task runtime state and run history at `path`.
    pub fn with_state_path(mut self, path: PathBuf) -> Self {
        self.state_path = Some(path);
        self
    }

    /// Override the in-memory and persisted run-history limit.
    pub fn with_history_limit(mut self, max_entries: usize) -> Self {
        self.max_history_entries = max_entries.max(1);
        self
    }

    /// Add (or replace, matching by id) a task.
    pub fn add_task(&mut self, task: ScheduledTask) {
        if let Some(existing) = self.tasks.iter_mut().find(|t| t.id == task.id) {
            *existing = task;
        } else {
            self.tasks.push(task);
        }
    }

    /// Returns registered tasks.
    pub fn tasks(&self) -> &[ScheduledTask] {
        &self.tasks
    }

    /// Returns the run history, oldest first.
    pub fn history(&self) -> &[TaskRunRecord] {
        &self.history
    }

    /// Enables or disables a task by id. Returns `true` when found.
    pub fn set_task_enabled(&mut self, task_id: &str, enabled: bool) -> bool {
        if let Some(task) = self.tasks.iter_mut().find(|t| t.id == task_id) {
            task.enabled = enabled;
            return true;
        }
        false
    }

    /// Marks a task due now. Returns `true` when found.
    pub fn mark_task_due_now(&mut self, task_id: &str) -> bool {
        if let Some(task) = self.tasks.iter_mut().find(|t| t.id == task_id) {
            task.mark_due_now();
            return true;
        }
        false
    }

    /// Cancels a task by id so no further cycle starts. Returns `true` when
    /// found.
    pub fn cancel_task(&mut self, task_id: &str) -> bool {
        if let Some(task) = self.tasks.iter_mut().find(|t| t.id == task_id) {
            task.cancel();
            return true;
        }
        false
    }

    /// Current runtime state of all tasks plus run history.
    pub fn snapshot(&self) -> SchedulerSnapshot {
        SchedulerSnapshot {
            tasks: self
                .tasks
                .iter()
                .map(|task| TaskRecord {
                    id: task.id.clone(),
                    name: task.name.clone(),
                    period_ms: task.schedule.period_ms(),
                    next_run: task.next_run,
                    enabled: task.enabled,
                    state: task.state,
                    runs_completed: task.runs_completed,
                    last_error: task.last_error.clone(),
                })
                .collect(),
            history: self.history.clone(),
        }
    }

    /// Load persisted runtime state and merge into registered tasks by id.
    ///
    /// Records without a matching registered task are dropped: the action
    /// cannot be restored from disk.
    pub fn load_state(&mut self) {
        let snapshot = match load_snapshot_from_path(self.state_path.as_deref()) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("cannot load scheduler state: {e}");
                return;
            }
        };

        for record in snapshot.tasks {
            if let Some(task) = self.tasks.iter_mut().find(|t| t.id == record.id) {
                task.next_run = record.next_run;
                task.enabled = record.enabled;
                task.runs_completed = record.runs_completed;
                task.last_error = record.last_error;
                // A run interrupted by process exit is not resumed.
                task.state = match record.state {
                    TaskState::Cancelled => TaskState::Cancelled,
                    TaskState::Pending | TaskState::Running => TaskState::Pending,
                };
            }
        }

        self.history = snapshot.history;
        self.trim_history();

        if let Some(path) = &self.state_path {
            debug!("loaded scheduler state from {}", path.display());
        }
    }

    /// Persist task runtime state and run history.
    fn save_state(&self) {
        if self.state_path.is_none() {
            return;
        }
        if let Err(e) = save_snapshot_to_path(
            self.state_path.as_deref(),
            &self.snapshot(),
            self.max_history_entries,
        ) {
            error!("cannot persist scheduler state: {e}");
        }
    }

    /// Start the worker thread, consuming the scheduler.
    pub fn run(mut self) -> SchedulerHandle {
        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
        let join = thread::spawn(move || {
            self.load_state();
            let now = tasks::now_epoch_millis();
            for task in &mut self.tasks {
                task.arm(now);
            }
            info!("scheduler started with {} tasks", self.tasks.len());
            self.worker_loop(&cmd_rx);
            self.save_state();
            self
        });
        SchedulerHandle { cmd_tx, join }
    }

    fn worker_loop(&mut self, cmd_rx: &Receiver<Command>) {
        loop {
            // Drain commands first so a cancel issued between cycles takes
            // effect before the next execution.
            loop {
                match cmd_rx.try_recv() {
                    Ok(command) => {
                        if self.apply(command) {
                            return;
                        }
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => return,
                }
            }

            if self.run_one_due(tasks::now_epoch_millis()) {
                self.save_state();
                continue;
            }

            let wait = match self.earliest_due() {
                Some(due) => {
                    let now = tasks::now_epoch_millis();
                    Duration::from_millis(due.saturating_sub(now).max(1))
                }
                None => IDLE_WAIT,
            };
            match cmd_rx.recv_timeout(wait) {
                Ok(command) => {
                    if self.apply(command) {
                        return;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return,
            }
        }
    }

    /// Apply one command. Returns `true` when the worker should stop.
    fn apply(&mut self, command: Command) -> bool {
        match command {
            Command::AddTask(mut task) => {
                task.arm(tasks::now_epoch_millis());
                debug!("task '{}' registered", task.id);
                self.add_task(task);
            }
            Command::Cancel(id) => {
                if self.cancel_task(&id) {
                    debug!("task '{id}' cancelled");
                } else {
                    warn!("cancel for unknown task '{id}'");
                }
            }
            Command::SetEnabled(id, enabled) => {
                if !self.set_task_enabled(&id, enabled) {
                    warn!("enable/disable for unknown task '{id}'");
                }
            }
            Command::MarkDueNow(id) => {
                if !self.mark_task_due_now(&id) {
                    warn!("due-now for unknown task '{id}'");
                }
            }
            Command::Shutdown => return true,
        }
        false
    }

    /// Execute the most overdue due task, if any. Returns `true` if one ran.
    fn run_one_due(&mut self, now_ms: u64) -> bool {
        let due_index = self
            .tasks
            .iter()
            .enumerate()
            .filter(|(_, task)| task.is_due(now_ms))
            .min_by_key(|(_, task)| task.next_run)
            .map(|(index, _)| index);

        match due_index {
            Some(index) => {
                self.execute_at(index);
                true
            }
            None => false,
        }
    }

    fn execute_at(&mut self, index: usize) {
        let started_at = tasks::now_epoch_millis();
        let (task_id, result) = {
            let task = &mut self.tasks[index];
            task.state = TaskState::Running;
            debug!("executing scheduled task: {}", task.id);

            // Isolate action failures: a panic is recorded like any other
            // failed run and the scheduler keeps going.
            let result = match panic::catch_unwind(AssertUnwindSafe(|| (task.action)())) {
                Ok(result) => result,
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!("task '{}' panicked: {message}", task.id);
                    TaskResult::Error(format!("task panicked: {message}"))
                }
            };
            (task.id.clone(), result)
        };
        let finished_at = tasks::now_epoch_millis();

        let task = &mut self.tasks[index];
        // A cancel cannot land mid-run (single worker thread), so Running
        // always returns to Pending here.
        task.state = TaskState::Pending;
        task.runs_completed += 1;
        task.reschedule_after(started_at);
        if let TaskResult::Error(message) = &result {
            task.last_error = Some(message.clone());
        }

        self.push_history(TaskRunRecord {
            task_id,
            started_at,
            finished_at,
            outcome: result.outcome(),
            summary: result.summary(),
        });

        if self.result_tx.send(result).is_err() {
            debug!("scheduler result channel closed, discarding result");
        }
    }

    /// Earliest planned start among runnable tasks.
    fn earliest_due(&self) -> Option<u64> {
        self.tasks
            .iter()
            .filter(|task| task.enabled && task.state == TaskState::Pending)
            .filter_map(|task| task.next_run)
            .min()
    }

    fn push_history(&mut self, record: TaskRunRecord) {
        self.history.push(record);
        self.trim_history();
    }

    fn trim_history(&mut self) {
        if self.history.len() <= self.max_history_entries {
            return;
        }
        let drop_count = self.history.len().saturating_sub(self.max_history_entries);
        self.history.drain(0..drop_count);
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("tasks", &self.tasks)
            .field("history_len", &self.history.len())
            .field("state_path", &self.state_path)
            .finish_non_exhaustive()
    }
}

/// Handle to a running scheduler worker.
///
/// Dropping the handle without calling [`shutdown`](Self::shutdown) detaches
/// the worker; it stops on its own once the command channel disconnects.
pub struct SchedulerHandle {
    cmd_tx: Sender<Command>,
    join: JoinHandle<Scheduler>,
}

impl SchedulerHandle {
    /// Register a task with the running scheduler.
    ///
    /// # Errors
    ///
    /// [`CadenceError::Scheduler`] when the worker has already stopped.
    pub fn add_task(&self, task: ScheduledTask) -> Result<()> {
        self.send(Command::AddTask(task))
    }

    /// Cancel a task: no future cycle starts, an in-flight execution runs to
    /// completion.
    ///
    /// # Errors
    ///
    /// [`CadenceError::Scheduler`] when the worker has already stopped.
    pub fn cancel_task(&self, task_id: &str) -> Result<()> {
        self.send(Command::Cancel(task_id.to_owned()))
    }

    /// Enable or disable a task by id.
    ///
    /// # Errors
    ///
    /// [`CadenceError::Scheduler`] when the worker has already stopped.
    pub fn set_task_enabled(&self, task_id: &str, enabled: bool) -> Result<()> {
        self.send(Command::SetEnabled(task_id.to_owned(), enabled))
    }

    /// Request that a task run on the next scheduler pass.
    ///
    /// # Errors
    ///
    /// [`CadenceError::Scheduler`] when the worker has already stopped.
    pub fn mark_task_due_now(&self, task_id: &str) -> Result<()> {
        self.send(Command::MarkDueNow(task_id.to_owned()))
    }

    /// Stop the worker after any in-flight execution and return the final
    /// scheduler state.
    ///
    /// # Errors
    ///
    /// [`CadenceError::Scheduler`] when the worker thread panicked.
    pub fn shutdown(self) -> Result<Scheduler> {
        // The worker may already have stopped; join either way.
        let _ = self.cmd_tx.send(Command::Shutdown);
        self.join
            .join()
            .map_err(|_| CadenceError::Scheduler("worker thread panicked".to_owned()))
    }

    fn send(&self, command: Command) -> Result<()> {
        self.cmd_tx
            .send(command)
            .map_err(|_| CadenceError::Scheduler("scheduler is not running".to_owned()))
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

fn load_snapshot_from_path(path: Option<&std::path::Path>) -> Result<SchedulerSnapshot> {
    let Some(path) = path else {
        return Ok(SchedulerSnapshot::default());
    };

    let bytes = match std::fs::read(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(SchedulerSnapshot::default());
        }
        Err(e) => {
            return Err(CadenceError::Scheduler(format!("cannot read state: {e}")));
        }
    };

    let state: SchedulerState = serde_json::from_slice(&bytes)
        .map_err(|e| CadenceError::Scheduler(format!("cannot parse state: {e}")))?;

    Ok(SchedulerSnapshot {
        tasks: state.tasks,
        history: state.history,
    })
}

fn save_snapshot_to_path(
    path: Option<&std::path::Path>,
    snapshot: &SchedulerSnapshot,
    history_limit: usize,
) -> Result<()> {
    let Some(path) = path else {
        return Ok(());
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| CadenceError::Scheduler(format!("cannot create state dir: {e}")))?;
    }

    let mut history = snapshot.history.clone();
    if history.len() > history_limit {
        let drop_count = history.len().saturating_sub(history_limit);
        history.drain(0..drop_count);
    }

    let state = SchedulerState {
        version: default_state_version(),
        tasks: snapshot.tasks.clone(),
        history,
    };

    let json = serde_json::to_string_pretty(&state)
        .map_err(|e| CadenceError::Scheduler(format!("cannot serialize state: {e}")))?;

    std::fs::write(path, json)
        .map_err(|e| CadenceError::Scheduler(format!("cannot write state: {e}")))?;

    Ok(())
}
