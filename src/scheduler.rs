//! Task scheduler: immediate, delayed, and recurring execution.
//!
//! Each scheduled task runs on its own tokio task; `schedule()` never
//! blocks. Failures never escape a schedule's own execution unit — they are
//! converted into `on_task_failed` notifications, so one schedule cannot
//! corrupt another's state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::task::{Task, TaskError, TaskRequest};

/// Correlates one `schedule()` call with its lifecycle callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScheduleId(Uuid);

impl ScheduleId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ScheduleId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ScheduleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle notifications for scheduled tasks.
///
/// One callback target serves every schedule of a scheduler instance, so
/// implementations must discriminate by `schedule_id`. An error returned
/// from `on_task_started` or `on_task_execute` fails the schedule.
#[async_trait]
pub trait TaskCallbacks: Send + Sync {
    async fn on_task_started(&self, task: &Task, schedule_id: ScheduleId) -> anyhow::Result<()>;

    async fn on_task_execute(&self, task: &Task, schedule_id: ScheduleId) -> anyhow::Result<()>;

    async fn on_task_completed(
        &self,
        task: &Task,
        schedule_id: ScheduleId,
        result: &str,
    ) -> anyhow::Result<()>;

    async fn on_task_failed(
        &self,
        task: &Task,
        schedule_id: ScheduleId,
        error: &str,
    ) -> anyhow::Result<()>;
}

/// Timing parameters for one `schedule()` call.
#[derive(Debug, Clone)]
pub struct ScheduleOptions {
    /// Target assistant for basic and batch tasks; ignored for multi tasks.
    pub assistant_name: Option<String>,
    /// Absent or past start times execute immediately.
    pub start_time: Option<DateTime<Utc>>,
    /// Pause between recurrences; ignored after the final one.
    pub interval: Duration,
    pub recurrence_count: u32,
}

impl Default for ScheduleOptions {
    fn default() -> Self {
        Self {
            assistant_name: None,
            start_time: None,
            interval: Duration::ZERO,
            recurrence_count: 1,
        }
    }
}

/// A live schedule, owning its task until the last recurrence completes.
/// Not persisted.
#[derive(Debug, Clone)]
pub struct ScheduleEntry {
    pub task: Arc<Task>,
    pub start_time: Option<DateTime<Utc>>,
    pub interval: Duration,
    pub recurrence_count: u32,
}

type Entries = Arc<Mutex<HashMap<ScheduleId, ScheduleEntry>>>;

/// Schedules units of work for immediate, delayed, or recurring execution.
///
/// Construct one instance and pass it by reference to every caller that
/// schedules work; all schedules of an instance share its callback target.
/// Independent instances (e.g. in tests) do not interact.
pub struct TaskScheduler {
    callbacks: Arc<dyn TaskCallbacks>,
    entries: Entries,
}

impl TaskScheduler {
    pub fn new(callbacks: Arc<dyn TaskCallbacks>) -> Self {
        Self {
            callbacks,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Pure convenience constructor for a basic task.
    pub fn create_basic_task(&self, user_request: impl Into<String>) -> Task {
        Task::basic(user_request)
    }

    /// Pure convenience constructor for a batch task.
    pub fn create_batch_task(&self, requests: Vec<String>) -> Task {
        Task::batch(requests)
    }

    /// Pure convenience constructor for a multi-agent task.
    ///
    /// # Errors
    /// Returns the construction-time validation error for malformed input.
    pub fn create_multi_task(&self, requests: Vec<TaskRequest>) -> Result<Task, TaskError> {
        Task::multi(requests)
    }

    /// Schedule `task` and return its schedule id without blocking.
    ///
    /// Execution happens on an independent tokio task; a future
    /// `start_time` arms a one-shot timer that launches the execution task
    /// when it fires. The caller learns of failure only through
    /// `on_task_failed` — nothing task-related is raised from here.
    pub fn schedule(&self, mut task: Task, options: ScheduleOptions) -> ScheduleId {
        let schedule_id = ScheduleId::new();

        // Fan-out picks the target agent per sub-request, so multi tasks
        // carry no assistant name of their own.
        if task.is_multi() {
            task.set_assistant_name(None);
        } else {
            task.set_assistant_name(options.assistant_name.clone());
        }

        let task = Arc::new(task);
        self.entries.lock().unwrap().insert(
            schedule_id,
            ScheduleEntry {
                task: task.clone(),
                start_time: options.start_time,
                interval: options.interval,
                recurrence_count: options.recurrence_count,
            },
        );

        let delay = options
            .start_time
            .and_then(|start| (start - Utc::now()).to_std().ok())
            .unwrap_or(Duration::ZERO);

        let callbacks = self.callbacks.clone();
        let entries = self.entries.clone();
        let interval = options.interval;
        let recurrence_count = options.recurrence_count;

        if delay.is_zero() {
            tokio::spawn(Self::execute_entry(
                callbacks,
                entries,
                task,
                schedule_id,
                interval,
                recurrence_count,
            ));
        } else {
            info!(%schedule_id, delay_secs = delay.as_secs_f64(), "arming schedule timer");
            // The timer task only arms execution; the task body runs on a
            // fresh tokio task.
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                tokio::spawn(Self::execute_entry(
                    callbacks,
                    entries,
                    task,
                    schedule_id,
                    interval,
                    recurrence_count,
                ));
            });
        }

        schedule_id
    }

    /// Number of schedules that have not yet finished their last recurrence.
    pub fn scheduled_count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// The live entry for a schedule, or `None` once it has been discarded.
    pub fn entry(&self, schedule_id: ScheduleId) -> Option<ScheduleEntry> {
        self.entries.lock().unwrap().get(&schedule_id).cloned()
    }

    async fn execute_entry(
        callbacks: Arc<dyn TaskCallbacks>,
        entries: Entries,
        task: Arc<Task>,
        schedule_id: ScheduleId,
        interval: Duration,
        recurrence_count: u32,
    ) {
        debug!(%schedule_id, task_id = %task.id(), "executing schedule");
        if let Err(e) = Self::run_lifecycle(
            callbacks.as_ref(),
            &task,
            schedule_id,
            interval,
            recurrence_count,
        )
        .await
        {
            // Failure aborts remaining recurrences; it does not retry.
            if let Err(notify_err) = callbacks
                .on_task_failed(&task, schedule_id, &format!("{e:#}"))
                .await
            {
                error!(%schedule_id, error = %notify_err, "on_task_failed callback errored");
            }
        }
        entries.lock().unwrap().remove(&schedule_id);
    }

    async fn run_lifecycle(
        callbacks: &dyn TaskCallbacks,
        task: &Arc<Task>,
        schedule_id: ScheduleId,
        interval: Duration,
        recurrence_count: u32,
    ) -> anyhow::Result<()> {
        callbacks.on_task_started(task, schedule_id).await?;

        let mut remaining = recurrence_count;
        while remaining > 0 {
            task.execute(Some(|| callbacks.on_task_execute(task, schedule_id)))
                .await?;
            remaining -= 1;
            if remaining > 0 {
                // Suspends only this schedule; other schedules keep running.
                tokio::time::sleep(interval).await;
            }
        }

        callbacks
            .on_task_completed(task, schedule_id, "Success")
            .await?;
        Ok(())
    }
}
