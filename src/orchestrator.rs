//! Multi-agent orchestration: fans a multi task out to named agents over
//! one shared conversation session.
//!
//! One concrete type implements both the scheduler's and the run state
//! machine's callback contracts, bridging the two: scheduled task execution
//! drives per-sub-request agent runs, and run events surface back here for
//! observability.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::backend::{
    MessageContent, RunService, SessionId, SessionMessage, SessionStore, ToolExecutor,
};
use crate::run::context::StreamedMessage;
use crate::run::{RunCallbacks, RunProcessor, RunStatus};
use crate::scheduler::{ScheduleId, TaskCallbacks};
use crate::task::Task;

/// A one-shot completion flag with any number of waiters.
struct CompletionSignal {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl CompletionSignal {
    fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx, rx }
    }

    fn signal(&self) {
        let _ = self.tx.send(true);
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.rx.clone()
    }
}

#[derive(Default)]
struct OrchestratorState {
    /// A task is currently in flight. Cleared on completion or failure.
    task_started: bool,
    /// The shared conversation session of the task currently in flight.
    session_id: Option<SessionId>,
    completions: HashMap<ScheduleId, CompletionSignal>,
    /// Agent outputs forwarded so far, in production order.
    outputs: Vec<String>,
}

/// Drives multi-agent tasks: each sub-request goes to its named agent, in
/// order, on one shared session, so later agents see earlier output.
///
/// Sharing one orchestrator across two concurrently scheduled multi tasks
/// is unsupported: the shared session is owned by whichever task is in
/// flight. Call [`wait_for_all_tasks`](Self::wait_for_all_tasks) before or
/// while the task runs, not after it has already completed.
pub struct MultiAgentOrchestrator {
    runs: Arc<dyn RunService>,
    sessions: Arc<dyn SessionStore>,
    tools: Arc<dyn ToolExecutor>,
    state: Mutex<OrchestratorState>,
    started_tx: watch::Sender<bool>,
    started_rx: watch::Receiver<bool>,
    self_ref: Weak<MultiAgentOrchestrator>,
}

impl MultiAgentOrchestrator {
    pub fn new(
        runs: Arc<dyn RunService>,
        sessions: Arc<dyn SessionStore>,
        tools: Arc<dyn ToolExecutor>,
    ) -> Arc<Self> {
        let (started_tx, started_rx) = watch::channel(false);
        Arc::new_cyclic(|self_ref| Self {
            runs,
            sessions,
            tools,
            state: Mutex::new(OrchestratorState::default()),
            started_tx,
            started_rx,
            self_ref: self_ref.clone(),
        })
    }

    /// The session the current (or last started) task runs on.
    pub fn session_id(&self) -> Option<SessionId> {
        self.state.lock().unwrap().session_id.clone()
    }

    /// Whether a task is currently in flight.
    pub fn task_started(&self) -> bool {
        self.state.lock().unwrap().task_started
    }

    /// Agent outputs forwarded so far, in production order.
    pub fn outputs(&self) -> Vec<String> {
        self.state.lock().unwrap().outputs.clone()
    }

    /// Block until a scheduled task has started and every registered
    /// completion signal has fired.
    ///
    /// The two-phase wait tolerates the race where this is called before
    /// `schedule()` has reached `on_task_started`: phase one parks on the
    /// started flag, phase two on the completion signals, and neither
    /// deadlocks nor returns prematurely.
    pub async fn wait_for_all_tasks(&self) {
        // The watch latches once any task has started; a waiter that shows
        // up after a fast task already finished still gets past phase one
        // instead of missing the wakeup.
        let mut started = self.started_rx.clone();
        while !*started.borrow() {
            if started.changed().await.is_err() {
                return;
            }
        }

        info!("task has started, waiting for completion");
        let receivers: Vec<_> = self
            .state
            .lock()
            .unwrap()
            .completions
            .values()
            .map(CompletionSignal::subscribe)
            .collect();
        for mut receiver in receivers {
            while !*receiver.borrow() {
                if receiver.changed().await.is_err() {
                    break;
                }
            }
        }
    }

    fn finish_schedule(&self, schedule_id: ScheduleId) {
        let mut state = self.state.lock().unwrap();
        if let Some(signal) = state.completions.get(&schedule_id) {
            signal.signal();
        }
        state.task_started = false;
    }

    fn forward_output(&self, message: &SessionMessage) {
        let line = describe_output(message);
        info!("{line}");
        self.state.lock().unwrap().outputs.push(line);
    }
}

/// Render one agent output for forwarding.
fn describe_output(message: &SessionMessage) -> String {
    match &message.content {
        MessageContent::Text(text) => format!("{}: {}", message.sender, text),
        MessageContent::File { file_name } => {
            format!("{}: provided file {}", message.sender, file_name)
        }
        MessageContent::Image { file_name } => {
            format!("{}: provided image {}", message.sender, file_name)
        }
    }
}

#[async_trait]
impl TaskCallbacks for MultiAgentOrchestrator {
    async fn on_task_started(&self, task: &Task, schedule_id: ScheduleId) -> anyhow::Result<()> {
        info!(task_id = %task.id(), %schedule_id, "task started");
        // Register the completion signal and latch the started flag before
        // any fallible work: if session creation fails, the schedule still
        // fails through on_task_failed, and a waiter parked in phase one of
        // wait_for_all_tasks must get past the started latch to observe
        // that completion signal.
        {
            let mut state = self.state.lock().unwrap();
            state.completions.insert(schedule_id, CompletionSignal::new());
            state.task_started = true;
        }
        let _ = self.started_tx.send(true);

        // One shared session for the whole task; sub-requests build on each
        // other's output.
        let session_id = self.sessions.create_session().await?;
        self.state.lock().unwrap().session_id = Some(session_id);
        Ok(())
    }

    async fn on_task_execute(&self, task: &Task, schedule_id: ScheduleId) -> anyhow::Result<()> {
        info!(task_id = %task.id(), %schedule_id, "task execute");
        let requests = task
            .multi_requests()
            .context("orchestrator schedules multi tasks only")?
            .to_vec();
        let session_id = self
            .session_id()
            .context("task executed before a session was opened")?;

        let callbacks: Arc<dyn RunCallbacks> = self
            .self_ref
            .upgrade()
            .context("orchestrator dropped while a task was executing")?;
        let processor = RunProcessor::new(
            self.runs.clone(),
            self.sessions.clone(),
            self.tools.clone(),
            callbacks,
        );

        for request in requests {
            self.sessions
                .append_message(&session_id, SessionMessage::user_text(&request.task))
                .await?;
            let seen = self.sessions.conversation(&session_id).await?.len();

            processor.process_run(&session_id, &request.assistant).await?;

            // Forward only what this agent just produced.
            let conversation = self.sessions.conversation(&session_id).await?;
            for message in conversation.iter().skip(seen) {
                if message.sender == request.assistant {
                    self.forward_output(message);
                }
            }
        }
        Ok(())
    }

    async fn on_task_completed(
        &self,
        task: &Task,
        schedule_id: ScheduleId,
        result: &str,
    ) -> anyhow::Result<()> {
        info!(task_id = %task.id(), %schedule_id, %result, "task completed");
        self.finish_schedule(schedule_id);
        Ok(())
    }

    async fn on_task_failed(
        &self,
        task: &Task,
        schedule_id: ScheduleId,
        error: &str,
    ) -> anyhow::Result<()> {
        warn!(task_id = %task.id(), %schedule_id, %error, "task failed");
        self.finish_schedule(schedule_id);
        Ok(())
    }
}

#[async_trait]
impl RunCallbacks for MultiAgentOrchestrator {
    async fn on_run_update(
        &self,
        assistant_name: &str,
        run_id: &str,
        status: RunStatus,
        _session_id: &str,
        _is_first_message: bool,
        _message: Option<&StreamedMessage>,
    ) {
        // Progress only; no control-flow effect.
        debug!(%assistant_name, %run_id, %status, "run update");
    }

    async fn on_run_failed(
        &self,
        assistant_name: &str,
        run_id: &str,
        _end_at: DateTime<Utc>,
        code: &str,
        message: &str,
        _session_id: &str,
    ) {
        warn!(%assistant_name, %run_id, %code, %message, "run failed");
    }

    async fn on_function_call_processed(
        &self,
        assistant_name: &str,
        run_id: &str,
        function_name: &str,
        arguments: &str,
        response: &str,
    ) {
        if response.contains("error") {
            warn!(
                %assistant_name, %run_id, %function_name, %arguments,
                "function call failed: {response}"
            );
        } else {
            info!(%assistant_name, %run_id, %function_name, "function call processed");
        }
    }
}
