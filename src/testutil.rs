//! In-memory collaborator doubles shared by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::Error;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::backend::events::{RunEvent, ToolCall, ToolOutput};
use crate::backend::{RunService, SessionMessage, SessionStore, ToolExecutor};
use crate::run::context::StreamedMessage;
use crate::run::{RunCallbacks, RunStatus};
use crate::scheduler::{ScheduleId, TaskCallbacks};
use crate::task::Task;

fn channel_of(events: Vec<RunEvent>) -> mpsc::Receiver<RunEvent> {
    let (tx, rx) = mpsc::channel(events.len().max(1));
    for event in events {
        tx.try_send(event).expect("scripted channel overflow");
    }
    rx
}

/// A run service that plays back scripted event streams.
#[derive(Default)]
pub struct ScriptedRuns {
    initial: Mutex<Vec<RunEvent>>,
    continuation: Mutex<Vec<RunEvent>>,
    cancelled: Mutex<Vec<(String, String)>>,
    submitted: Mutex<Vec<(String, Vec<ToolOutput>)>>,
}

impl ScriptedRuns {
    pub fn new(initial: Vec<RunEvent>) -> Self {
        Self {
            initial: Mutex::new(initial),
            ..Default::default()
        }
    }

    /// Events returned by `submit_tool_outputs`.
    pub fn with_continuation(self, events: Vec<RunEvent>) -> Self {
        *self.continuation.lock().unwrap() = events;
        self
    }

    pub fn cancelled(&self) -> Vec<(String, String)> {
        self.cancelled.lock().unwrap().clone()
    }

    pub fn submitted(&self) -> Vec<(String, Vec<ToolOutput>)> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl RunService for ScriptedRuns {
    async fn create_run(
        &self,
        _session_id: &str,
        _assistant_name: &str,
    ) -> Result<mpsc::Receiver<RunEvent>, Error> {
        let events = std::mem::take(&mut *self.initial.lock().unwrap());
        Ok(channel_of(events))
    }

    async fn submit_tool_outputs(
        &self,
        _session_id: &str,
        run_id: &str,
        outputs: Vec<ToolOutput>,
    ) -> Result<mpsc::Receiver<RunEvent>, Error> {
        self.submitted
            .lock()
            .unwrap()
            .push((run_id.to_string(), outputs));
        let events = std::mem::take(&mut *self.continuation.lock().unwrap());
        Ok(channel_of(events))
    }

    async fn cancel_run(&self, session_id: &str, run_id: &str) -> Result<(), Error> {
        self.cancelled
            .lock()
            .unwrap()
            .push((session_id.to_string(), run_id.to_string()));
        Ok(())
    }
}

/// A session store seeded with fixed messages.
#[derive(Default)]
pub struct StaticSessions {
    messages: Mutex<HashMap<String, Vec<SessionMessage>>>,
}

impl StaticSessions {
    pub fn with_user_message(session_id: &str, text: &str) -> Self {
        let store = Self::default();
        store
            .messages
            .lock()
            .unwrap()
            .insert(session_id.to_string(), vec![SessionMessage::user_text(text)]);
        store
    }
}

#[async_trait]
impl SessionStore for StaticSessions {
    async fn create_session(&self) -> Result<String, Error> {
        let id = uuid::Uuid::new_v4().to_string();
        self.messages.lock().unwrap().insert(id.clone(), Vec::new());
        Ok(id)
    }

    async fn append_message(&self, session_id: &str, message: SessionMessage) -> Result<(), Error> {
        self.messages
            .lock()
            .unwrap()
            .entry(session_id.to_string())
            .or_default()
            .push(message);
        Ok(())
    }

    async fn last_message(
        &self,
        session_id: &str,
        sender: Option<&str>,
    ) -> Result<Option<SessionMessage>, Error> {
        Ok(self
            .messages
            .lock()
            .unwrap()
            .get(session_id)
            .map(|log| {
                log.iter()
                    .rev()
                    .find(|m| sender.map_or(true, |s| m.sender == s))
                    .cloned()
            })
            .unwrap_or(None))
    }

    async fn conversation(&self, session_id: &str) -> Result<Vec<SessionMessage>, Error> {
        Ok(self
            .messages
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// A combined run-service and session-store double: each run appends the
/// named agent's reply to the session and streams it back as a delta.
#[derive(Default)]
pub struct EchoBackend {
    sessions: Mutex<HashMap<String, Vec<SessionMessage>>>,
    run_counter: AtomicUsize,
}

impl EchoBackend {
    pub fn conversation_of(&self, session_id: &str) -> Vec<SessionMessage> {
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl RunService for EchoBackend {
    async fn create_run(
        &self,
        session_id: &str,
        assistant_name: &str,
    ) -> Result<mpsc::Receiver<RunEvent>, Error> {
        let run_id = format!("run-{}", self.run_counter.fetch_add(1, Ordering::SeqCst) + 1);
        let reply = {
            let mut sessions = self.sessions.lock().unwrap();
            let log = sessions.entry(session_id.to_string()).or_default();
            let user_text = log
                .iter()
                .rev()
                .find(|m| m.sender == "user")
                .and_then(|m| m.text().map(str::to_string))
                .unwrap_or_default();
            let reply = format!("{assistant_name} handled: {user_text}");
            log.push(SessionMessage::assistant_text(assistant_name, reply.clone()));
            reply
        };
        Ok(channel_of(vec![
            RunEvent::RunCreated { run_id },
            RunEvent::MessageDelta {
                text: reply,
                is_final: false,
            },
            RunEvent::RunCompleted,
        ]))
    }

    async fn submit_tool_outputs(
        &self,
        _session_id: &str,
        _run_id: &str,
        _outputs: Vec<ToolOutput>,
    ) -> Result<mpsc::Receiver<RunEvent>, Error> {
        Ok(channel_of(vec![RunEvent::RunCompleted]))
    }

    async fn cancel_run(&self, _session_id: &str, _run_id: &str) -> Result<(), Error> {
        Ok(())
    }
}

#[async_trait]
impl SessionStore for EchoBackend {
    async fn create_session(&self) -> Result<String, Error> {
        let id = uuid::Uuid::new_v4().to_string();
        self.sessions.lock().unwrap().insert(id.clone(), Vec::new());
        Ok(id)
    }

    async fn append_message(&self, session_id: &str, message: SessionMessage) -> Result<(), Error> {
        self.sessions
            .lock()
            .unwrap()
            .entry(session_id.to_string())
            .or_default()
            .push(message);
        Ok(())
    }

    async fn last_message(
        &self,
        session_id: &str,
        sender: Option<&str>,
    ) -> Result<Option<SessionMessage>, Error> {
        Ok(self
            .sessions
            .lock()
            .unwrap()
            .get(session_id)
            .and_then(|log| {
                log.iter()
                    .rev()
                    .find(|m| sender.map_or(true, |s| m.sender == s))
                    .cloned()
            }))
    }

    async fn conversation(&self, session_id: &str) -> Result<Vec<SessionMessage>, Error> {
        Ok(self.conversation_of(session_id))
    }
}

/// A tool executor returning canned outputs.
#[derive(Default)]
pub struct StubTools {
    outputs: Vec<ToolOutput>,
    executed: Mutex<Vec<ToolCall>>,
    calls: AtomicUsize,
}

impl StubTools {
    pub fn with_output(tool_call_id: &str, output: &str) -> Self {
        Self {
            outputs: vec![ToolOutput {
                tool_call_id: tool_call_id.to_string(),
                output: output.to_string(),
            }],
            ..Default::default()
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn executed(&self) -> Vec<ToolCall> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolExecutor for StubTools {
    async fn execute(&self, tool_calls: &[ToolCall]) -> Result<Vec<ToolOutput>, Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.executed.lock().unwrap().extend_from_slice(tool_calls);
        Ok(self.outputs.clone())
    }
}

/// Records run callbacks as flat strings for order-sensitive assertions.
#[derive(Default)]
pub struct RecordingCallbacks {
    events: Mutex<Vec<String>>,
}

impl RecordingCallbacks {
    pub fn run_events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl RunCallbacks for RecordingCallbacks {
    async fn on_run_start(
        &self,
        assistant_name: &str,
        run_id: &str,
        _start_at: DateTime<Utc>,
        user_input: &str,
    ) {
        self.push(format!("start:{assistant_name}:{run_id}:{user_input}"));
    }

    async fn on_run_update(
        &self,
        _assistant_name: &str,
        run_id: &str,
        status: RunStatus,
        _session_id: &str,
        is_first_message: bool,
        message: Option<&StreamedMessage>,
    ) {
        let content = message.map(|m| m.content.as_str()).unwrap_or("");
        self.push(format!(
            "update:{run_id}:{status}:first={is_first_message}:{content}"
        ));
    }

    async fn on_run_end(
        &self,
        assistant_name: &str,
        run_id: &str,
        _end_at: DateTime<Utc>,
        _session_id: &str,
    ) {
        self.push(format!("end:{assistant_name}:{run_id}"));
    }

    async fn on_run_failed(
        &self,
        _assistant_name: &str,
        run_id: &str,
        _end_at: DateTime<Utc>,
        code: &str,
        message: &str,
        _session_id: &str,
    ) {
        self.push(format!("failed:{run_id}:{code}:{message}"));
    }

    async fn on_run_cancelled(
        &self,
        _assistant_name: &str,
        run_id: &str,
        _end_at: DateTime<Utc>,
        _session_id: &str,
    ) {
        self.push(format!("cancelled:{run_id}"));
    }

    async fn on_function_call_processed(
        &self,
        _assistant_name: &str,
        run_id: &str,
        function_name: &str,
        arguments: &str,
        response: &str,
    ) {
        self.push(format!(
            "function:{run_id}:{function_name}:{arguments}:{response}"
        ));
    }
}

/// Poll `condition` until it holds, panicking after a generous timeout.
pub async fn wait_until(condition: impl Fn() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    panic!("condition was not met within the timeout");
}

/// Records task lifecycle callbacks and counts per phase.
#[derive(Default)]
pub struct RecordingTaskCallbacks {
    events: Mutex<Vec<String>>,
    started_assistants: Mutex<Vec<Option<String>>>,
    fail_execute: bool,
}

impl RecordingTaskCallbacks {
    pub fn failing_execute() -> Self {
        Self {
            fail_execute: true,
            ..Default::default()
        }
    }

    pub fn task_events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn count_of(&self, prefix: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }

    /// Assistant names observed at task start, in order.
    pub fn started_assistants(&self) -> Vec<Option<String>> {
        self.started_assistants.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskCallbacks for RecordingTaskCallbacks {
    async fn on_task_started(&self, task: &Task, schedule_id: ScheduleId) -> anyhow::Result<()> {
        self.started_assistants
            .lock()
            .unwrap()
            .push(task.assistant_name().map(str::to_string));
        self.events
            .lock()
            .unwrap()
            .push(format!("started:{schedule_id}"));
        Ok(())
    }

    async fn on_task_execute(&self, _task: &Task, schedule_id: ScheduleId) -> anyhow::Result<()> {
        self.events
            .lock()
            .unwrap()
            .push(format!("execute:{schedule_id}"));
        if self.fail_execute {
            anyhow::bail!("execute blew up");
        }
        Ok(())
    }

    async fn on_task_completed(
        &self,
        _task: &Task,
        schedule_id: ScheduleId,
        result: &str,
    ) -> anyhow::Result<()> {
        self.events
            .lock()
            .unwrap()
            .push(format!("completed:{schedule_id}:{result}"));
        Ok(())
    }

    async fn on_task_failed(
        &self,
        _task: &Task,
        schedule_id: ScheduleId,
        error: &str,
    ) -> anyhow::Result<()> {
        self.events
            .lock()
            .unwrap()
            .push(format!("failed:{schedule_id}:{error}"));
        Ok(())
    }
}
