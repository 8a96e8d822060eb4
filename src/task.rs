//! Task model: units of work handed to the scheduler.
//!
//! A task describes *what* to run, never *how* — `execute` performs no
//! backend I/O itself. Fan-out and agent calls live in the orchestration
//! layer, which keeps the scheduler generic over task kind.

use std::future::Future;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Unique identifier for a task.
///
/// Assigned at construction and carried unchanged through the task's
/// lifecycle; never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One sub-request of a multi-agent task: which assistant, and what to ask it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub assistant: String,
    pub task: String,
}

/// The kind-specific payload of a task.
#[derive(Debug, Clone)]
pub enum TaskKind {
    /// A single user request.
    Basic { user_request: String },
    /// An ordered sequence of user requests; may be empty.
    Batch { requests: Vec<String> },
    /// An ordered, non-empty sequence of per-assistant sub-requests.
    Multi { requests: Vec<TaskRequest> },
}

/// A unit of work to be scheduled.
#[derive(Debug, Clone)]
pub struct Task {
    id: TaskId,
    assistant_name: Option<String>,
    kind: TaskKind,
}

impl Task {
    pub fn basic(user_request: impl Into<String>) -> Self {
        Self {
            id: TaskId::new(),
            assistant_name: None,
            kind: TaskKind::Basic {
                user_request: user_request.into(),
            },
        }
    }

    pub fn batch(requests: Vec<String>) -> Self {
        Self {
            id: TaskId::new(),
            assistant_name: None,
            kind: TaskKind::Batch { requests },
        }
    }

    /// Create a multi-agent task from typed sub-requests.
    ///
    /// # Errors
    /// Returns [`TaskError::EmptyRequests`] if `requests` is empty.
    pub fn multi(requests: Vec<TaskRequest>) -> Result<Self, TaskError> {
        if requests.is_empty() {
            return Err(TaskError::EmptyRequests);
        }
        Ok(Self {
            id: TaskId::new(),
            assistant_name: None,
            kind: TaskKind::Multi { requests },
        })
    }

    /// Create a multi-agent task from raw JSON, as produced by a planner
    /// agent.
    ///
    /// A single object is coerced to a one-element sequence. An array must
    /// contain only objects with `assistant` and `task` string fields.
    /// Validation happens here, at construction time, never at execution
    /// time.
    pub fn multi_from_value(requests: Value) -> Result<Self, TaskError> {
        let normalized = match requests {
            Value::Object(_) => vec![Self::request_from_value(requests)?],
            Value::Array(items) => items
                .into_iter()
                .map(Self::request_from_value)
                .collect::<Result<Vec<_>, _>>()?,
            other => return Err(TaskError::InvalidRequests(value_kind(&other))),
        };
        Self::multi(normalized)
    }

    fn request_from_value(value: Value) -> Result<TaskRequest, TaskError> {
        if !value.is_object() {
            return Err(TaskError::MalformedRequest(value_kind(&value)));
        }
        serde_json::from_value(value).map_err(|e| TaskError::MissingField(e.to_string()))
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn kind(&self) -> &TaskKind {
        &self.kind
    }

    pub fn is_multi(&self) -> bool {
        matches!(self.kind, TaskKind::Multi { .. })
    }

    /// The sub-requests of a multi task, or `None` for other kinds.
    pub fn multi_requests(&self) -> Option<&[TaskRequest]> {
        match &self.kind {
            TaskKind::Multi { requests } => Some(requests),
            _ => None,
        }
    }

    pub fn assistant_name(&self) -> Option<&str> {
        self.assistant_name.as_deref()
    }

    /// Assign the target assistant. The scheduler sets `None` for multi
    /// tasks, since fan-out picks the target per sub-request.
    pub fn set_assistant_name(&mut self, assistant_name: Option<String>) {
        self.assistant_name = assistant_name;
    }

    /// Execute the task body: invoke the work callback exactly once, if one
    /// is provided. Performs no backend I/O.
    pub async fn execute<F, Fut>(&self, callback: Option<F>) -> anyhow::Result<()>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = anyhow::Result<()>> + Send,
    {
        if let Some(callback) = callback {
            callback().await?;
        }
        Ok(())
    }
}

fn value_kind(value: &Value) -> String {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
    .to_string()
}

/// Validation errors raised when constructing a task.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskError {
    #[error("Multi task requests must not be empty")]
    EmptyRequests,

    #[error("Requests must be an object or an array of objects, got {0}")]
    InvalidRequests(String),

    #[error("All items in the requests list must be objects, got {0}")]
    MalformedRequest(String),

    #[error("Request object is missing required fields: {0}")]
    MissingField(String),
}
