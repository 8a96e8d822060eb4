//! Opaque backend collaborators consumed by the orchestration core.
//!
//! The core never talks to a vendor API directly; it consumes three
//! capabilities: a run service (creates runs and streams their events), a
//! conversation session store, and a local tool executor. Implementations
//! live outside this crate.

pub mod events;

use anyhow::Error;
use async_trait::async_trait;
use tokio::sync::mpsc;

use events::{RunEvent, ToolCall, ToolOutput};

/// Identifier of a backend-held conversation session.
pub type SessionId = String;

/// Role of a message within a conversation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Content of a session message. Agents can produce plain text as well as
/// file and image attachments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageContent {
    Text(String),
    File { file_name: String },
    Image { file_name: String },
}

/// One entry in a conversation session's ordered log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionMessage {
    /// Display name of the sender ("user" or an assistant name).
    pub sender: String,
    pub role: Role,
    pub content: MessageContent,
}

impl SessionMessage {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            sender: "user".to_string(),
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn assistant_text(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
        }
    }

    /// The text content, or `None` for file/image messages.
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// Creates backend runs and streams their events.
///
/// The backend run model is strictly sequential per session: at most one
/// active run exists per session at any time.
#[async_trait]
pub trait RunService: Send + Sync {
    /// Open a run for `assistant_name` against the session and stream its
    /// events in delivery order. The channel closes when the stream ends.
    async fn create_run(
        &self,
        session_id: &str,
        assistant_name: &str,
    ) -> Result<mpsc::Receiver<RunEvent>, Error>;

    /// Submit local tool outputs for a run awaiting action; the returned
    /// channel streams the continuation of the run.
    async fn submit_tool_outputs(
        &self,
        session_id: &str,
        run_id: &str,
        outputs: Vec<ToolOutput>,
    ) -> Result<mpsc::Receiver<RunEvent>, Error>;

    /// Cancel an in-flight run.
    async fn cancel_run(&self, session_id: &str, run_id: &str) -> Result<(), Error>;
}

/// Backend-held store of conversation sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self) -> Result<SessionId, Error>;

    async fn append_message(
        &self,
        session_id: &str,
        message: SessionMessage,
    ) -> Result<(), Error>;

    /// The most recent message, optionally filtered by sender name.
    async fn last_message(
        &self,
        session_id: &str,
        sender: Option<&str>,
    ) -> Result<Option<SessionMessage>, Error>;

    /// The full ordered message log of a session.
    async fn conversation(&self, session_id: &str) -> Result<Vec<SessionMessage>, Error>;
}

/// Executes tool calls locally and returns their outputs.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, tool_calls: &[ToolCall]) -> Result<Vec<ToolOutput>, Error>;
}
