//! Backend run events and tool-call wire types.
//!
//! A run emits these in delivery order over an mpsc channel; the run state
//! machine consumes them without reordering.

/// Events emitted by a backend run.
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// The backend allocated a run for the session.
    RunCreated { run_id: String },
    /// A partial fragment of assistant message text.
    MessageDelta { text: String, is_final: bool },
    /// A partial fragment of a tool call. Fragments for one slot share an
    /// `index`; string fields are concatenated in arrival order.
    ToolCallDelta {
        index: usize,
        id: Option<String>,
        function_name: Option<String>,
        arguments: Option<String>,
    },
    /// The run cannot proceed without local tool execution.
    RequiresAction { tool_calls: Vec<ToolCall> },
    /// Terminal: the run finished successfully.
    RunCompleted,
    /// Terminal: the run failed backend-side.
    RunFailed {
        code: Option<String>,
        message: Option<String>,
    },
    /// Terminal: the run was cancelled.
    RunCancelled,
    /// An event type this crate does not model yet. Logged, never fatal.
    Unknown { kind: String },
}

/// A fully assembled tool call, ready for local execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// JSON-encoded arguments, as concatenated from the stream.
    pub arguments: String,
}

/// The result of executing one tool call locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub tool_call_id: String,
    pub output: String,
}
