//! Per-run bookkeeping for the stream state machine.

use crate::backend::events::ToolCall;

/// A tool call being assembled from stream fragments.
///
/// Fragments for one slot arrive interleaved with fragments for other slots;
/// each string field grows by concatenation in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallAccumulator {
    pub id: String,
    pub function_name: String,
    pub arguments: String,
}

impl ToolCallAccumulator {
    /// Append the optional fragments of one delta.
    pub fn append(
        &mut self,
        id: Option<&str>,
        function_name: Option<&str>,
        arguments: Option<&str>,
    ) {
        self.id.push_str(id.unwrap_or(""));
        self.function_name.push_str(function_name.unwrap_or(""));
        self.arguments.push_str(arguments.unwrap_or(""));
    }

    pub fn into_tool_call(self) -> ToolCall {
        ToolCall {
            id: self.id,
            name: self.function_name,
            arguments: self.arguments,
        }
    }
}

/// Partial assistant message extended by each text delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamedMessage {
    pub sender: String,
    pub content: String,
}

impl StreamedMessage {
    pub fn new(sender: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            content: String::new(),
        }
    }

    pub fn append(&mut self, text: &str) {
        self.content.push_str(text);
    }
}

/// State for one run, created when the run-created event arrives and
/// discarded after the terminal transition.
#[derive(Debug)]
pub struct RunContext {
    pub run_id: String,
    pub session_id: String,
    pub assistant_name: String,
    pub is_first_message: bool,
    pub started: bool,
    /// Ensures exactly one terminal notification per run, even under nested
    /// tool-output resubmission.
    pub terminal_fired: bool,
    tool_calls: Vec<ToolCallAccumulator>,
    pub message: Option<StreamedMessage>,
}

impl RunContext {
    pub fn new(session_id: impl Into<String>, assistant_name: impl Into<String>) -> Self {
        Self {
            run_id: String::new(),
            session_id: session_id.into(),
            assistant_name: assistant_name.into(),
            is_first_message: true,
            started: false,
            terminal_fired: false,
            tool_calls: Vec::new(),
            message: None,
        }
    }

    /// The accumulator at `index`, growing the backing sequence with empty
    /// placeholders so out-of-order slot creation still sizes correctly.
    pub fn tool_call_at(&mut self, index: usize) -> &mut ToolCallAccumulator {
        while self.tool_calls.len() <= index {
            self.tool_calls.push(ToolCallAccumulator::default());
        }
        &mut self.tool_calls[index]
    }

    /// Take the accumulated tool calls, leaving the sequence empty.
    pub fn drain_tool_calls(&mut self) -> Vec<ToolCall> {
        std::mem::take(&mut self.tool_calls)
            .into_iter()
            .map(ToolCallAccumulator::into_tool_call)
            .collect()
    }

    pub fn accumulated_tool_calls(&self) -> &[ToolCallAccumulator] {
        &self.tool_calls
    }
}
