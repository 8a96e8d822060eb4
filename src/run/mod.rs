//! Run state machine: turns a backend run's event stream into ordered
//! local callbacks.
//!
//! States: `Created -> Started -> {Streaming}* -> RequiresAction? ->
//! Completed | Failed | Cancelled`. Events are consumed strictly in
//! delivery order; the machine is a pass-through accumulator plus
//! bookkeeping flags, never a reordering buffer.

pub mod context;

use std::sync::Arc;

use async_recursion::async_recursion;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::backend::events::{RunEvent, ToolCall};
use crate::backend::{RunService, SessionStore, ToolExecutor};
use context::{RunContext, StreamedMessage};

/// Status reported through `on_run_update`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Streaming,
    Completed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Streaming => "streaming",
            RunStatus::Completed => "completed",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle notifications for one backend run.
///
/// Default implementations are no-ops so implementors override only what
/// they consume.
#[allow(unused_variables)]
#[async_trait]
pub trait RunCallbacks: Send + Sync {
    /// The outermost run started processing `user_input`.
    async fn on_run_start(
        &self,
        assistant_name: &str,
        run_id: &str,
        start_at: DateTime<Utc>,
        user_input: &str,
    ) {
    }

    /// A streaming or completion update for the run's partial message.
    async fn on_run_update(
        &self,
        assistant_name: &str,
        run_id: &str,
        status: RunStatus,
        session_id: &str,
        is_first_message: bool,
        message: Option<&StreamedMessage>,
    ) {
    }

    /// The outermost run reached its end.
    async fn on_run_end(
        &self,
        assistant_name: &str,
        run_id: &str,
        end_at: DateTime<Utc>,
        session_id: &str,
    ) {
    }

    async fn on_run_failed(
        &self,
        assistant_name: &str,
        run_id: &str,
        end_at: DateTime<Utc>,
        code: &str,
        message: &str,
        session_id: &str,
    ) {
    }

    async fn on_run_cancelled(
        &self,
        assistant_name: &str,
        run_id: &str,
        end_at: DateTime<Utc>,
        session_id: &str,
    ) {
    }

    /// A local tool call finished; purely observational.
    async fn on_function_call_processed(
        &self,
        assistant_name: &str,
        run_id: &str,
        function_name: &str,
        arguments: &str,
        response: &str,
    ) {
    }
}

/// Errors surfaced by the run processor to its direct caller.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// The backend reported a required action with zero tool calls. The run
    /// is cancelled, not retried.
    #[error("run {run_id} requires action but no tool calls were provided")]
    Protocol { run_id: String },

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

enum Flow {
    Continue,
    Stop,
}

/// Drives one backend run to its terminal state, translating its event
/// stream into [`RunCallbacks`] notifications.
pub struct RunProcessor {
    runs: Arc<dyn RunService>,
    sessions: Arc<dyn SessionStore>,
    tools: Arc<dyn ToolExecutor>,
    callbacks: Arc<dyn RunCallbacks>,
}

impl RunProcessor {
    pub fn new(
        runs: Arc<dyn RunService>,
        sessions: Arc<dyn SessionStore>,
        tools: Arc<dyn ToolExecutor>,
        callbacks: Arc<dyn RunCallbacks>,
    ) -> Self {
        Self {
            runs,
            sessions,
            tools,
            callbacks,
        }
    }

    /// Open a run for `assistant_name` on the session and consume its event
    /// stream until the run terminates.
    pub async fn process_run(
        &self,
        session_id: &str,
        assistant_name: &str,
    ) -> Result<(), RunError> {
        let receiver = self.runs.create_run(session_id, assistant_name).await?;
        let mut ctx = RunContext::new(session_id, assistant_name);
        self.process_stream(&mut ctx, receiver, false).await?;

        // Stream closed without an explicit terminal event: the outermost
        // stream still owes its end notification (requires-action chains
        // terminate inside the nested submit stream, which is suppressed).
        if !ctx.terminal_fired && !ctx.run_id.is_empty() {
            self.fire_completed(&mut ctx).await;
        }
        Ok(())
    }

    #[async_recursion]
    async fn process_stream(
        &self,
        ctx: &mut RunContext,
        mut receiver: mpsc::Receiver<RunEvent>,
        is_submit_tool_call: bool,
    ) -> Result<(), RunError> {
        while let Some(event) = receiver.recv().await {
            let flow = self.handle_event(ctx, event, is_submit_tool_call).await?;
            if matches!(flow, Flow::Stop) {
                break;
            }
        }
        Ok(())
    }

    async fn handle_event(
        &self,
        ctx: &mut RunContext,
        event: RunEvent,
        is_submit_tool_call: bool,
    ) -> Result<Flow, RunError> {
        match event {
            RunEvent::RunCreated { run_id } => {
                debug!(%run_id, assistant = %ctx.assistant_name, "run created");
                ctx.run_id = run_id;
                if !ctx.started && !is_submit_tool_call {
                    let user_input = self
                        .sessions
                        .last_message(&ctx.session_id, Some("user"))
                        .await?
                        .and_then(|m| m.text().map(str::to_string))
                        .unwrap_or_default();
                    self.callbacks
                        .on_run_start(&ctx.assistant_name, &ctx.run_id, Utc::now(), &user_input)
                        .await;
                    ctx.started = true;
                }
            }

            RunEvent::MessageDelta { text, is_final } => {
                let assistant_name = ctx.assistant_name.clone();
                let message = ctx
                    .message
                    .get_or_insert_with(|| StreamedMessage::new(assistant_name));
                message.append(&text);
                let status = if is_final {
                    RunStatus::Completed
                } else {
                    RunStatus::Streaming
                };
                self.callbacks
                    .on_run_update(
                        &ctx.assistant_name,
                        &ctx.run_id,
                        status,
                        &ctx.session_id,
                        ctx.is_first_message,
                        ctx.message.as_ref(),
                    )
                    .await;
                ctx.is_first_message = false;
            }

            RunEvent::ToolCallDelta {
                index,
                id,
                function_name,
                arguments,
            } => {
                ctx.tool_call_at(index).append(
                    id.as_deref(),
                    function_name.as_deref(),
                    arguments.as_deref(),
                );
            }

            RunEvent::RequiresAction { tool_calls } => {
                return self.handle_requires_action(ctx, tool_calls).await;
            }

            RunEvent::RunCompleted => {
                if is_submit_tool_call {
                    debug!(run_id = %ctx.run_id, "submit stream completed");
                } else if !ctx.terminal_fired {
                    self.fire_completed(ctx).await;
                }
            }

            RunEvent::RunFailed { code, message } => {
                if !ctx.terminal_fired {
                    let code = code
                        .filter(|c| !c.is_empty())
                        .unwrap_or_else(|| "UNKNOWN_ERROR".to_string());
                    let message = message
                        .filter(|m| !m.is_empty())
                        .unwrap_or_else(|| "No error message".to_string());
                    warn!(run_id = %ctx.run_id, %code, %message, "run failed");
                    self.callbacks
                        .on_run_failed(
                            &ctx.assistant_name,
                            &ctx.run_id,
                            Utc::now(),
                            &code,
                            &message,
                            &ctx.session_id,
                        )
                        .await;
                    ctx.terminal_fired = true;
                }
            }

            RunEvent::RunCancelled => {
                if !ctx.terminal_fired {
                    info!(run_id = %ctx.run_id, "run cancelled");
                    self.callbacks
                        .on_run_cancelled(
                            &ctx.assistant_name,
                            &ctx.run_id,
                            Utc::now(),
                            &ctx.session_id,
                        )
                        .await;
                    ctx.terminal_fired = true;
                }
            }

            RunEvent::Unknown { kind } => {
                debug!(run_id = %ctx.run_id, %kind, "unhandled run event");
            }
        }
        Ok(Flow::Continue)
    }

    async fn fire_completed(&self, ctx: &mut RunContext) {
        self.callbacks
            .on_run_update(
                &ctx.assistant_name,
                &ctx.run_id,
                RunStatus::Completed,
                &ctx.session_id,
                ctx.is_first_message,
                ctx.message.as_ref(),
            )
            .await;
        self.callbacks
            .on_run_end(&ctx.assistant_name, &ctx.run_id, Utc::now(), &ctx.session_id)
            .await;
        ctx.terminal_fired = true;
    }

    /// Execute the run's pending tool calls and resubmit their outputs,
    /// re-entering the state machine for the resulting sub-stream.
    async fn handle_requires_action(
        &self,
        ctx: &mut RunContext,
        event_tool_calls: Vec<ToolCall>,
    ) -> Result<Flow, RunError> {
        // Drain the accumulators unconditionally so a later requires-action
        // round on the same run never sees this round's fragments.
        let accumulated = ctx.drain_tool_calls();
        let tool_calls: Vec<ToolCall> = if event_tool_calls.is_empty() {
            // Fall back to the delta-accumulated list, skipping placeholder
            // slots that never received a fragment.
            accumulated
                .into_iter()
                .filter(|c| !c.id.is_empty() || !c.name.is_empty())
                .collect()
        } else {
            event_tool_calls
        };

        if tool_calls.is_empty() {
            error!(
                run_id = %ctx.run_id,
                "run requires tool call action but no tool calls provided; cancelling"
            );
            self.runs.cancel_run(&ctx.session_id, &ctx.run_id).await?;
            return Err(RunError::Protocol {
                run_id: ctx.run_id.clone(),
            });
        }

        let outputs = self.tools.execute(&tool_calls).await?;
        for call in &tool_calls {
            let response = outputs
                .iter()
                .find(|o| o.tool_call_id == call.id)
                .map(|o| o.output.as_str())
                .unwrap_or("No response");
            self.callbacks
                .on_function_call_processed(
                    &ctx.assistant_name,
                    &ctx.run_id,
                    &call.name,
                    &call.arguments,
                    response,
                )
                .await;
        }

        if outputs.is_empty() {
            warn!(
                run_id = %ctx.run_id,
                "tool execution produced no outputs; not submitting"
            );
            return Ok(Flow::Stop);
        }

        let receiver = self
            .runs
            .submit_tool_outputs(&ctx.session_id, &ctx.run_id, outputs)
            .await?;
        self.process_stream(ctx, receiver, true).await?;
        Ok(Flow::Continue)
    }
}
