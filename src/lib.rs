//! # agentsched
//!
//! Task scheduling and multi-agent run orchestration core.
//!
//! This library provides:
//! - A scheduler for immediate, delayed, and recurring tasks with a
//!   callback-driven lifecycle
//! - A run state machine that turns a backend's streamed run events into
//!   ordered local notifications
//! - A multi-agent orchestrator that fans sub-requests out to named agents
//!   over one shared conversation session
//!
//! ## Data Flow
//!
//! ```text
//!   caller ──schedule(task)──▶ TaskScheduler
//!                                   │ spawns
//!                                   ▼
//!                          task.execute(callback)
//!                                   │
//!                                   ▼
//!                  MultiAgentOrchestrator::on_task_execute
//!                                   │ per sub-request
//!                                   ▼
//!                    RunProcessor ◀── backend run events
//!                                   │
//!                                   ▼
//!                    on_run_* / on_task_* callbacks
//! ```
//!
//! The backend itself is opaque: the core consumes a run service, a
//! conversation session store, and a tool executor through the traits in
//! [`backend`]. No vendor API, prompt construction, or persistence lives
//! here.
//!
//! ## Modules
//! - `task`: task model (basic, batch, multi) with eager validation
//! - `scheduler`: independent per-schedule execution units, timers, recurrence
//! - `run`: delta accumulation and the run lifecycle state machine
//! - `orchestrator`: multi-agent fan-out and completion synchronization

pub mod backend;
pub mod orchestrator;
pub mod run;
pub mod scheduler;
pub mod task;

#[cfg(test)]
pub(crate) mod testutil;

pub use orchestrator::MultiAgentOrchestrator;
pub use run::{RunCallbacks, RunError, RunProcessor, RunStatus};
pub use scheduler::{ScheduleId, ScheduleOptions, TaskCallbacks, TaskScheduler};
pub use task::{Task, TaskError, TaskId, TaskKind, TaskRequest};
