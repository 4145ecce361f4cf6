//! Task lifecycle and execution result types.
//!
//! A `Task` moves linearly through `TaskStatus`:
//!
//!   Queued → Analyzing → Selecting → Executing → Completed | Failed
//!
//! `Completed` and `Failed` are terminal. A retry is always a new task with
//! a new `TaskId`.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::AgentId;

/// Unique identifier of one submitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(pub uuid::Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Which executor path a task takes on a single agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskKind {
    /// Free-form task answered by the model collaborator.
    General,
    /// Run one named capability of the agent.
    CapabilityExecution { capability: String },
    /// Invoke one bound tool directly.
    ToolExecution { tool: String },
}

/// Caller-supplied context carried into every execution of a task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    /// Anything else the caller wants visible to tools.
    #[serde(default)]
    pub attributes: serde_json::Value,
}

/// What a caller submits to the orchestration engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub description: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
    #[serde(default)]
    pub context: ExecutionContext,
    /// Forces one executor path for every selected agent when set.
    #[serde(default)]
    pub kind: Option<TaskKind>,
}

impl TaskRequest {
    /// A general request with no parameters and an empty context.
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            parameters: serde_json::Value::Null,
            context: ExecutionContext::default(),
            kind: None,
        }
    }
}

/// Linear task lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Analyzing,
    Selecting,
    Executing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Return true if `next` is a legal successor of `self`.
    ///
    /// Every non-terminal state may fail; otherwise only the single forward
    /// step is legal.
    pub fn can_advance_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Queued, Analyzing)
            | (Analyzing, Selecting)
            | (Selecting, Executing)
            | (Executing, Completed) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// A task as tracked by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub description: String,
    pub parameters: serde_json::Value,
    pub context: ExecutionContext,
    pub kind: Option<TaskKind>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Create a queued task from a request.
    pub fn from_request(request: TaskRequest) -> Self {
        Self {
            id: TaskId::new(),
            description: request.description,
            parameters: request.parameters,
            context: request.context,
            kind: request.kind,
            status: TaskStatus::Queued,
            created_at: Utc::now(),
        }
    }
}

/// The unit of work the executor runs against one agent instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentTask {
    pub kind: TaskKind,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// The value the executor returns for one agent execution.
///
/// A provider failure on the model path comes back as `success = false`
/// with `error` populated rather than as an `Err`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutput {
    pub success: bool,
    pub output: serde_json::Value,
    pub provider: Option<String>,
    pub elapsed_ms: u64,
    pub error: Option<String>,
}

/// Per-agent slot in an aggregated orchestration result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AgentOutcome {
    Succeeded { output: ExecutionOutput },
    Failed { code: String, message: String },
}

impl AgentOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AgentOutcome::Succeeded { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    pub agent_id: AgentId,
    pub agent_name: String,
    pub outcome: AgentOutcome,
}

/// User-facing failure description. `code` is a stable `ErrorCode` string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub code: String,
    pub reason: String,
}

/// Terminal result of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed { results: Vec<AgentResult> },
    Failed { failure: TaskFailure, results: Vec<AgentResult> },
}

impl TaskOutcome {
    pub fn status(&self) -> TaskStatus {
        match self {
            TaskOutcome::Completed { .. } => TaskStatus::Completed,
            TaskOutcome::Failed { .. } => TaskStatus::Failed,
        }
    }

    pub fn results(&self) -> &[AgentResult] {
        match self {
            TaskOutcome::Completed { results } | TaskOutcome::Failed { results, .. } => results,
        }
    }
}

/// What a status query returns for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskView {
    pub id: TaskId,
    pub description: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub agent_ids: Vec<AgentId>,
    /// Every status the task has held, oldest first, ending with `status`.
    #[serde(default)]
    pub history: Vec<TaskStatus>,
    /// Present once the task is terminal.
    pub outcome: Option<TaskOutcome>,
}

/// Emitted once per task when it reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub task_id: TaskId,
    pub elapsed_ms: u64,
    pub agent_ids: Vec<AgentId>,
    pub outcome: TaskStatus,
    /// The winning search dimension, when the candidate search ran.
    pub dimension: Option<String>,
}
