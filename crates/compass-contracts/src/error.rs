//! Error taxonomy for the Compass orchestration core.
//!
//! All fallible operations return `CompassResult<T>`. Load-time errors are
//! fatal to one file, never to a batch. Expected outcomes (insufficient A/B
//! samples, failed tasks) are modelled as return values elsewhere; the
//! matching variants here exist for callers that want `?` propagation.

use thiserror::Error;

/// The unified error type for the Compass runtime.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompassError {
    /// A definition is missing required structure or violates a bound.
    #[error("schema validation failed for '{origin}': {reason}")]
    Schema { origin: String, reason: String },

    /// A declared integrity digest does not match the content.
    #[error("integrity check failed for '{origin}': {reason}")]
    Integrity { origin: String, reason: String },

    /// An agent with this id is already registered.
    #[error("agent '{id}' is already registered")]
    Conflict { id: String },

    #[error("agent '{id}' not found or not active")]
    AgentNotFound { id: String },

    #[error("agent '{agent}' has no capability '{capability}'")]
    CapabilityNotFound { agent: String, capability: String },

    #[error("agent '{agent}' has no bound tool '{tool}'")]
    ToolNotFound { agent: String, tool: String },

    /// Selection found no agent covering any required capability.
    #[error("no agent available for capabilities [{}]", .capabilities.join(", "))]
    NoAgentAvailable { capabilities: Vec<String> },

    /// A tool or model call failed underneath an agent execution.
    #[error("execution failed on agent '{agent}': {reason}")]
    Execution { agent: String, reason: String },

    #[error("call on agent '{agent}' timed out after {timeout_ms}ms")]
    Timeout { agent: String, timeout_ms: u64 },

    #[error("agent '{agent}' exceeded its limit of {limit} calls per minute")]
    RateLimited { agent: String, limit: u32 },

    #[error("insufficient sample: {participants} participants, {required} required")]
    InsufficientSample { participants: u64, required: u64 },

    #[error("task '{id}' not found")]
    TaskNotFound { id: String },

    #[error("A/B test '{id}' not found")]
    TestNotFound { id: String },

    /// The test is completed and its assignment map is frozen.
    #[error("A/B test '{id}' is already concluded")]
    TestConcluded { id: String },

    #[error("configuration error: {reason}")]
    Config { reason: String },

    #[error("i/o error on '{path}': {reason}")]
    Io { path: String, reason: String },
}

impl CompassError {
    /// Stable, machine-readable code for user-facing status payloads.
    pub fn code(&self) -> &'static str {
        match self {
            CompassError::Schema { .. } => "schema_error",
            CompassError::Integrity { .. } => "integrity_error",
            CompassError::Conflict { .. } => "conflict",
            CompassError::AgentNotFound { .. } => "agent_not_found",
            CompassError::CapabilityNotFound { .. } => "capability_not_found",
            CompassError::ToolNotFound { .. } => "tool_not_found",
            CompassError::NoAgentAvailable { .. } => "no_agent_available",
            CompassError::Execution { .. } => "execution_error",
            CompassError::Timeout { .. } => "timeout",
            CompassError::RateLimited { .. } => "rate_limited",
            CompassError::InsufficientSample { .. } => "insufficient_sample",
            CompassError::TaskNotFound { .. } => "task_not_found",
            CompassError::TestNotFound { .. } => "test_not_found",
            CompassError::TestConcluded { .. } => "test_concluded",
            CompassError::Config { .. } => "config_error",
            CompassError::Io { .. } => "io_error",
        }
    }
}

/// Convenience alias used throughout the Compass crates.
pub type CompassResult<T> = Result<T, CompassError>;
