//! Collaborator traits for the Compass execution pipeline.
//!
//! The core depends on exactly two outside collaborators:
//!
//! - `ModelInvoker` produces free text for a prompt (may be backed by any
//!   hosted or local language model)
//! - `Tool` performs one named external action on an agent's behalf
//!
//! The executor never calls a model API or a tool endpoint directly. Both
//! traits are async because each call is a suspension point; nothing in the
//! core holds a lock across them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use compass_contracts::{
    agent::{AgentId, MemoryPolicy, Persona, SecurityPolicy},
    error::CompassResult,
    task::ExecutionContext,
};

/// Sampling options forwarded to the model collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self { temperature: 0.7, max_tokens: 2000 }
    }
}

/// One call into the model collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub persona: Persona,
    pub available_tools: Vec<String>,
    pub options: GenerationOptions,
}

/// Text produced by a successful model call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    pub text: String,
    /// Identifier of the provider that answered.
    pub provider: String,
    pub elapsed_ms: u64,
}

/// The model-invocation collaborator.
///
/// An `Err` here is a provider failure. The executor turns it into an
/// unsuccessful `ExecutionOutput` rather than propagating it, so the caller
/// can still record metrics for the attempt.
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> CompassResult<Generation>;
}

/// Everything a tool may know about the agent invoking it.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolContext {
    pub agent_id: AgentId,
    pub agent_name: String,
    pub security: SecurityPolicy,
    pub memory: MemoryPolicy,
    pub execution: ExecutionContext,
}

/// An externally supplied tool implementation.
///
/// Built-in tools are a closed set inside the catalog. Anything else the
/// host process wants agents to reach is registered through this trait.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Catalog key; must match the `name` declared in agent definitions.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema describing accepted parameters.
    fn parameter_schema(&self) -> serde_json::Value;

    /// Perform the action.
    ///
    /// Implementations report failures as `CompassError::Execution`.
    async fn invoke(
        &self,
        params: serde_json::Value,
        context: &ToolContext,
    ) -> CompassResult<serde_json::Value>;
}
