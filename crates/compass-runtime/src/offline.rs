//! A deterministic stand-in for a hosted model.

use async_trait::async_trait;

use compass_contracts::error::CompassResult;
use compass_core::traits::{Generation, GenerationRequest, ModelInvoker};

pub const OFFLINE_PROVIDER: &str = "offline";

/// Answers from the persona and the prompt's task line alone. Same request,
/// same text.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineModel;

#[async_trait]
impl ModelInvoker for OfflineModel {
    async fn generate(&self, request: &GenerationRequest) -> CompassResult<Generation> {
        let task = request
            .prompt
            .lines()
            .find_map(|line| line.strip_prefix("Task: "))
            .unwrap_or("the request");
        let tools = match request.available_tools.as_slice() {
            [] => String::from("no tools"),
            names => names.join(", "),
        };

        Ok(Generation {
            text: format!(
                "As {} ({}), I would approach \"{}\" using {}.",
                request.persona.role, request.persona.tone, task, tools
            ),
            provider: OFFLINE_PROVIDER.to_string(),
            elapsed_ms: 0,
        })
    }
}
