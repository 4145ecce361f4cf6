//! The Compass runtime executor.
//!
//! The executor owns one `AgentInstance` per loaded definition and runs
//! single-agent tasks against it:
//!
//!   lookup instance → dispatch by kind → [tool | model call] → record metrics
//!
//! Metrics are recorded exactly once per `execute` call, on every path,
//! including timeouts and lookup failures inside the instance. The instance
//! map lock is never held across an `.await`: the instance `Arc` is cloned
//! out before any suspension point.

use std::{
    collections::{BTreeMap, VecDeque},
    sync::{Arc, Mutex, PoisonError, RwLock},
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use compass_contracts::{
    agent::{AgentDefinition, AgentId},
    error::{CompassError, CompassResult},
    execution::{InstanceMetrics, InstanceStatus, InstanceView},
    task::{AgentTask, ExecutionContext, ExecutionOutput, TaskKind},
};

use crate::{
    catalog::{ToolCatalog, ToolHandle, ToolLookup},
    traits::{GenerationOptions, GenerationRequest, ModelInvoker, ToolContext},
};

const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Tunables applied to every execution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExecutorSettings {
    pub call_timeout: Duration,
    pub generation: GenerationOptions,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            generation: GenerationOptions::default(),
        }
    }
}

/// A definition bound to the tools it could resolve.
pub struct AgentInstance {
    definition: Arc<AgentDefinition>,
    bound_tools: BTreeMap<String, ToolHandle>,
    missing_tools: Vec<String>,
    created_at: DateTime<Utc>,
    status: Mutex<InstanceStatus>,
    metrics: Mutex<InstanceMetrics>,
    /// Timestamps of recent tool invocations, oldest first.
    recent_calls: Mutex<VecDeque<Instant>>,
}

impl AgentInstance {
    pub fn definition(&self) -> &AgentDefinition {
        &self.definition
    }

    pub fn status(&self) -> InstanceStatus {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_status(&self, status: InstanceStatus) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = status;
    }

    fn tool_names(&self) -> Vec<String> {
        self.bound_tools.keys().cloned().collect()
    }

    pub fn metrics(&self) -> InstanceMetrics {
        self.metrics.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn view(&self) -> InstanceView {
        InstanceView {
            agent_id: self.definition.id,
            name: self.definition.name.clone(),
            status: self.status(),
            created_at: self.created_at,
            bound_tools: self.bound_tools.keys().cloned().collect(),
            missing_tools: self.missing_tools.clone(),
            metrics: self.metrics(),
        }
    }

    fn record(&self, elapsed_ms: u64, success: bool) {
        self.metrics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(elapsed_ms, success);
    }

    /// Admit one tool call under the sliding-window rate ceiling.
    fn admit_call(&self, now: Instant) -> CompassResult<()> {
        let limit = self.definition.security.max_calls_per_minute;
        let mut calls = self.recent_calls.lock().unwrap_or_else(PoisonError::into_inner);
        while calls.front().is_some_and(|t| now.duration_since(*t) >= RATE_WINDOW) {
            calls.pop_front();
        }
        if calls.len() >= limit as usize {
            return Err(CompassError::RateLimited {
                agent: self.definition.id.to_string(),
                limit,
            });
        }
        calls.push_back(now);
        Ok(())
    }
}

/// Aggregate counters across every instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutorTotals {
    pub instances: usize,
    pub active: usize,
    pub tasks_executed: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
}

/// Runs tasks against live agent instances.
pub struct Executor {
    model: Arc<dyn ModelInvoker>,
    catalog: Arc<ToolCatalog>,
    settings: ExecutorSettings,
    instances: RwLock<BTreeMap<AgentId, Arc<AgentInstance>>>,
}

impl Executor {
    pub fn new(
        model: Arc<dyn ModelInvoker>,
        catalog: Arc<ToolCatalog>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            model,
            catalog,
            settings,
            instances: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn catalog(&self) -> &Arc<ToolCatalog> {
        &self.catalog
    }

    /// Bind a definition to the catalog and make it executable.
    ///
    /// Tools missing from the catalog are logged and skipped. A definition
    /// that already has a live instance is rejected with `Conflict`; a
    /// stopped instance is replaced.
    pub fn instantiate(&self, definition: Arc<AgentDefinition>) -> CompassResult<InstanceView> {
        let mut bound_tools = BTreeMap::new();
        let mut missing_tools = Vec::new();
        for spec in &definition.tools {
            match self.catalog.lookup(&spec.name) {
                ToolLookup::Found(handle) => {
                    bound_tools.insert(spec.name.clone(), handle);
                }
                ToolLookup::NotFound => {
                    warn!(
                        agent_id = %definition.id,
                        tool = %spec.name,
                        "declared tool not in catalog, continuing without it"
                    );
                    missing_tools.push(spec.name.clone());
                }
            }
        }

        let instance = Arc::new(AgentInstance {
            definition: Arc::clone(&definition),
            bound_tools,
            missing_tools,
            created_at: Utc::now(),
            status: Mutex::new(InstanceStatus::Initializing),
            metrics: Mutex::new(InstanceMetrics::default()),
            recent_calls: Mutex::new(VecDeque::new()),
        });

        {
            let mut instances = self.instances.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(existing) = instances.get(&definition.id) {
                if existing.status() != InstanceStatus::Stopped {
                    return Err(CompassError::Conflict { id: definition.id.to_string() });
                }
            }
            instances.insert(definition.id, Arc::clone(&instance));
        }
        instance.set_status(InstanceStatus::Active);

        info!(
            agent_id = %definition.id,
            name = %definition.name,
            tools = instance.bound_tools.len(),
            "agent instance active"
        );
        Ok(instance.view())
    }

    /// Execute one task on one agent.
    ///
    /// # Errors
    ///
    /// - `AgentNotFound` if no active instance exists (no metrics recorded)
    /// - `CapabilityNotFound` / `ToolNotFound` for unknown targets
    /// - `RateLimited`, `Timeout`, `Execution` for tool-path failures
    ///
    /// A model provider failure is NOT an error: it comes back as
    /// `Ok(ExecutionOutput { success: false, .. })`.
    pub async fn execute(
        &self,
        agent_id: AgentId,
        task: &AgentTask,
        context: &ExecutionContext,
    ) -> CompassResult<ExecutionOutput> {
        let instance = self.active_instance(agent_id)?;
        let started = Instant::now();

        debug!(agent_id = %agent_id, kind = ?task.kind, "executing agent task");

        let result = match tokio::time::timeout(
            self.settings.call_timeout,
            self.dispatch(&instance, task, context),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(CompassError::Timeout {
                agent: agent_id.to_string(),
                timeout_ms: self.settings.call_timeout.as_millis() as u64,
            }),
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let success = matches!(&result, Ok(output) if output.success);
        instance.record(elapsed_ms, success);

        match result {
            Ok(mut output) => {
                output.elapsed_ms = elapsed_ms;
                if !success {
                    warn!(
                        agent_id = %agent_id,
                        error = output.error.as_deref().unwrap_or("unknown"),
                        "agent execution returned failure"
                    );
                }
                Ok(output)
            }
            Err(err) => {
                warn!(agent_id = %agent_id, error = %err, "agent execution failed");
                Err(err)
            }
        }
    }

    async fn dispatch(
        &self,
        instance: &AgentInstance,
        task: &AgentTask,
        context: &ExecutionContext,
    ) -> CompassResult<ExecutionOutput> {
        let definition = instance.definition();

        match &task.kind {
            TaskKind::CapabilityExecution { capability } => {
                let spec = definition
                    .enabled_capabilities()
                    .find(|c| &c.name == capability)
                    .ok_or_else(|| CompassError::CapabilityNotFound {
                        agent: definition.id.to_string(),
                        capability: capability.clone(),
                    })?;
                let mut prompt = build_prompt(definition, &instance.tool_names(), task, context);
                prompt.push_str(&format!(
                    "\nCapability: {} - {}\n",
                    spec.name, spec.description
                ));
                if !spec.parameters.is_null() {
                    prompt.push_str(&format!("Capability parameters: {}\n", spec.parameters));
                }
                Ok(self.generate(instance, prompt).await)
            }

            TaskKind::ToolExecution { tool } => {
                let handle = instance.bound_tools.get(tool).ok_or_else(|| {
                    CompassError::ToolNotFound {
                        agent: definition.id.to_string(),
                        tool: tool.clone(),
                    }
                })?;
                instance.admit_call(Instant::now())?;

                let tool_ctx = ToolContext {
                    agent_id: definition.id,
                    agent_name: definition.name.clone(),
                    security: definition.security.clone(),
                    memory: definition.memory.clone(),
                    execution: context.clone(),
                };
                let output = self
                    .catalog
                    .invoke(handle, task.parameters.clone(), &tool_ctx)
                    .await?;
                Ok(ExecutionOutput {
                    success: true,
                    output,
                    provider: Some(format!("tool:{tool}")),
                    elapsed_ms: 0,
                    error: None,
                })
            }

            TaskKind::General => {
                let prompt = build_prompt(definition, &instance.tool_names(), task, context);
                Ok(self.generate(instance, prompt).await)
            }
        }
    }

    async fn generate(&self, instance: &AgentInstance, prompt: String) -> ExecutionOutput {
        let request = GenerationRequest {
            prompt,
            persona: instance.definition().persona.clone(),
            available_tools: instance.tool_names(),
            options: self.settings.generation,
        };
        match self.model.generate(&request).await {
            Ok(generation) => ExecutionOutput {
                success: true,
                output: serde_json::json!({ "text": generation.text }),
                provider: Some(generation.provider),
                elapsed_ms: generation.elapsed_ms,
                error: None,
            },
            Err(err) => ExecutionOutput {
                success: false,
                output: serde_json::Value::Null,
                provider: None,
                elapsed_ms: 0,
                error: Some(err.to_string()),
            },
        }
    }

    fn active_instance(&self, agent_id: AgentId) -> CompassResult<Arc<AgentInstance>> {
        let instances = self.instances.read().unwrap_or_else(PoisonError::into_inner);
        instances
            .get(&agent_id)
            .filter(|i| i.status() == InstanceStatus::Active)
            .cloned()
            .ok_or_else(|| CompassError::AgentNotFound { id: agent_id.to_string() })
    }

    pub fn status(&self, agent_id: AgentId) -> Option<InstanceView> {
        let instances = self.instances.read().unwrap_or_else(PoisonError::into_inner);
        instances.get(&agent_id).map(|i| i.view())
    }

    pub fn list_instances(&self) -> Vec<InstanceView> {
        let instances = self.instances.read().unwrap_or_else(PoisonError::into_inner);
        instances.values().map(|i| i.view()).collect()
    }

    pub fn totals(&self) -> ExecutorTotals {
        self.list_instances()
            .into_iter()
            .fold(ExecutorTotals::default(), |mut acc, view| {
                acc.instances += 1;
                if view.status == InstanceStatus::Active {
                    acc.active += 1;
                }
                acc.tasks_executed += view.metrics.tasks_executed;
                acc.tasks_completed += view.metrics.tasks_completed;
                acc.tasks_failed += view.metrics.tasks_failed;
                acc
            })
    }

    /// Stop and remove one instance.
    pub fn unload(&self, agent_id: AgentId) -> CompassResult<()> {
        let removed = self
            .instances
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&agent_id);
        match removed {
            Some(instance) => {
                instance.set_status(InstanceStatus::Stopped);
                info!(agent_id = %agent_id, "agent instance unloaded");
                Ok(())
            }
            None => Err(CompassError::AgentNotFound { id: agent_id.to_string() }),
        }
    }

    /// Stop every instance. Later `execute` calls fail with `AgentNotFound`.
    pub fn shutdown(&self) {
        let instances = self.instances.read().unwrap_or_else(PoisonError::into_inner);
        for instance in instances.values() {
            instance.set_status(InstanceStatus::Stopped);
        }
        info!(instances = instances.len(), "executor shut down");
    }
}

/// Render the prompt handed to the model collaborator.
pub fn build_prompt(
    definition: &AgentDefinition,
    tools: &[String],
    task: &AgentTask,
    context: &ExecutionContext,
) -> String {
    let persona = &definition.persona;
    let mut prompt = format!(
        "You are {}, {}.\nTone: {}\n\n{}\n",
        definition.name, persona.role, persona.tone, persona.instructions
    );
    if !persona.personality.is_null() {
        prompt.push_str(&format!("Personality: {}\n", persona.personality));
    }

    let unknown = "unknown";
    prompt.push_str(&format!(
        "\nContext:\n- Platform: {}\n- User: {}\n- Session: {}\n",
        context.platform.as_deref().unwrap_or(unknown),
        context.user_id.as_deref().unwrap_or(unknown),
        context.session_id.as_deref().unwrap_or(unknown),
    ));

    if tools.is_empty() {
        prompt.push_str("\nAvailable tools: none\n");
    } else {
        prompt.push_str(&format!("\nAvailable tools: {}\n", tools.join(", ")));
    }

    prompt.push_str(&format!("\nTask: {}\n", task.description));
    if !task.parameters.is_null() {
        prompt.push_str(&format!("Parameters: {}\n", task.parameters));
    }
    prompt
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use serde_json::json;

    use compass_contracts::{
        agent::{
            AgentDefinition, AgentId, CapabilitySpec, MemoryPolicy, Persona, SecurityPolicy,
            ToolSpec, ToolType,
        },
        error::{CompassError, CompassResult},
        execution::InstanceStatus,
        task::{AgentTask, ExecutionContext, TaskKind},
    };

    use crate::{
        catalog::ToolCatalog,
        traits::{Generation, GenerationRequest, ModelInvoker},
    };

    use super::{build_prompt, Executor, ExecutorSettings};

    // ── Mock helpers ─────────────────────────────────────────────────────────

    /// A model that records every prompt and can be told to fail.
    struct MockModel {
        prompts: Arc<Mutex<Vec<String>>>,
        fail: bool,
        delay: Option<std::time::Duration>,
    }

    impl MockModel {
        fn ok() -> Self {
            Self { prompts: Arc::new(Mutex::new(vec![])), fail: false, delay: None }
        }

        fn failing() -> Self {
            Self { fail: true, ..Self::ok() }
        }

        fn slow(delay: std::time::Duration) -> Self {
            Self { delay: Some(delay), ..Self::ok() }
        }
    }

    #[async_trait]
    impl ModelInvoker for MockModel {
        async fn generate(&self, request: &GenerationRequest) -> CompassResult<Generation> {
            self.prompts.lock().unwrap().push(request.prompt.clone());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(CompassError::Execution {
                    agent: "model".to_string(),
                    reason: "provider unavailable".to_string(),
                });
            }
            Ok(Generation {
                text: format!("answer from {}", request.persona.role),
                provider: "mock".to_string(),
                elapsed_ms: 1,
            })
        }
    }

    fn definition(max_calls: u32) -> Arc<AgentDefinition> {
        Arc::new(AgentDefinition {
            id: AgentId::new(),
            name: "Luna".to_string(),
            version: "1.0".to_string(),
            author: "travel-team".to_string(),
            description: "Trip architect".to_string(),
            tags: vec![],
            created: None,
            persona: Persona {
                role: "trip architect".to_string(),
                tone: "warm".to_string(),
                instructions: "Design memorable itineraries.".to_string(),
                personality: serde_json::Value::Null,
                communication_style: serde_json::Value::Null,
            },
            capabilities: vec![
                CapabilitySpec {
                    name: "itinerary_design".to_string(),
                    description: "Build day-by-day plans".to_string(),
                    enabled: true,
                    parameters: serde_json::Value::Null,
                },
                CapabilitySpec {
                    name: "visa_lookup".to_string(),
                    description: "Disabled".to_string(),
                    enabled: false,
                    parameters: serde_json::Value::Null,
                },
            ],
            tools: vec![
                ToolSpec {
                    name: "memory_store".to_string(),
                    tool_type: ToolType::Function,
                    endpoint: String::new(),
                    parameters: serde_json::Value::Null,
                    auth: serde_json::Value::Null,
                },
                ToolSpec {
                    name: "flight_search".to_string(),
                    tool_type: ToolType::Api,
                    endpoint: "https://flights.test".to_string(),
                    parameters: serde_json::Value::Null,
                    auth: serde_json::Value::Null,
                },
            ],
            memory: MemoryPolicy::default(),
            security: SecurityPolicy {
                max_calls_per_minute: max_calls,
                ..SecurityPolicy::default()
            },
            integrity: None,
        })
    }

    fn executor(model: MockModel) -> Executor {
        Executor::new(
            Arc::new(model),
            Arc::new(ToolCatalog::with_builtins()),
            ExecutorSettings::default(),
        )
    }

    fn task(kind: TaskKind) -> AgentTask {
        AgentTask {
            kind,
            description: "Plan three days in Kyoto".to_string(),
            parameters: json!({ "days": 3 }),
        }
    }

    // ── Tests ────────────────────────────────────────────────────────────────

    #[test]
    fn missing_tool_degrades_gracefully() {
        let exec = executor(MockModel::ok());
        let view = exec.instantiate(definition(100)).unwrap();

        assert_eq!(view.status, InstanceStatus::Active);
        assert_eq!(view.bound_tools, vec!["memory_store".to_string()]);
        assert_eq!(view.missing_tools, vec!["flight_search".to_string()]);
    }

    #[test]
    fn second_live_instance_is_a_conflict() {
        let exec = executor(MockModel::ok());
        let def = definition(100);
        exec.instantiate(Arc::clone(&def)).unwrap();

        let again = exec.instantiate(def);
        assert!(matches!(again, Err(CompassError::Conflict { .. })));
        assert_eq!(exec.list_instances().len(), 1);
    }

    #[tokio::test]
    async fn general_task_calls_model_with_persona_prompt() {
        let model = MockModel::ok();
        let prompts = Arc::clone(&model.prompts);
        let exec = executor(model);
        let def = definition(100);
        exec.instantiate(Arc::clone(&def)).unwrap();

        let out = exec
            .execute(def.id, &task(TaskKind::General), &ExecutionContext::default())
            .await
            .unwrap();

        assert!(out.success);
        assert_eq!(out.output["text"], "answer from trip architect");
        let prompts = prompts.lock().unwrap();
        assert!(prompts[0].contains("Tone: warm"));
        assert!(prompts[0].contains("Available tools: memory_store"));
        assert!(prompts[0].contains("Task: Plan three days in Kyoto"));
    }

    #[tokio::test]
    async fn provider_failure_is_structured_and_counted() {
        let exec = executor(MockModel::failing());
        let def = definition(100);
        exec.instantiate(Arc::clone(&def)).unwrap();

        let out = exec
            .execute(def.id, &task(TaskKind::General), &ExecutionContext::default())
            .await
            .unwrap();

        assert!(!out.success);
        assert!(out.error.unwrap().contains("provider unavailable"));
        let metrics = exec.status(def.id).unwrap().metrics;
        assert_eq!(metrics.tasks_executed, 1);
        assert_eq!(metrics.tasks_failed, 1);
    }

    #[tokio::test]
    async fn disabled_capability_is_not_found() {
        let exec = executor(MockModel::ok());
        let def = definition(100);
        exec.instantiate(Arc::clone(&def)).unwrap();

        let kind = TaskKind::CapabilityExecution { capability: "visa_lookup".to_string() };
        let result = exec.execute(def.id, &task(kind), &ExecutionContext::default()).await;
        assert!(matches!(result, Err(CompassError::CapabilityNotFound { .. })));

        let kind = TaskKind::CapabilityExecution { capability: "itinerary_design".to_string() };
        let out = exec.execute(def.id, &task(kind), &ExecutionContext::default()).await.unwrap();
        assert!(out.success);
    }

    #[tokio::test]
    async fn unbound_tool_is_not_found() {
        let exec = executor(MockModel::ok());
        let def = definition(100);
        exec.instantiate(Arc::clone(&def)).unwrap();

        let kind = TaskKind::ToolExecution { tool: "flight_search".to_string() };
        let result = exec.execute(def.id, &task(kind), &ExecutionContext::default()).await;
        assert!(matches!(result, Err(CompassError::ToolNotFound { .. })));
    }

    #[tokio::test]
    async fn metrics_invariant_holds_across_mixed_outcomes() {
        let exec = executor(MockModel::ok());
        let def = definition(100);
        exec.instantiate(Arc::clone(&def)).unwrap();
        let ctx = ExecutionContext::default();

        let kinds = [
            TaskKind::General,
            TaskKind::ToolExecution { tool: "missing".to_string() },
            TaskKind::CapabilityExecution { capability: "itinerary_design".to_string() },
            TaskKind::ToolExecution { tool: "memory_store".to_string() },
        ];
        for kind in kinds {
            let _ = exec.execute(def.id, &task(kind), &ctx).await;
            let m = exec.status(def.id).unwrap().metrics;
            assert_eq!(m.tasks_executed, m.tasks_completed + m.tasks_failed);
        }

        let m = exec.status(def.id).unwrap().metrics;
        assert_eq!(m.tasks_executed, 4);
        // memory_store without 'content' fails inside the tool.
        assert_eq!(m.tasks_failed, 2);
    }

    #[tokio::test]
    async fn tool_calls_respect_rate_ceiling() {
        let exec = executor(MockModel::ok());
        let def = definition(2);
        exec.instantiate(Arc::clone(&def)).unwrap();

        let store = AgentTask {
            kind: TaskKind::ToolExecution { tool: "memory_store".to_string() },
            description: "remember".to_string(),
            parameters: json!({ "content": "window seat", "type": "preference" }),
        };
        let ctx = ExecutionContext::default();

        assert!(exec.execute(def.id, &store, &ctx).await.is_ok());
        assert!(exec.execute(def.id, &store, &ctx).await.is_ok());
        let third = exec.execute(def.id, &store, &ctx).await;
        assert!(matches!(third, Err(CompassError::RateLimited { limit: 2, .. })));
        assert_eq!(exec.status(def.id).unwrap().metrics.tasks_failed, 1);
    }

    #[tokio::test]
    async fn slow_model_times_out_and_counts_as_failure() {
        let exec = Executor::new(
            Arc::new(MockModel::slow(std::time::Duration::from_millis(200))),
            Arc::new(ToolCatalog::with_builtins()),
            ExecutorSettings {
                call_timeout: std::time::Duration::from_millis(20),
                ..ExecutorSettings::default()
            },
        );
        let def = definition(100);
        exec.instantiate(Arc::clone(&def)).unwrap();

        let result = exec
            .execute(def.id, &task(TaskKind::General), &ExecutionContext::default())
            .await;
        assert!(matches!(result, Err(CompassError::Timeout { timeout_ms: 20, .. })));
        assert_eq!(exec.status(def.id).unwrap().metrics.tasks_failed, 1);
    }

    #[tokio::test]
    async fn shutdown_makes_agents_unavailable() {
        let exec = executor(MockModel::ok());
        let def = definition(100);
        exec.instantiate(Arc::clone(&def)).unwrap();
        exec.shutdown();

        let result = exec
            .execute(def.id, &task(TaskKind::General), &ExecutionContext::default())
            .await;
        assert!(matches!(result, Err(CompassError::AgentNotFound { .. })));
        assert_eq!(exec.status(def.id).unwrap().status, InstanceStatus::Stopped);
        assert_eq!(exec.totals().active, 0);
    }

    #[test]
    fn unload_removes_instance() {
        let exec = executor(MockModel::ok());
        let def = definition(100);
        exec.instantiate(Arc::clone(&def)).unwrap();

        exec.unload(def.id).unwrap();
        assert!(exec.status(def.id).is_none());
        assert!(matches!(exec.unload(def.id), Err(CompassError::AgentNotFound { .. })));
    }

    #[test]
    fn prompt_includes_context_and_parameters() {
        let def = definition(100);
        let ctx = ExecutionContext {
            platform: Some("telegram".to_string()),
            user_id: Some("u-42".to_string()),
            ..ExecutionContext::default()
        };
        let prompt = build_prompt(&def, &[], &task(TaskKind::General), &ctx);

        assert!(prompt.contains("You are Luna, trip architect."));
        assert!(prompt.contains("- Platform: telegram"));
        assert!(prompt.contains("- User: u-42"));
        assert!(prompt.contains("- Session: unknown"));
        assert!(prompt.contains("Available tools: none"));
        assert!(prompt.contains(r#"Parameters: {"days":3}"#));
    }
}
