//! The orchestration engine.
//!
//! Every task runs one linear pipeline on a pooled worker:
//!
//!   Queued → Analyzing → Selecting → Executing → Completed | Failed
//!
//! `submit` returns the task id immediately; the pipeline waits for a pool
//! permit, then runs to completion. Agents selected for one task are
//! executed sequentially in selection-rank order. A terminal transition
//! emits exactly one `TaskEvent` on the broadcast channel.
//!
//! Selection errors never escape the engine: they become a failed task
//! with a stable error code.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, PoisonError, RwLock},
    time::Instant,
};

use chrono::{DateTime, Utc};
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Semaphore};
use tracing::{debug, info, warn};

use compass_contracts::{
    agent::{AgentId, AgentSummary},
    error::{CompassError, CompassResult},
    selection::{Candidate, TaskAnalysis},
    task::{
        AgentOutcome, AgentResult, AgentTask, Task, TaskEvent, TaskFailure, TaskId, TaskKind,
        TaskOutcome, TaskRequest, TaskStatus, TaskView,
    },
};
use compass_core::Executor;
use compass_registry::Registry;

use crate::{
    keywords::{default_keyword_groups, KeywordGroup, TaskAnalyzer},
    search::{rank_agents, CandidateSearch},
};

/// Engine tunables.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub max_concurrent_tasks: usize,
    /// Fixed seed for reproducible candidate search; entropy when `None`.
    pub search_seed: Option<u64>,
    pub adjustment_damping: f64,
    pub event_buffer: usize,
    pub keyword_groups: Vec<KeywordGroup>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 8,
            search_seed: None,
            adjustment_damping: 0.1,
            event_buffer: 256,
            keyword_groups: default_keyword_groups(),
        }
    }
}

/// Agents chosen for a task, best first.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub agents: Vec<AgentSummary>,
    /// Winning dimension when the candidate search produced the selection.
    pub dimension: Option<String>,
    pub candidates: Vec<Candidate>,
}

/// Engine-wide counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineTotals {
    pub orchestrated: u64,
    pub completed: u64,
    pub failed: u64,
    pub average_orchestration_ms: f64,
}

struct TaskEntry {
    task: Task,
    updated_at: DateTime<Utc>,
    agent_ids: Vec<AgentId>,
    dimension: Option<String>,
    history: Vec<TaskStatus>,
    outcome: Option<TaskOutcome>,
}

impl TaskEntry {
    fn view(&self) -> TaskView {
        TaskView {
            id: self.task.id,
            description: self.task.description.clone(),
            status: self.task.status,
            created_at: self.task.created_at,
            updated_at: self.updated_at,
            agent_ids: self.agent_ids.clone(),
            history: self.history.clone(),
            outcome: self.outcome.clone(),
        }
    }
}

/// Routes free-text tasks to agents and aggregates their results.
pub struct OrchestrationEngine {
    registry: Arc<Registry>,
    executor: Arc<Executor>,
    analyzer: TaskAnalyzer,
    search: CandidateSearch,
    rng: Mutex<StdRng>,
    bias: RwLock<BTreeMap<String, f64>>,
    tasks: Mutex<BTreeMap<TaskId, TaskEntry>>,
    events: broadcast::Sender<TaskEvent>,
    permits: Arc<Semaphore>,
    totals: Mutex<EngineTotals>,
}

impl OrchestrationEngine {
    pub fn new(registry: Arc<Registry>, executor: Arc<Executor>, settings: EngineSettings) -> Self {
        let rng = match settings.search_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let (events, _) = broadcast::channel(settings.event_buffer.max(1));
        Self {
            registry,
            executor,
            analyzer: TaskAnalyzer::new(settings.keyword_groups),
            search: CandidateSearch::new(settings.adjustment_damping),
            rng: Mutex::new(rng),
            bias: RwLock::new(BTreeMap::new()),
            tasks: Mutex::new(BTreeMap::new()),
            events,
            permits: Arc::new(Semaphore::new(settings.max_concurrent_tasks.max(1))),
            totals: Mutex::new(EngineTotals::default()),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    pub fn analyzer(&self) -> &TaskAnalyzer {
        &self.analyzer
    }

    // ── Public API ───────────────────────────────────────────────────────────

    pub fn analyze(&self, description: &str) -> TaskAnalysis {
        self.analyzer.analyze(description)
    }

    /// Choose agents for an analyzed task.
    ///
    /// Search first when enabled; direct capability lookup when the search
    /// is skipped or yields nobody. Returns `NoAgentAvailable` only when no
    /// registered agent holds any required capability.
    pub fn select_agents(&self, analysis: &TaskAnalysis) -> CompassResult<Selection> {
        if analysis.search_enabled {
            let groups: Vec<&KeywordGroup> = analysis
                .dimensions
                .iter()
                .filter_map(|d| self.analyzer.group(d))
                .collect();
            let bias = self.bias.read().unwrap_or_else(PoisonError::into_inner).clone();
            let outcome = {
                let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
                self.search.run(&groups, &bias, &mut *rng)
            };

            if let Some(outcome) = outcome {
                let dimension = outcome.winner.approach_tag.clone();
                let capabilities = self
                    .analyzer
                    .group(&dimension)
                    .map(|g| g.capabilities.clone())
                    .unwrap_or_default();
                let agents = rank_agents(
                    &self.registry,
                    &capabilities,
                    &analysis.required_capabilities,
                    analysis.estimated_agents,
                );
                debug!(
                    dimension = %dimension,
                    score = outcome.winner.normalized_score,
                    agents = agents.len(),
                    "candidate search collapsed"
                );
                if !agents.is_empty() {
                    return Ok(Selection {
                        agents,
                        dimension: Some(dimension),
                        candidates: outcome.candidates,
                    });
                }
            }
            debug!("candidate search produced no agents, falling back to direct lookup");
        }

        let agents = self.direct_lookup(analysis);
        if agents.is_empty() {
            return Err(CompassError::NoAgentAvailable {
                capabilities: analysis.required_capabilities.clone(),
            });
        }
        Ok(Selection { agents, dimension: None, candidates: Vec::new() })
    }

    fn direct_lookup(&self, analysis: &TaskAnalysis) -> Vec<AgentSummary> {
        let mut agents: Vec<AgentSummary> = Vec::new();
        for capability in &analysis.required_capabilities {
            for summary in self.registry.by_capability(capability) {
                if !agents.iter().any(|a| a.id == summary.id) {
                    agents.push(summary);
                }
            }
        }
        agents.truncate(analysis.estimated_agents);
        agents
    }

    /// Execute `task` on each agent in order and aggregate the results.
    ///
    /// One agent failing never stops the rest. The task completes if any
    /// agent succeeded; otherwise the first failure is representative.
    pub async fn dispatch(
        &self,
        task: &Task,
        agents: &[AgentSummary],
        analysis: &TaskAnalysis,
    ) -> TaskOutcome {
        let mut results = Vec::with_capacity(agents.len());

        for agent in agents {
            let agent_task = AgentTask {
                kind: dispatch_kind(task.kind.as_ref(), agent, &analysis.required_capabilities),
                description: task.description.clone(),
                parameters: task.parameters.clone(),
            };
            let outcome = match self.executor.execute(agent.id, &agent_task, &task.context).await {
                Ok(output) if output.success => AgentOutcome::Succeeded { output },
                Ok(output) => AgentOutcome::Failed {
                    code: "execution_error".to_string(),
                    message: output.error.unwrap_or_else(|| "agent reported failure".to_string()),
                },
                Err(err) => AgentOutcome::Failed {
                    code: err.code().to_string(),
                    message: err.to_string(),
                },
            };
            if let AgentOutcome::Failed { code, .. } = &outcome {
                warn!(task_id = %task.id, agent_id = %agent.id, code = %code, "agent failed task");
            }
            results.push(AgentResult {
                agent_id: agent.id,
                agent_name: agent.name.clone(),
                outcome,
            });
        }

        if results.iter().any(|r| r.outcome.is_success()) {
            return TaskOutcome::Completed { results };
        }
        let failure = results
            .iter()
            .find_map(|r| match &r.outcome {
                AgentOutcome::Failed { code, message } => Some(TaskFailure {
                    code: code.clone(),
                    reason: message.clone(),
                }),
                AgentOutcome::Succeeded { .. } => None,
            })
            .unwrap_or_else(|| TaskFailure {
                code: "no_agent_available".to_string(),
                reason: "no agents were dispatched".to_string(),
            });
        TaskOutcome::Failed { failure, results }
    }

    /// Register a task and return its id without waiting for it to run.
    pub fn submit(self: &Arc<Self>, request: TaskRequest) -> TaskId {
        let id = self.enqueue(request);
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            engine.run_queued(id).await;
        });
        id
    }

    /// Register a task and run it to completion on the caller's task.
    pub async fn run(&self, request: TaskRequest) -> CompassResult<TaskView> {
        let id = self.enqueue(request);
        self.run_queued(id).await;
        self.status(id)
    }

    pub fn status(&self, id: TaskId) -> CompassResult<TaskView> {
        self.view(id).ok_or_else(|| CompassError::TaskNotFound { id: id.to_string() })
    }

    /// Every known task, oldest first.
    pub fn tasks(&self) -> Vec<TaskView> {
        let tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        let mut views: Vec<TaskView> = tasks.values().map(TaskEntry::view).collect();
        views.sort_by_key(|v| v.created_at);
        views
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    /// Replace the per-dimension weight multipliers used by the search.
    pub fn set_strategy_bias(&self, bias: BTreeMap<String, f64>) {
        info!(dimensions = bias.len(), "strategy bias updated");
        *self.bias.write().unwrap_or_else(PoisonError::into_inner) = bias;
    }

    pub fn strategy_bias(&self) -> BTreeMap<String, f64> {
        self.bias.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn totals(&self) -> EngineTotals {
        self.totals.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Refuse new pool permits. Queued tasks that have not started fail.
    pub fn shutdown(&self) {
        self.permits.close();
        info!("orchestration engine closed");
    }

    // ── Pipeline ─────────────────────────────────────────────────────────────

    fn enqueue(&self, request: TaskRequest) -> TaskId {
        let task = Task::from_request(request);
        let id = task.id;
        debug!(task_id = %id, description = %task.description, "task queued");
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner).insert(
            id,
            TaskEntry {
                updated_at: task.created_at,
                task,
                agent_ids: Vec::new(),
                dimension: None,
                history: vec![TaskStatus::Queued],
                outcome: None,
            },
        );
        id
    }

    async fn run_queued(&self, id: TaskId) {
        let started = Instant::now();
        let _permit = match Arc::clone(&self.permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                let failure = TaskFailure {
                    code: "shutdown".to_string(),
                    reason: "orchestration engine is shut down".to_string(),
                };
                self.finish(id, TaskOutcome::Failed { failure, results: Vec::new() }, started);
                return;
            }
        };

        let Some(task) = self.advance(id, TaskStatus::Analyzing) else {
            return;
        };
        let analysis = self.analyze(&task.description);
        debug!(
            task_id = %id,
            complexity = ?analysis.complexity,
            capabilities = ?analysis.required_capabilities,
            "task analyzed"
        );

        self.advance(id, TaskStatus::Selecting);
        let selection = match self.select_agents(&analysis) {
            Ok(selection) => selection,
            Err(err) => {
                let failure = TaskFailure { code: err.code().to_string(), reason: err.to_string() };
                self.finish(id, TaskOutcome::Failed { failure, results: Vec::new() }, started);
                return;
            }
        };
        self.record_selection(id, &selection);

        self.advance(id, TaskStatus::Executing);
        let outcome = self.dispatch(&task, &selection.agents, &analysis).await;
        self.finish(id, outcome, started);
    }

    /// Move a task forward, returning a snapshot of it.
    fn advance(&self, id: TaskId, next: TaskStatus) -> Option<Task> {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = tasks.get_mut(&id)?;
        if !entry.task.status.can_advance_to(next) {
            warn!(
                task_id = %id,
                from = ?entry.task.status,
                to = ?next,
                "illegal task transition ignored"
            );
            return None;
        }
        entry.task.status = next;
        entry.updated_at = Utc::now();
        entry.history.push(next);
        Some(entry.task.clone())
    }

    fn record_selection(&self, id: TaskId, selection: &Selection) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = tasks.get_mut(&id) {
            entry.agent_ids = selection.agents.iter().map(|a| a.id).collect();
            entry.dimension = selection.dimension.clone();
        }
    }

    fn finish(&self, id: TaskId, outcome: TaskOutcome, started: Instant) {
        let status = outcome.status();
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let event = {
            let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(entry) = tasks.get_mut(&id) else {
                return;
            };
            if !entry.task.status.can_advance_to(status) {
                warn!(
                    task_id = %id,
                    from = ?entry.task.status,
                    to = ?status,
                    "illegal task transition ignored"
                );
                return;
            }
            entry.task.status = status;
            entry.updated_at = Utc::now();
            entry.history.push(status);
            entry.outcome = Some(outcome);
            TaskEvent {
                task_id: id,
                elapsed_ms,
                agent_ids: entry.agent_ids.clone(),
                outcome: status,
                dimension: entry.dimension.clone(),
            }
        };

        {
            let mut totals = self.totals.lock().unwrap_or_else(PoisonError::into_inner);
            totals.orchestrated += 1;
            match status {
                TaskStatus::Completed => totals.completed += 1,
                _ => totals.failed += 1,
            }
            let n = totals.orchestrated as f64;
            totals.average_orchestration_ms +=
                (elapsed_ms as f64 - totals.average_orchestration_ms) / n;
        }

        info!(
            task_id = %id,
            status = ?status,
            elapsed_ms,
            agents = event.agent_ids.len(),
            "task finished"
        );
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    fn view(&self, id: TaskId) -> Option<TaskView> {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .map(TaskEntry::view)
    }
}

/// Executor path for one agent: explicit kind, else the first required
/// capability the agent holds, else a general task.
fn dispatch_kind(
    explicit: Option<&TaskKind>,
    agent: &AgentSummary,
    required: &[String],
) -> TaskKind {
    if let Some(kind) = explicit {
        return kind.clone();
    }
    required
        .iter()
        .find(|c| agent.capabilities.contains(c))
        .map(|capability| TaskKind::CapabilityExecution { capability: capability.clone() })
        .unwrap_or(TaskKind::General)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(capabilities: &[&str]) -> AgentSummary {
        AgentSummary {
            id: AgentId::new(),
            name: "budgeter".to_string(),
            version: "1.0".to_string(),
            author: "travel-team".to_string(),
            description: String::new(),
            tags: vec![],
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
            tools: vec![],
        }
    }

    #[test]
    fn first_required_capability_held_picks_the_path() {
        let agent = summary(&["price_tracking", "budget_analysis"]);
        let required = vec!["budget_analysis".to_string(), "price_tracking".to_string()];

        assert_eq!(
            dispatch_kind(None, &agent, &required),
            TaskKind::CapabilityExecution { capability: "budget_analysis".to_string() }
        );
    }

    #[test]
    fn agent_without_required_capability_gets_general_task() {
        let agent = summary(&["fact_checking"]);
        assert_eq!(
            dispatch_kind(None, &agent, &["budget_analysis".to_string()]),
            TaskKind::General
        );
        assert_eq!(dispatch_kind(None, &agent, &[]), TaskKind::General);
    }

    #[test]
    fn explicit_kind_wins() {
        let agent = summary(&["budget_analysis"]);
        let explicit = TaskKind::ToolExecution { tool: "api_call".to_string() };
        assert_eq!(
            dispatch_kind(Some(&explicit), &agent, &["budget_analysis".to_string()]),
            explicit
        );
    }
}
