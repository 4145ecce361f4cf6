//! The composition root.
//!
//! `Runtime::build` wires every component explicitly:
//!
//! ```text
//! agents dir ─► DefinitionLoader ─► Registry ─┬─► OrchestrationEngine ─► TaskEvent ─► FeedbackLoop
//!                                             └─► Executor ◄──────────────┘            │
//!                                                                  strategy bias ◄─────┘
//! ```
//!
//! There is no global state: callers hold the `Runtime` and reach each
//! component through it.

use std::{
    path::Path,
    sync::{Arc, Mutex, PoisonError},
};

use tokio::{sync::broadcast::error::RecvError, task::JoinHandle};
use tracing::{debug, info, warn};

use compass_contracts::{
    agent::{AgentDefinition, AgentId, AgentSummary},
    error::{CompassError, CompassResult},
};
use compass_core::{traits::ModelInvoker, Executor, ToolCatalog};
use compass_feedback::{FeedbackHandle, FeedbackLoop, StrategySink};
use compass_loader::{DefinitionLoader, LoadFailure, LoadReport};
use compass_orchestrator::OrchestrationEngine;
use compass_registry::Registry;

use crate::config::CompassConfig;

pub struct Runtime {
    config: CompassConfig,
    loader: DefinitionLoader,
    registry: Arc<Registry>,
    executor: Arc<Executor>,
    engine: Arc<OrchestrationEngine>,
    feedback: Arc<FeedbackLoop>,
    startup: LoadReport,
    forwarder: JoinHandle<()>,
    scheduler: Mutex<Option<FeedbackHandle>>,
}

impl Runtime {
    /// Load the agents directory and bring every component up.
    ///
    /// Bad definition files, duplicate ids and instantiation failures are
    /// collected in `startup_report()`; only an unreadable agents directory
    /// fails the build. Must be called within a Tokio runtime.
    pub fn build(
        config: CompassConfig,
        model: Arc<dyn ModelInvoker>,
        catalog: Arc<ToolCatalog>,
    ) -> CompassResult<Self> {
        let loader = DefinitionLoader::new(config.loader.settings())?;
        let registry = Arc::new(Registry::new());
        let executor = Arc::new(Executor::new(model, catalog, config.executor.settings()));

        let report = loader.load_directory(&config.loader.agents_dir)?;
        let mut startup = LoadReport { loaded: Vec::new(), errors: report.errors };
        for loaded in report.loaded {
            match activate(&registry, &executor, loaded.definition.clone()) {
                Ok(_) => startup.loaded.push(loaded),
                Err(error) => {
                    warn!(origin = %loaded.origin, error = %error, "definition not activated");
                    startup.errors.push(LoadFailure { origin: loaded.origin, error });
                }
            }
        }

        let engine = Arc::new(OrchestrationEngine::new(
            Arc::clone(&registry),
            Arc::clone(&executor),
            config.orchestrator.settings(),
        ));
        let sink: Arc<dyn StrategySink> = Arc::clone(&engine) as Arc<dyn StrategySink>;
        let feedback = Arc::new(FeedbackLoop::new(config.feedback.settings(), sink));
        let forwarder = forward_events(&engine, &feedback);

        info!(
            agents = registry.len(),
            rejected = startup.errors.len(),
            dir = %config.loader.agents_dir.display(),
            "compass runtime ready"
        );

        Ok(Self {
            config,
            loader,
            registry,
            executor,
            engine,
            feedback,
            startup,
            forwarder,
            scheduler: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &CompassConfig {
        &self.config
    }

    pub fn loader(&self) -> &DefinitionLoader {
        &self.loader
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    pub fn engine(&self) -> &Arc<OrchestrationEngine> {
        &self.engine
    }

    pub fn feedback(&self) -> &Arc<FeedbackLoop> {
        &self.feedback
    }

    /// What happened to each file during `build`.
    pub fn startup_report(&self) -> &LoadReport {
        &self.startup
    }

    pub fn agents(&self) -> Vec<AgentSummary> {
        self.registry.list()
    }

    // ── Agent lifecycle ──────────────────────────────────────────────────────

    /// Load, register and instantiate one more definition.
    pub fn load_agent_file(&self, path: &Path) -> CompassResult<AgentSummary> {
        let definition = self.loader.load_file(path)?;
        activate(&self.registry, &self.executor, definition)
    }

    /// Withdraw an agent from selection, then stop and drop its instance.
    pub fn unload_agent(&self, id: AgentId) -> CompassResult<()> {
        self.registry.remove(id)?;
        match self.executor.unload(id) {
            Ok(()) | Err(CompassError::AgentNotFound { .. }) => {}
            Err(other) => return Err(other),
        }
        info!(agent_id = %id, "agent unloaded");
        Ok(())
    }

    // ── Feedback scheduling ──────────────────────────────────────────────────

    /// Start the feedback activities. Calling it again is a no-op.
    pub fn start_feedback(&self) {
        let mut scheduler = self.scheduler.lock().unwrap_or_else(PoisonError::into_inner);
        if scheduler.is_none() {
            *scheduler = Some(self.feedback.start());
        }
    }

    /// Stop accepting work and tear everything down.
    ///
    /// Queued tasks fail with code `shutdown`, the feedback activities and
    /// the event forwarder stop, every instance is stopped and every
    /// definition leaves the registry.
    pub fn shutdown(&self) {
        self.engine.shutdown();
        if let Some(handle) = self.scheduler.lock().unwrap_or_else(PoisonError::into_inner).take() {
            handle.stop();
        }
        self.forwarder.abort();
        self.executor.shutdown();
        for agent in self.registry.list() {
            if let Err(error) = self.registry.remove(agent.id) {
                debug!(agent_id = %agent.id, error = %error, "agent already gone at shutdown");
            }
        }
        info!("compass runtime shut down");
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

/// Register then instantiate, rolling the registration back if the
/// executor refuses the definition.
fn activate(
    registry: &Registry,
    executor: &Executor,
    definition: AgentDefinition,
) -> CompassResult<AgentSummary> {
    let definition = registry.register(definition)?;
    if let Err(error) = executor.instantiate(Arc::clone(&definition)) {
        if let Err(rollback) = registry.remove(definition.id) {
            warn!(agent_id = %definition.id, error = %rollback, "registry rollback failed");
        }
        return Err(error);
    }
    Ok(definition.summary())
}

/// Feed every terminal task event into the feedback loop.
fn forward_events(engine: &OrchestrationEngine, feedback: &Arc<FeedbackLoop>) -> JoinHandle<()> {
    let mut events = engine.subscribe();
    let feedback = Arc::clone(feedback);
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => feedback.observe_task(&event),
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "feedback fell behind the task event stream");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
