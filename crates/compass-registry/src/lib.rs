//! # compass-registry
//!
//! The in-memory registry of loaded agent definitions and its two derived
//! indices:
//!
//! - `by_capability`: enabled capability name → agent ids
//! - `by_tool`: declared tool name → agent ids
//!
//! Both indices are exact views of `definitions`. Writers are serialized
//! behind one `RwLock`; every write builds its full delta before taking the
//! lock and applies it in one critical section, so a reader never observes
//! a half-updated state. Reads return owned snapshots.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use tracing::{debug, info};

use compass_contracts::{
    agent::{AgentDefinition, AgentId, AgentSummary},
    error::{CompassError, CompassResult},
};

// ── Internal state ───────────────────────────────────────────────────────────

#[derive(Default)]
struct RegistryState {
    definitions: BTreeMap<AgentId, Arc<AgentDefinition>>,
    by_capability: BTreeMap<String, BTreeSet<AgentId>>,
    by_tool: BTreeMap<String, BTreeSet<AgentId>>,
}

impl RegistryState {
    fn summaries(&self, ids: Option<&BTreeSet<AgentId>>) -> Vec<AgentSummary> {
        ids.into_iter()
            .flatten()
            .filter_map(|id| self.definitions.get(id))
            .map(|def| def.summary())
            .collect()
    }

    fn index_view(
        &self,
        index: &BTreeMap<String, BTreeSet<AgentId>>,
    ) -> BTreeMap<String, Vec<AgentSummary>> {
        index
            .iter()
            .map(|(name, ids)| (name.clone(), self.summaries(Some(ids))))
            .collect()
    }
}

/// Index keys one definition contributes.
struct IndexDelta {
    capabilities: Vec<String>,
    tools: Vec<String>,
}

impl IndexDelta {
    fn for_definition(definition: &AgentDefinition) -> Self {
        Self {
            capabilities: definition.enabled_capabilities().map(|c| c.name.clone()).collect(),
            tools: definition.tools.iter().map(|t| t.name.clone()).collect(),
        }
    }
}

fn scrub(index: &mut BTreeMap<String, BTreeSet<AgentId>>, keys: &[String], id: &AgentId) {
    for key in keys {
        if let Some(bucket) = index.get_mut(key) {
            bucket.remove(id);
            if bucket.is_empty() {
                index.remove(key);
            }
        }
    }
}

// ── Registry ─────────────────────────────────────────────────────────────────

/// Definitions plus capability and tool indices.
#[derive(Default)]
pub struct Registry {
    state: RwLock<RegistryState>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a definition and index its enabled capabilities and tools.
    ///
    /// Returns `CompassError::Conflict` if the id is already registered, in
    /// which case nothing changes.
    pub fn register(&self, definition: AgentDefinition) -> CompassResult<Arc<AgentDefinition>> {
        let delta = IndexDelta::for_definition(&definition);
        let definition = Arc::new(definition);
        let id = definition.id;

        let mut state = self.write();
        if state.definitions.contains_key(&id) {
            return Err(CompassError::Conflict { id: id.to_string() });
        }
        state.definitions.insert(id, Arc::clone(&definition));
        for capability in &delta.capabilities {
            state.by_capability.entry(capability.clone()).or_default().insert(id);
        }
        for tool in &delta.tools {
            state.by_tool.entry(tool.clone()).or_default().insert(id);
        }
        drop(state);

        info!(
            agent_id = %id,
            name = %definition.name,
            capabilities = delta.capabilities.len(),
            tools = delta.tools.len(),
            "agent registered"
        );
        Ok(definition)
    }

    /// Remove a definition and scrub it from every index, pruning empty buckets.
    pub fn remove(&self, id: AgentId) -> CompassResult<Arc<AgentDefinition>> {
        let mut state = self.write();
        let definition = state
            .definitions
            .remove(&id)
            .ok_or_else(|| CompassError::AgentNotFound { id: id.to_string() })?;

        let delta = IndexDelta::for_definition(&definition);
        scrub(&mut state.by_capability, &delta.capabilities, &id);
        scrub(&mut state.by_tool, &delta.tools, &id);
        drop(state);

        info!(agent_id = %id, "agent removed from registry");
        Ok(definition)
    }

    /// Agents with `name` enabled, in id order.
    pub fn by_capability(&self, name: &str) -> Vec<AgentSummary> {
        let state = self.read();
        let found = state.summaries(state.by_capability.get(name));
        debug!(capability = %name, matches = found.len(), "capability lookup");
        found
    }

    /// Agents declaring tool `name`, in id order.
    pub fn by_tool(&self, name: &str) -> Vec<AgentSummary> {
        let state = self.read();
        state.summaries(state.by_tool.get(name))
    }

    /// Every registered agent, in id order.
    pub fn list(&self) -> Vec<AgentSummary> {
        self.read().definitions.values().map(|d| d.summary()).collect()
    }

    pub fn get(&self, id: AgentId) -> Option<Arc<AgentDefinition>> {
        self.read().definitions.get(&id).cloned()
    }

    pub fn contains(&self, id: AgentId) -> bool {
        self.read().definitions.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.read().definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capability_names(&self) -> Vec<String> {
        self.read().by_capability.keys().cloned().collect()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.read().by_tool.keys().cloned().collect()
    }

    /// Snapshot of the whole capability index.
    pub fn capability_index(&self) -> BTreeMap<String, Vec<AgentSummary>> {
        let state = self.read();
        state.index_view(&state.by_capability)
    }

    /// Snapshot of the whole tool index.
    pub fn tool_index(&self) -> BTreeMap<String, Vec<AgentSummary>> {
        let state = self.read();
        state.index_view(&state.by_tool)
    }

    /// Check that both indices are exact views of the definitions.
    pub fn is_consistent(&self) -> bool {
        let state = self.read();

        let mut expected_caps: BTreeMap<String, BTreeSet<AgentId>> = BTreeMap::new();
        let mut expected_tools: BTreeMap<String, BTreeSet<AgentId>> = BTreeMap::new();
        for (id, def) in &state.definitions {
            let delta = IndexDelta::for_definition(def);
            for c in delta.capabilities {
                expected_caps.entry(c).or_default().insert(*id);
            }
            for t in delta.tools {
                expected_tools.entry(t).or_default().insert(*id);
            }
        }
        expected_caps == state.by_capability && expected_tools == state.by_tool
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use compass_contracts::agent::{
        CapabilitySpec, MemoryPolicy, Persona, SecurityPolicy, ToolSpec, ToolType,
    };

    use super::*;

    fn agent(name: &str, capabilities: &[(&str, bool)], tools: &[&str]) -> AgentDefinition {
        AgentDefinition {
            id: AgentId::new(),
            name: name.to_string(),
            version: "1.0".to_string(),
            author: "travel-team".to_string(),
            description: String::new(),
            tags: vec![],
            created: None,
            persona: Persona {
                role: "agent".to_string(),
                tone: "neutral".to_string(),
                instructions: "Help.".to_string(),
                personality: serde_json::Value::Null,
                communication_style: serde_json::Value::Null,
            },
            capabilities: capabilities
                .iter()
                .map(|(n, enabled)| CapabilitySpec {
                    name: n.to_string(),
                    description: String::new(),
                    enabled: *enabled,
                    parameters: serde_json::Value::Null,
                })
                .collect(),
            tools: tools
                .iter()
                .map(|n| ToolSpec {
                    name: n.to_string(),
                    tool_type: ToolType::Function,
                    endpoint: String::new(),
                    parameters: serde_json::Value::Null,
                    auth: serde_json::Value::Null,
                })
                .collect(),
            memory: MemoryPolicy::default(),
            security: SecurityPolicy::default(),
            integrity: None,
        }
    }

    #[test]
    fn register_indexes_enabled_capabilities_and_tools() {
        let registry = Registry::new();
        let def = agent(
            "Luna",
            &[("itinerary_design", true), ("visa_lookup", false)],
            &["memory_query"],
        );
        let id = def.id;
        registry.register(def).unwrap();

        assert_eq!(registry.by_capability("itinerary_design")[0].id, id);
        assert!(registry.by_capability("visa_lookup").is_empty());
        assert_eq!(registry.by_tool("memory_query")[0].id, id);
        assert_eq!(registry.capability_names(), vec!["itinerary_design".to_string()]);
        assert!(registry.is_consistent());
    }

    #[test]
    fn duplicate_id_is_rejected_without_changes() {
        let registry = Registry::new();
        let first = agent("Luna", &[("itinerary_design", true)], &[]);
        let mut clash = agent("Impostor", &[("budget_analysis", true)], &["api_call"]);
        clash.id = first.id;

        registry.register(first).unwrap();
        let err = registry.register(clash).unwrap_err();

        assert!(matches!(err, CompassError::Conflict { .. }));
        assert_eq!(registry.len(), 1);
        assert!(registry.by_capability("budget_analysis").is_empty());
        assert!(registry.tool_names().is_empty());
        assert!(registry.is_consistent());
    }

    #[test]
    fn remove_scrubs_and_prunes_buckets() {
        let registry = Registry::new();
        let luna = agent(
            "Luna",
            &[("itinerary_design", true), ("budget_analysis", true)],
            &["memory_query"],
        );
        let karim = agent("Karim", &[("budget_analysis", true)], &[]);
        let luna_id = luna.id;
        registry.register(luna).unwrap();
        registry.register(karim).unwrap();

        registry.remove(luna_id).unwrap();

        assert!(registry.by_capability("itinerary_design").is_empty());
        assert!(registry.by_capability("budget_analysis").iter().all(|s| s.id != luna_id));
        assert_eq!(registry.capability_names(), vec!["budget_analysis".to_string()]);
        assert!(registry.tool_names().is_empty());
        assert!(registry.is_consistent());
        assert!(matches!(registry.remove(luna_id), Err(CompassError::AgentNotFound { .. })));
    }

    #[test]
    fn reads_are_idempotent() {
        let registry = Registry::new();
        registry.register(agent("Luna", &[("itinerary_design", true)], &["api_call"])).unwrap();
        registry.register(agent("Zara", &[("fact_checking", true)], &["api_call"])).unwrap();

        assert_eq!(registry.list(), registry.list());
        assert_eq!(registry.by_tool("api_call"), registry.by_tool("api_call"));
        assert_eq!(registry.by_tool("api_call").len(), 2);
        assert_eq!(registry.tool_index()["api_call"].len(), 2);
    }

    #[test]
    fn concurrent_registration_stays_consistent() {
        let registry = Arc::new(Registry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    let name = format!("agent-{i}");
                    let def = agent(&name, &[("budget_analysis", true)], &["api_call"]);
                    let id = def.id;
                    registry.register(def).unwrap();
                    if i % 2 == 0 {
                        registry.remove(id).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.len(), 4);
        assert_eq!(registry.by_capability("budget_analysis").len(), 4);
        assert!(registry.is_consistent());
    }
}
