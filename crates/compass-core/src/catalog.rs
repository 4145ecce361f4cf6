//! The process-wide tool catalog.
//!
//! Tools are looked up by name when an agent is instantiated. The built-in
//! set is a closed enum; host-supplied tools are held as `Arc<dyn Tool>`.
//! A lookup that finds nothing returns `ToolLookup::NotFound` and the caller
//! decides what that means (the executor degrades gracefully).

use std::{
    collections::{BTreeMap, VecDeque},
    fmt,
    sync::{Arc, Mutex, PoisonError},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;
use url::{Host, Url};

use compass_contracts::error::{CompassError, CompassResult};

use crate::traits::{Tool, ToolContext};

// ── Built-in tools ───────────────────────────────────────────────────────────

/// Tools every catalog built with `with_builtins()` provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinTool {
    MemoryQuery,
    MemoryStore,
    ApiCall,
    DataAnalysis,
    NotificationSend,
}

impl BuiltinTool {
    pub const ALL: [BuiltinTool; 5] = [
        BuiltinTool::MemoryQuery,
        BuiltinTool::MemoryStore,
        BuiltinTool::ApiCall,
        BuiltinTool::DataAnalysis,
        BuiltinTool::NotificationSend,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BuiltinTool::MemoryQuery => "memory_query",
            BuiltinTool::MemoryStore => "memory_store",
            BuiltinTool::ApiCall => "api_call",
            BuiltinTool::DataAnalysis => "data_analysis",
            BuiltinTool::NotificationSend => "notification_send",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            BuiltinTool::MemoryQuery => "Query the shared memory store for relevant entries",
            BuiltinTool::MemoryStore => "Store an entry in the shared memory store",
            BuiltinTool::ApiCall => "Prepare an outbound call to an external service",
            BuiltinTool::DataAnalysis => "Summarize a numeric series",
            BuiltinTool::NotificationSend => "Queue a notification for a user",
        }
    }

    pub fn parameter_schema(self) -> Value {
        match self {
            BuiltinTool::MemoryQuery => json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string" },
                    "limit": { "type": "integer", "minimum": 1, "default": 10 },
                    "type": { "type": "string" }
                },
                "required": ["query"]
            }),
            BuiltinTool::MemoryStore => json!({
                "type": "object",
                "properties": {
                    "content": { "type": "string" },
                    "type": { "type": "string" },
                    "metadata": { "type": "object" }
                },
                "required": ["content", "type"]
            }),
            BuiltinTool::ApiCall => json!({
                "type": "object",
                "properties": {
                    "endpoint": { "type": "string" },
                    "method": { "type": "string", "default": "GET" },
                    "headers": { "type": "object" },
                    "body": {}
                },
                "required": ["endpoint"]
            }),
            BuiltinTool::DataAnalysis => json!({
                "type": "object",
                "properties": {
                    "data": { "type": "array", "items": { "type": "number" } },
                    "method": { "enum": ["summary", "count", "sum", "mean", "min", "max"] }
                },
                "required": ["data", "method"]
            }),
            BuiltinTool::NotificationSend => json!({
                "type": "object",
                "properties": {
                    "user_id": { "type": "string" },
                    "message": { "type": "string" },
                    "channel": { "type": "string", "default": "telegram" },
                    "priority": { "type": "string", "default": "normal" }
                },
                "required": ["user_id", "message"]
            }),
        }
    }

    pub fn from_name(name: &str) -> Option<BuiltinTool> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }
}

// ── Shared stores ────────────────────────────────────────────────────────────

/// One entry in the shared memory store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: u64,
    pub agent_id: String,
    pub session_id: Option<String>,
    pub kind: String,
    pub content: String,
    pub metadata: Value,
    pub stored_at: DateTime<Utc>,
}

/// In-process memory visible to every agent.
///
/// Later agents of a task see what earlier agents stored, which is why
/// agents within one task are dispatched sequentially.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    next_id: u64,
    entries: Vec<MemoryEntry>,
}

impl MemoryStore {
    /// Store an entry, evicting the agent's oldest entries beyond `capacity`.
    pub fn store(
        &self,
        agent_id: &str,
        session_id: Option<String>,
        kind: &str,
        content: &str,
        metadata: Value,
        capacity: u64,
    ) -> u64 {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        state.next_id += 1;
        let id = state.next_id;
        state.entries.push(MemoryEntry {
            id,
            agent_id: agent_id.to_string(),
            session_id,
            kind: kind.to_string(),
            content: content.to_string(),
            metadata,
            stored_at: Utc::now(),
        });

        let owned = state.entries.iter().filter(|e| e.agent_id == agent_id).count() as u64;
        if owned > capacity {
            let mut excess = owned - capacity;
            state.entries.retain(|e| {
                if excess > 0 && e.agent_id == agent_id {
                    excess -= 1;
                    false
                } else {
                    true
                }
            });
        }
        id
    }

    /// Case-insensitive substring search over content, newest first.
    pub fn query(&self, query: &str, kind: Option<&str>, limit: usize) -> Vec<MemoryEntry> {
        let needle = query.to_lowercase();
        let state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .entries
            .iter()
            .rev()
            .filter(|e| kind.map_or(true, |k| e.kind == k))
            .filter(|e| e.content.to_lowercase().contains(&needle))
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A notification queued by `notification_send`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: u64,
    pub from_agent: String,
    pub user_id: String,
    pub message: String,
    pub channel: String,
    pub priority: String,
    pub queued_at: DateTime<Utc>,
}

/// Outbox drained by the messaging layer. Holds at most `capacity`
/// notifications; the oldest are dropped first.
#[derive(Debug)]
pub struct Outbox {
    capacity: usize,
    inner: Mutex<OutboxState>,
}

#[derive(Debug, Default)]
struct OutboxState {
    next_id: u64,
    queue: VecDeque<Notification>,
}

impl Default for Outbox {
    fn default() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }
}

impl Outbox {
    pub const DEFAULT_CAPACITY: usize = 1_000;

    pub fn with_capacity(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), inner: Mutex::new(OutboxState::default()) }
    }

    fn push(&self, mut notification: Notification) -> u64 {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        state.next_id += 1;
        notification.id = state.next_id;
        state.queue.push_back(notification);
        while state.queue.len() > self.capacity {
            if let Some(dropped) = state.queue.pop_front() {
                debug!(notification_id = dropped.id, "outbox full, oldest notification dropped");
            }
        }
        state.next_id
    }

    /// Snapshot of every queued notification, oldest first.
    pub fn notifications(&self) -> Vec<Notification> {
        let state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        state.queue.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── Catalog ──────────────────────────────────────────────────────────────────

/// A resolved tool binding.
#[derive(Clone)]
pub enum ToolHandle {
    Builtin(BuiltinTool),
    External(Arc<dyn Tool>),
}

impl ToolHandle {
    pub fn name(&self) -> &str {
        match self {
            ToolHandle::Builtin(tool) => tool.name(),
            ToolHandle::External(tool) => tool.name(),
        }
    }

    pub fn description(&self) -> &str {
        match self {
            ToolHandle::Builtin(tool) => tool.description(),
            ToolHandle::External(tool) => tool.description(),
        }
    }
}

impl fmt::Debug for ToolHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolHandle::Builtin(tool) => write!(f, "Builtin({})", tool.name()),
            ToolHandle::External(tool) => write!(f, "External({})", tool.name()),
        }
    }
}

/// Result of looking a tool up by name.
#[derive(Debug, Clone)]
pub enum ToolLookup {
    Found(ToolHandle),
    NotFound,
}

/// Typed map from tool name to implementation, plus the shared stores the
/// built-ins write to.
#[derive(Default)]
pub struct ToolCatalog {
    tools: BTreeMap<String, ToolHandle>,
    memory: Arc<MemoryStore>,
    outbox: Arc<Outbox>,
}

impl ToolCatalog {
    /// An empty catalog. Every lookup returns `NotFound` until tools are added.
    pub fn new() -> Self {
        Self::default()
    }

    /// A catalog holding the five built-in tools.
    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        for tool in BuiltinTool::ALL {
            catalog.tools.insert(tool.name().to_string(), ToolHandle::Builtin(tool));
        }
        catalog
    }

    /// Add or replace a host-supplied tool.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        debug!(tool = %tool.name(), "registering external tool");
        self.tools.insert(tool.name().to_string(), ToolHandle::External(tool));
    }

    pub fn lookup(&self, name: &str) -> ToolLookup {
        match self.tools.get(name) {
            Some(handle) => ToolLookup::Found(handle.clone()),
            None => ToolLookup::NotFound,
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.memory
    }

    pub fn outbox(&self) -> &Arc<Outbox> {
        &self.outbox
    }

    /// Invoke a resolved handle.
    pub async fn invoke(
        &self,
        handle: &ToolHandle,
        params: Value,
        context: &ToolContext,
    ) -> CompassResult<Value> {
        match handle {
            ToolHandle::External(tool) => tool.invoke(params, context).await,
            ToolHandle::Builtin(tool) => self.invoke_builtin(*tool, &params, context),
        }
    }

    fn invoke_builtin(
        &self,
        tool: BuiltinTool,
        params: &Value,
        ctx: &ToolContext,
    ) -> CompassResult<Value> {
        let fail = |reason: String| CompassError::Execution {
            agent: ctx.agent_id.to_string(),
            reason: format!("{}: {reason}", tool.name()),
        };

        match tool {
            BuiltinTool::MemoryQuery => {
                let query = str_param(params, "query")
                    .ok_or_else(|| fail("missing 'query'".into()))?;
                let limit = params.get("limit").and_then(Value::as_u64).unwrap_or(10) as usize;
                let kind = str_param(params, "type");
                let results = self.memory.query(query, kind, limit);
                Ok(json!({ "query": query, "count": results.len(), "results": results }))
            }

            BuiltinTool::MemoryStore => {
                let content =
                    str_param(params, "content").ok_or_else(|| fail("missing 'content'".into()))?;
                let kind = str_param(params, "type").ok_or_else(|| fail("missing 'type'".into()))?;
                let metadata = params.get("metadata").cloned().unwrap_or(Value::Null);
                let id = self.memory.store(
                    &ctx.agent_id.to_string(),
                    ctx.execution.session_id.clone(),
                    kind,
                    content,
                    metadata,
                    ctx.memory.capacity,
                );
                Ok(json!({ "stored": true, "id": id }))
            }

            BuiltinTool::ApiCall => {
                let endpoint =
                    str_param(params, "endpoint").ok_or_else(|| fail("missing 'endpoint'".into()))?;
                let method = str_param(params, "method").unwrap_or("GET").to_ascii_uppercase();
                let host = endpoint_host(endpoint)
                    .ok_or_else(|| fail(format!("endpoint '{endpoint}' has no host")))?;

                if ctx.security.is_restricted(&host) {
                    return Err(fail(format!("domain '{host}' is restricted")));
                }
                if !ctx.security.allows_operation(&method) {
                    return Err(fail(format!("operation '{method}' is not allowed")));
                }

                Ok(json!({
                    "accepted": true,
                    "endpoint": endpoint,
                    "host": host,
                    "method": method,
                    "body": params.get("body").cloned().unwrap_or(Value::Null),
                }))
            }

            BuiltinTool::DataAnalysis => {
                let data = params
                    .get("data")
                    .and_then(Value::as_array)
                    .ok_or_else(|| fail("'data' must be an array".into()))?;
                let values = data
                    .iter()
                    .map(Value::as_f64)
                    .collect::<Option<Vec<f64>>>()
                    .ok_or_else(|| fail("'data' must contain only numbers".into()))?;
                let method = str_param(params, "method").unwrap_or("summary");
                let summary = summarize(&values);

                let result = match method {
                    "summary" => summary.clone(),
                    "count" | "sum" | "mean" | "min" | "max" => summary[method].clone(),
                    other => return Err(fail(format!("unknown method '{other}'"))),
                };
                Ok(json!({ "method": method, "result": result, "summary": summary }))
            }

            BuiltinTool::NotificationSend => {
                let user_id =
                    str_param(params, "user_id").ok_or_else(|| fail("missing 'user_id'".into()))?;
                let message =
                    str_param(params, "message").ok_or_else(|| fail("missing 'message'".into()))?;
                let id = self.outbox.push(Notification {
                    id: 0,
                    from_agent: ctx.agent_name.clone(),
                    user_id: user_id.to_string(),
                    message: message.to_string(),
                    channel: str_param(params, "channel").unwrap_or("telegram").to_string(),
                    priority: str_param(params, "priority").unwrap_or("normal").to_string(),
                    queued_at: Utc::now(),
                });
                Ok(json!({ "sent": true, "id": id }))
            }
        }
    }
}

fn str_param<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str)
}

/// Host of an endpoint, normalized for policy checks: lowercase, without a
/// trailing root dot, IPv6 without brackets. A missing scheme means `http`.
fn endpoint_host(endpoint: &str) -> Option<String> {
    let parsed = Url::parse(endpoint)
        .ok()
        .filter(Url::has_host)
        .or_else(|| Url::parse(&format!("http://{endpoint}")).ok())?;
    let host = match parsed.host()? {
        Host::Domain(domain) => domain.trim_end_matches('.').to_ascii_lowercase(),
        Host::Ipv4(addr) => addr.to_string(),
        Host::Ipv6(addr) => addr.to_string(),
    };
    (!host.is_empty()).then_some(host)
}

fn summarize(values: &[f64]) -> Value {
    if values.is_empty() {
        return json!({ "count": 0, "sum": 0.0, "mean": null, "min": null, "max": null });
    }
    let sum: f64 = values.iter().sum();
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    json!({
        "count": values.len(),
        "sum": sum,
        "mean": sum / values.len() as f64,
        "min": min,
        "max": max,
    })
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use compass_contracts::{
        agent::{AgentId, MemoryPolicy, SecurityPolicy},
        task::ExecutionContext,
    };

    use super::*;

    fn context() -> ToolContext {
        ToolContext {
            agent_id: AgentId::new(),
            agent_name: "Scout".to_string(),
            security: SecurityPolicy {
                allowed_operations: vec!["GET".to_string()],
                restricted_domains: vec!["internal.example".to_string()],
                max_calls_per_minute: 10,
            },
            memory: MemoryPolicy { capacity: 2, ..MemoryPolicy::default() },
            execution: ExecutionContext::default(),
        }
    }

    fn builtin(catalog: &ToolCatalog, name: &str) -> ToolHandle {
        match catalog.lookup(name) {
            ToolLookup::Found(handle) => handle,
            ToolLookup::NotFound => panic!("{name} should be registered"),
        }
    }

    #[test]
    fn unknown_tool_is_not_found() {
        let catalog = ToolCatalog::with_builtins();
        assert!(matches!(catalog.lookup("flight_search"), ToolLookup::NotFound));
        assert!(matches!(ToolCatalog::new().lookup("memory_query"), ToolLookup::NotFound));
        assert_eq!(catalog.names().len(), 5);
    }

    #[tokio::test]
    async fn memory_is_shared_and_capped_per_agent() {
        let catalog = ToolCatalog::with_builtins();
        let ctx = context();
        let store = builtin(&catalog, "memory_store");

        for content in ["Lisbon in May", "Porto in June", "Lisbon hostels"] {
            catalog
                .invoke(&store, json!({ "content": content, "type": "note" }), &ctx)
                .await
                .unwrap();
        }
        assert_eq!(catalog.memory().len(), 2);

        let query = builtin(&catalog, "memory_query");
        let found = catalog.invoke(&query, json!({ "query": "lisbon" }), &ctx).await.unwrap();
        assert_eq!(found["count"], 1);
        assert_eq!(found["results"][0]["content"], "Lisbon hostels");
    }

    #[tokio::test]
    async fn api_call_enforces_security_policy() {
        let catalog = ToolCatalog::with_builtins();
        let ctx = context();
        let api = builtin(&catalog, "api_call");

        let ok = catalog
            .invoke(&api, json!({ "endpoint": "https://api.flights.test/v1/search" }), &ctx)
            .await
            .unwrap();
        assert_eq!(ok["host"], "api.flights.test");

        let restricted = catalog
            .invoke(&api, json!({ "endpoint": "http://db.internal.example:8080/x" }), &ctx)
            .await;
        assert!(matches!(restricted, Err(CompassError::Execution { .. })));

        let post = catalog
            .invoke(&api, json!({ "endpoint": "https://api.flights.test", "method": "post" }), &ctx)
            .await;
        assert!(post.unwrap_err().to_string().contains("'POST' is not allowed"));
    }

    #[tokio::test]
    async fn data_analysis_summarizes_numbers() {
        let catalog = ToolCatalog::with_builtins();
        let handle = builtin(&catalog, "data_analysis");

        let out = catalog
            .invoke(&handle, json!({ "data": [120, 80.5, 99.5], "method": "mean" }), &context())
            .await
            .unwrap();
        assert_eq!(out["result"], json!(100.0));
        assert_eq!(out["summary"]["max"], json!(120.0));

        let bad = catalog
            .invoke(&handle, json!({ "data": ["cheap"], "method": "sum" }), &context())
            .await;
        assert!(bad.is_err());
    }

    #[tokio::test]
    async fn notifications_land_in_outbox() {
        let catalog = ToolCatalog::with_builtins();
        let handle = builtin(&catalog, "notification_send");

        catalog
            .invoke(&handle, json!({ "user_id": "u-1", "message": "Fare dropped" }), &context())
            .await
            .unwrap();

        let sent = catalog.outbox().notifications();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].channel, "telegram");
        assert_eq!(sent[0].from_agent, "Scout");
    }

    #[test]
    fn outbox_drops_oldest_beyond_capacity() {
        let outbox = Outbox::with_capacity(2);
        for message in ["first", "second", "third"] {
            outbox.push(Notification {
                id: 0,
                from_agent: "Scout".to_string(),
                user_id: "u-1".to_string(),
                message: message.to_string(),
                channel: "telegram".to_string(),
                priority: "normal".to_string(),
                queued_at: Utc::now(),
            });
        }

        let queued = outbox.notifications();
        assert_eq!(outbox.len(), 2);
        assert_eq!(queued[0].message, "second");
        assert_eq!(queued[1].id, 3);
    }

    #[test]
    fn endpoint_host_strips_scheme_port_and_credentials() {
        assert_eq!(
            endpoint_host("https://user:pw@API.Example.com:443/path?q=1").as_deref(),
            Some("api.example.com")
        );
        assert_eq!(endpoint_host("example.org/path").as_deref(), Some("example.org"));
        assert_eq!(
            endpoint_host("internal.example.com./x").as_deref(),
            Some("internal.example.com")
        );
        assert_eq!(endpoint_host("http://[::1]:8080/admin").as_deref(), Some("::1"));
        assert_eq!(endpoint_host("http://10.0.0.7:9000").as_deref(), Some("10.0.0.7"));
    }

    #[tokio::test]
    async fn restricted_hosts_match_in_every_spelling() {
        let catalog = ToolCatalog::with_builtins();
        let mut ctx = context();
        ctx.security.restricted_domains =
            vec!["internal.example.com".to_string(), "::1".to_string()];
        let api = builtin(&catalog, "api_call");

        for endpoint in [
            "https://internal.example.com/x",
            "https://internal.example.com./x",
            "https://api.internal.example.com./x",
            "http://[::1]:8080/admin",
        ] {
            let out = catalog.invoke(&api, json!({ "endpoint": endpoint }), &ctx).await;
            let err = out.expect_err(endpoint);
            assert!(err.to_string().contains("is restricted"), "{endpoint}: {err}");
        }

        let open = catalog
            .invoke(&api, json!({ "endpoint": "https://example.com/x" }), &ctx)
            .await
            .unwrap();
        assert_eq!(open["host"], "example.com");
    }
}
