//! Agent definition types.
//!
//! An `AgentDefinition` is the normalized, immutable form of one declarative
//! agent file. The loader produces it, the registry indexes it, and the
//! executor binds it to a runtime instance. Nothing mutates a definition
//! after load.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Globally unique identifier of an agent definition.
///
/// Primary key of the registry and the key of the executor's instance map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AgentId(pub uuid::Uuid);

impl AgentId {
    /// Create a fresh random identifier.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for AgentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s).map(Self)
    }
}

/// Persona text handed to the model collaborator when building prompts.
///
/// The orchestration core never interprets these fields beyond prompt
/// construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    pub role: String,
    pub tone: String,
    pub instructions: String,
    /// Free-form personality attributes (e.g. `traits = ["analytical"]`).
    #[serde(default)]
    pub personality: serde_json::Value,
    #[serde(default)]
    pub communication_style: serde_json::Value,
}

/// A named, enableable skill an agent exposes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySpec {
    pub name: String,
    pub description: String,
    /// Disabled capabilities are loaded but never indexed.
    pub enabled: bool,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

/// The binding style of a declared tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolType {
    Api,
    Function,
    #[serde(alias = "mcp")]
    Protocol,
    Custom,
}

/// A tool an agent declares it wants bound at instantiation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub tool_type: ToolType,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
    #[serde(default)]
    pub auth: serde_json::Value,
}

/// Memory configuration passed through to the execution context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryPolicy {
    pub kind: String,
    pub capacity: u64,
    pub retention: String,
}

impl Default for MemoryPolicy {
    fn default() -> Self {
        Self {
            kind: "vector".to_string(),
            capacity: 10_000,
            retention: "90d".to_string(),
        }
    }
}

/// Operations and destinations an agent is allowed to use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityPolicy {
    /// Empty means "no operation restriction declared".
    pub allowed_operations: Vec<String>,
    pub restricted_domains: Vec<String>,
    pub max_calls_per_minute: u32,
}

impl SecurityPolicy {
    /// Conservative default rate ceiling for definitions without a
    /// `[security]` section.
    pub const DEFAULT_MAX_CALLS_PER_MINUTE: u32 = 100;

    /// Return true if `operation` is permitted by the allow-list.
    pub fn allows_operation(&self, operation: &str) -> bool {
        self.allowed_operations.is_empty()
            || self.allowed_operations.iter().any(|op| op == operation || op == "*")
    }

    /// Return true if `host` equals or is a subdomain of a restricted domain.
    pub fn is_restricted(&self, host: &str) -> bool {
        let host = normalize_host(host);
        self.restricted_domains.iter().any(|domain| {
            let domain = normalize_host(domain);
            !domain.is_empty() && (host == domain || host.ends_with(&format!(".{domain}")))
        })
    }
}

/// Lowercase, without IPv6 brackets or a trailing root dot.
fn normalize_host(host: &str) -> String {
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .trim_end_matches('.')
        .to_ascii_lowercase()
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            allowed_operations: Vec::new(),
            restricted_domains: Vec::new(),
            max_calls_per_minute: Self::DEFAULT_MAX_CALLS_PER_MINUTE,
        }
    }
}

/// Digest algorithm accepted in an integrity declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    Sha256,
    Sha512,
}

/// Which part of the document an integrity digest covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrityScope {
    /// Everything except the `security` section.
    Content,
    /// The whole document except the digest value itself.
    Full,
}

/// Optional integrity declaration, consulted only at load time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityDeclaration {
    pub algorithm: DigestAlgorithm,
    pub digest: String,
    pub scope: IntegrityScope,
}

/// The immutable, normalized form of one agent definition file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub id: AgentId,
    pub name: String,
    pub version: String,
    pub author: String,
    pub description: String,
    pub tags: Vec<String>,
    pub created: Option<String>,
    pub persona: Persona,
    pub capabilities: Vec<CapabilitySpec>,
    pub tools: Vec<ToolSpec>,
    pub memory: MemoryPolicy,
    pub security: SecurityPolicy,
    pub integrity: Option<IntegrityDeclaration>,
}

impl AgentDefinition {
    /// Iterate the capabilities that participate in indexing.
    pub fn enabled_capabilities(&self) -> impl Iterator<Item = &CapabilitySpec> {
        self.capabilities.iter().filter(|c| c.enabled)
    }

    /// Look up a capability by name, enabled or not.
    pub fn capability(&self, name: &str) -> Option<&CapabilitySpec> {
        self.capabilities.iter().find(|c| c.name == name)
    }

    pub fn has_enabled_capability(&self, name: &str) -> bool {
        self.enabled_capabilities().any(|c| c.name == name)
    }

    /// Look up a declared tool by name.
    pub fn tool(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.iter().find(|t| t.name == name)
    }

    /// Build the read-only summary returned by registry queries.
    pub fn summary(&self) -> AgentSummary {
        AgentSummary {
            id: self.id,
            name: self.name.clone(),
            version: self.version.clone(),
            author: self.author.clone(),
            description: self.description.clone(),
            tags: self.tags.clone(),
            capabilities: self.enabled_capabilities().map(|c| c.name.clone()).collect(),
            tools: self.tools.iter().map(|t| t.name.clone()).collect(),
        }
    }
}

/// Read-only snapshot of a registered agent, for introspection and routing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSummary {
    pub id: AgentId,
    pub name: String,
    pub version: String,
    pub author: String,
    pub description: String,
    pub tags: Vec<String>,
    /// Names of enabled capabilities only.
    pub capabilities: Vec<String>,
    pub tools: Vec<String>,
}
