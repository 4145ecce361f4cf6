//! The definition loader.
//!
//! `DefinitionLoader::load` turns source bytes into a normalized
//! `AgentDefinition`:
//!
//!   UTF-8 → TOML parse → schema validation → id check → integrity → normalize
//!
//! Load is all-or-nothing per file and has no side effects beyond updating
//! the loader's own statistics. Registration is the caller's job.

use std::{
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use compass_contracts::{
    agent::{
        AgentDefinition, AgentId, CapabilitySpec, DigestAlgorithm, IntegrityDeclaration,
        IntegrityScope, MemoryPolicy, Persona, SecurityPolicy, ToolSpec,
    },
    error::{CompassError, CompassResult},
};

use crate::{
    integrity,
    schema::{self, SchemaValidator},
};

/// Loader behaviour switches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderSettings {
    /// Verify declared digests. Disable only for local development.
    pub verify_integrity: bool,
    /// File extensions `load_directory` picks up, without the dot.
    pub extensions: Vec<String>,
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self { verify_integrity: true, extensions: vec!["toml".to_string()] }
    }
}

/// Running counters across every load call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoaderStats {
    pub files_seen: u64,
    pub loaded: u64,
    pub schema_failures: u64,
    pub integrity_failures: u64,
    pub digests_verified: u64,
}

/// One successfully loaded file from a directory batch.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedDefinition {
    pub origin: String,
    pub definition: AgentDefinition,
}

/// One rejected file from a directory batch.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadFailure {
    pub origin: String,
    pub error: CompassError,
}

/// Result of `load_directory`. Never fails for a single bad file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    pub loaded: Vec<LoadedDefinition>,
    pub errors: Vec<LoadFailure>,
}

// ── Document shape ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct RawDocument {
    meta: RawMeta,
    persona: Persona,
    #[serde(default)]
    skills: Vec<RawSkill>,
    #[serde(default)]
    tools: Vec<ToolSpec>,
    #[serde(default)]
    memory: RawMemory,
    #[serde(default)]
    security: RawSecurity,
}

#[derive(Deserialize)]
struct RawMeta {
    id: String,
    name: String,
    #[serde(default = "default_version")]
    version: String,
    #[serde(default = "default_author")]
    author: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    created: Option<String>,
}

#[derive(Deserialize)]
struct RawSkill {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    parameters: Value,
}

#[derive(Default, Deserialize)]
struct RawMemory {
    kind: Option<String>,
    capacity: Option<u64>,
    retention: Option<String>,
}

#[derive(Default, Deserialize)]
struct RawSecurity {
    #[serde(default)]
    allowed_operations: Vec<String>,
    #[serde(default)]
    restricted_domains: Vec<String>,
    max_calls_per_minute: Option<u32>,
    integrity: Option<RawIntegrity>,
}

#[derive(Deserialize)]
struct RawIntegrity {
    algorithm: DigestAlgorithm,
    digest: String,
    #[serde(default)]
    scope: Option<IntegrityScope>,
}

fn default_version() -> String {
    "1.0".to_string()
}

fn default_author() -> String {
    "unknown".to_string()
}

fn default_enabled() -> bool {
    true
}

// ── Loader ───────────────────────────────────────────────────────────────────

/// Parses, validates and normalizes agent definition files.
pub struct DefinitionLoader {
    settings: LoaderSettings,
    validator: SchemaValidator,
    stats: Mutex<LoaderStats>,
}

impl DefinitionLoader {
    pub fn new(settings: LoaderSettings) -> CompassResult<Self> {
        Ok(Self {
            settings,
            validator: SchemaValidator::new()?,
            stats: Mutex::new(LoaderStats::default()),
        })
    }

    pub fn settings(&self) -> &LoaderSettings {
        &self.settings
    }

    pub fn stats(&self) -> LoaderStats {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Load one definition from raw bytes. `origin` names the source in errors.
    pub fn load(&self, source: &[u8], origin: &str) -> CompassResult<AgentDefinition> {
        let result = self.load_inner(source, origin);

        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        stats.files_seen += 1;
        match &result {
            Ok(def) => {
                stats.loaded += 1;
                if def.integrity.is_some() && self.settings.verify_integrity {
                    stats.digests_verified += 1;
                }
                debug!(origin = %origin, agent_id = %def.id, "definition loaded");
            }
            Err(CompassError::Integrity { .. }) => stats.integrity_failures += 1,
            Err(_) => stats.schema_failures += 1,
        }
        result
    }

    fn load_inner(&self, source: &[u8], origin: &str) -> CompassResult<AgentDefinition> {
        let text = std::str::from_utf8(source).map_err(|e| CompassError::Schema {
            origin: origin.to_string(),
            reason: format!("not valid UTF-8: {e}"),
        })?;

        let document = schema::parse_document(text, origin)?;
        self.validator.validate(&document, origin)?;

        let raw: RawDocument = serde_json::from_value(document.clone()).map_err(|e| {
            CompassError::Schema { origin: origin.to_string(), reason: e.to_string() }
        })?;

        if !schema::is_valid_agent_id(&raw.meta.id) {
            return Err(CompassError::Schema {
                origin: origin.to_string(),
                reason: format!("meta.id '{}' is not a valid UUID", raw.meta.id),
            });
        }
        let id: AgentId = raw.meta.id.parse().map_err(|e: uuid::Error| CompassError::Schema {
            origin: origin.to_string(),
            reason: e.to_string(),
        })?;

        let declared = raw.security.integrity.map(|i| IntegrityDeclaration {
            algorithm: i.algorithm,
            digest: i.digest,
            scope: i.scope.unwrap_or(IntegrityScope::Content),
        });
        if let Some(declaration) = &declared {
            if self.settings.verify_integrity {
                integrity::verify(&document, declaration, origin)?;
            } else {
                debug!(origin = %origin, "integrity verification disabled, digest not checked");
            }
        }

        let memory_defaults = MemoryPolicy::default();
        Ok(AgentDefinition {
            id,
            name: raw.meta.name,
            version: raw.meta.version,
            author: raw.meta.author,
            description: raw.meta.description,
            tags: raw.meta.tags,
            created: raw.meta.created,
            persona: raw.persona,
            capabilities: raw
                .skills
                .into_iter()
                .map(|s| CapabilitySpec {
                    name: s.name,
                    description: s.description,
                    enabled: s.enabled,
                    parameters: s.parameters,
                })
                .collect(),
            tools: raw.tools,
            memory: MemoryPolicy {
                kind: raw.memory.kind.unwrap_or(memory_defaults.kind),
                capacity: raw.memory.capacity.unwrap_or(memory_defaults.capacity),
                retention: raw.memory.retention.unwrap_or(memory_defaults.retention),
            },
            security: SecurityPolicy {
                allowed_operations: raw.security.allowed_operations,
                restricted_domains: raw.security.restricted_domains,
                max_calls_per_minute: raw
                    .security
                    .max_calls_per_minute
                    .unwrap_or(SecurityPolicy::DEFAULT_MAX_CALLS_PER_MINUTE),
            },
            integrity: declared,
        })
    }

    /// Read and load one file.
    pub fn load_file(&self, path: &Path) -> CompassResult<AgentDefinition> {
        let origin = path.display().to_string();
        let bytes = std::fs::read(path).map_err(|e| CompassError::Io {
            path: origin.clone(),
            reason: e.to_string(),
        })?;
        self.load(&bytes, &origin)
    }

    /// Load every definition file in `dir`, in path order.
    ///
    /// Only an unreadable directory is an `Err`; each bad file becomes one
    /// entry in `LoadReport::errors` and loading continues.
    pub fn load_directory(&self, dir: &Path) -> CompassResult<LoadReport> {
        let entries = std::fs::read_dir(dir).map_err(|e| CompassError::Io {
            path: dir.display().to_string(),
            reason: e.to_string(),
        })?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && self.has_definition_extension(p))
            .collect();
        paths.sort();

        let mut report = LoadReport::default();
        for path in paths {
            let origin = path.display().to_string();
            match self.load_file(&path) {
                Ok(definition) => report.loaded.push(LoadedDefinition { origin, definition }),
                Err(error) => {
                    warn!(origin = %origin, error = %error, "skipping invalid definition file");
                    report.errors.push(LoadFailure { origin, error });
                }
            }
        }

        info!(
            dir = %dir.display(),
            loaded = report.loaded.len(),
            failed = report.errors.len(),
            "definition directory loaded"
        );
        Ok(report)
    }

    fn has_definition_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.settings.extensions.iter().any(|e| e == ext))
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
