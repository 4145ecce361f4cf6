//! # compass-loader
//!
//! Loads declarative agent definitions from TOML files.
//!
//! Every file passes through structural validation against an embedded JSON
//! Schema, a UUID check on `meta.id`, and (when declared) an integrity
//! digest check before a normalized `AgentDefinition` is returned. Nothing
//! here touches the registry.
//!
//! ```rust,ignore
//! use compass_loader::{DefinitionLoader, LoaderSettings};
//!
//! let loader = DefinitionLoader::new(LoaderSettings::default())?;
//! let report = loader.load_directory(Path::new("agents"))?;
//! ```

pub mod integrity;
pub mod loader;
pub mod schema;

pub use integrity::{compute_digest, seal};
pub use loader::{
    DefinitionLoader, LoadFailure, LoadReport, LoadedDefinition, LoaderSettings, LoaderStats,
};
