//! # compass-runtime
//!
//! Builds a running Compass service from configuration:
//!
//! - `config`: `CompassConfig`, loaded from TOML with defaults for every field
//! - `offline`: `OfflineModel`, a deterministic model collaborator
//! - `runtime`: `Runtime`, the composition root tying loader, registry,
//!   executor, engine and feedback loop together

pub mod config;
pub mod offline;
pub mod runtime;

pub use config::CompassConfig;
pub use offline::OfflineModel;
pub use runtime::Runtime;
