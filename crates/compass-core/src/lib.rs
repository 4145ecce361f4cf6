//! # compass-core
//!
//! Tool catalog and runtime executor for Compass agents.
//!
//! This crate provides:
//! - The two collaborator traits (`ModelInvoker`, `Tool`)
//! - The `ToolCatalog` with the five built-in tools
//! - The `Executor` that binds definitions to instances and runs tasks
//!
//! ## Usage
//!
//! ```rust,ignore
//! use compass_core::{Executor, ExecutorSettings, ToolCatalog};
//! ```

pub mod catalog;
pub mod executor;
pub mod traits;

pub use catalog::{BuiltinTool, ToolCatalog, ToolHandle, ToolLookup};
pub use executor::{Executor, ExecutorSettings, ExecutorTotals};
