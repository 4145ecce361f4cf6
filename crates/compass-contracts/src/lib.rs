//! # compass-contracts
//!
//! Shared types, schemas, and error contracts for the Compass agent
//! orchestration core.
//!
//! All crates in the workspace import from here. No orchestration logic
//! lives in this crate, only data definitions and error types.

pub mod agent;
pub mod error;
pub mod execution;
pub mod selection;
pub mod task;
