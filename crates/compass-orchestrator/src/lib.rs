//! # compass-orchestrator
//!
//! Turns free-text tasks into a ranked agent selection and an aggregated
//! execution result.
//!
//! - `keywords`: deterministic task analysis over keyword groups
//! - `search`: the weighted candidate search used for multi-capability tasks
//! - `engine`: the `OrchestrationEngine` task pipeline and worker pool

pub mod engine;
pub mod keywords;
pub mod search;

pub use engine::{EngineSettings, EngineTotals, OrchestrationEngine, Selection};
pub use keywords::{default_keyword_groups, KeywordGroup, TaskAnalyzer};
pub use search::CandidateSearch;
