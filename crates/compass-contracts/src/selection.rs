//! Task analysis and candidate types produced during agent selection.
//!
//! `Candidate` values live for exactly one selection call and are never
//! persisted.

use serde::{Deserialize, Serialize};

/// How demanding a task looks from its description alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

/// Deterministic result of scanning a task description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskAnalysis {
    /// Capability names in keyword-group order, without duplicates.
    pub required_capabilities: Vec<String>,
    /// Matched keyword-group dimensions, in group order.
    pub dimensions: Vec<String>,
    pub complexity: Complexity,
    pub estimated_agents: usize,
    /// When false, selection goes straight to capability lookup.
    pub search_enabled: bool,
}

/// One weighted hypothesis in the candidate search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// The solution dimension this candidate stands for.
    pub approach_tag: String,
    pub raw_weight: f64,
    /// In `[0, 2π)`.
    pub phase: f64,
    pub normalized_score: f64,
    /// Outline of how the dimension would be approached.
    pub sketch: Vec<String>,
}
