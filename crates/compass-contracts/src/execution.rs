//! Runtime instance state and metrics.
//!
//! Metrics belong to exactly one instance and are written only by the
//! executor on that instance's behalf.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::AgentId;

/// Lifecycle of an `AgentInstance`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Initializing,
    Active,
    Stopped,
}

/// Per-instance execution counters.
///
/// Invariant: `tasks_executed == tasks_completed + tasks_failed`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceMetrics {
    pub tasks_executed: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    /// Running mean in milliseconds.
    pub average_execution_ms: f64,
    pub last_used: Option<DateTime<Utc>>,
}

impl InstanceMetrics {
    /// Record one finished execution.
    ///
    /// The mean is updated incrementally as `avg + (elapsed - avg) / n`.
    pub fn record(&mut self, elapsed_ms: u64, success: bool) {
        self.tasks_executed += 1;
        if success {
            self.tasks_completed += 1;
        } else {
            self.tasks_failed += 1;
        }
        let n = self.tasks_executed as f64;
        self.average_execution_ms += (elapsed_ms as f64 - self.average_execution_ms) / n;
        self.last_used = Some(Utc::now());
    }

    /// Fraction of executions that completed, `0.0` before the first run.
    pub fn success_rate(&self) -> f64 {
        if self.tasks_executed == 0 {
            0.0
        } else {
            self.tasks_completed as f64 / self.tasks_executed as f64
        }
    }
}

/// Snapshot of one instance for status endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceView {
    pub agent_id: AgentId,
    pub name: String,
    pub status: InstanceStatus,
    pub created_at: DateTime<Utc>,
    pub bound_tools: Vec<String>,
    /// Tools declared by the definition but absent from the catalog.
    pub missing_tools: Vec<String>,
    pub metrics: InstanceMetrics,
}
