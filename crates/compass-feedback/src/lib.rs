//! # compass-feedback
//!
//! Closes the loop between what users do and how the orchestrator picks
//! strategies.
//!
//! - `interaction`: interaction kinds and per-subject counters
//! - `analysis`: offer performance, engagement, and strategy statistics
//! - `abtest`: stable-assignment two-variant tests with significance checks
//! - `feedback`: the `FeedbackLoop` service and its interval scheduler

pub mod abtest;
pub mod analysis;
pub mod feedback;
pub mod interaction;

pub use abtest::{
    AbAnalysis, AbTestConfig, AbTestStatus, AbTestView, AbVerdict, SignificanceMethod, TestId,
    Variant,
};
pub use analysis::{
    AnalysisReport, EngagementAnalysis, Insight, InsightKind, OfferAnalysis,
    PerformanceThresholds, StrategyStats,
};
pub use feedback::{
    FeedbackHandle, FeedbackLoop, FeedbackSettings, FeedbackTotals, OptimizationPlan, Priority,
    Recommendation, RecommendationKind, StrategySink,
};
pub use interaction::{Interaction, InteractionKind, InteractionMetric};
