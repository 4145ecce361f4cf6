//! The feedback loop service.
//!
//! Three activities run on independent intervals:
//!
//! - collection:   drain submitted interactions into per-subject counters
//! - analysis:     offer performance, engagement, strategy outcome report
//! - optimization: recommendations plus a strategy bias pushed to the engine
//!
//! Each activity only reads snapshots and replaces whole values, so running
//! one twice, or concurrently with another, is harmless.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use compass_contracts::{
    error::{CompassError, CompassResult},
    task::{TaskEvent, TaskStatus},
};
use compass_orchestrator::OrchestrationEngine;

use crate::{
    abtest::{AbTest, AbTestConfig, AbTestView, AbVerdict, SignificanceMethod, TestId, Variant},
    analysis::{
        analyze_engagement, analyze_offer_performance, AnalysisReport, EngagementAnalysis,
        OfferAnalysis, PerformanceThresholds, StrategyStats, HEALTHY_CLICK_RATE,
    },
    interaction::{Interaction, InteractionMetric},
};

/// Bias added to the dimension of a concluded A/B test's winning variant.
pub const WINNER_BIAS: f64 = 0.25;

const MAX_LISTED_SUBJECTS: usize = 5;

// ── Seam ─────────────────────────────────────────────────────────────────────

/// Receives per-dimension strategy bias from the optimization activity.
pub trait StrategySink: Send + Sync {
    fn apply_bias(&self, bias: BTreeMap<String, f64>);
}

impl StrategySink for OrchestrationEngine {
    fn apply_bias(&self, bias: BTreeMap<String, f64>) {
        self.set_strategy_bias(bias);
    }
}

// ── Settings and outputs ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackSettings {
    pub collection_interval: Duration,
    pub analysis_interval: Duration,
    pub optimization_interval: Duration,
    pub min_sample_size: u64,
    pub confidence_level: f64,
    pub significance: SignificanceMethod,
    pub thresholds: PerformanceThresholds,
    pub min_strategy_observations: u64,
}

impl Default for FeedbackSettings {
    fn default() -> Self {
        Self {
            collection_interval: Duration::from_secs(120),
            analysis_interval: Duration::from_secs(1800),
            optimization_interval: Duration::from_secs(3600),
            min_sample_size: 50,
            confidence_level: 0.95,
            significance: SignificanceMethod::default(),
            thresholds: PerformanceThresholds::default(),
            min_strategy_observations: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationKind {
    /// Reuse what top subjects do.
    ContentOptimization,
    /// Rework subjects nobody clicks.
    ContentImprovement,
    /// Lean on a concluded A/B winner.
    AdoptVariant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub kind: RecommendationKind,
    pub message: String,
    pub subjects: Vec<String>,
    pub priority: Priority,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizationPlan {
    pub recommendations: Vec<Recommendation>,
    pub bias: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackTotals {
    pub interactions_tracked: u64,
    pub collection_runs: u64,
    pub analysis_runs: u64,
    pub optimizations_applied: u64,
    pub tests_created: u64,
    pub tests_concluded: u64,
    pub task_events_observed: u64,
}

// ── FeedbackLoop ─────────────────────────────────────────────────────────────

pub struct FeedbackLoop {
    settings: FeedbackSettings,
    sink: Arc<dyn StrategySink>,
    pending: Mutex<Vec<Interaction>>,
    metrics: Mutex<BTreeMap<String, InteractionMetric>>,
    strategies: Mutex<BTreeMap<String, StrategyStats>>,
    tests: Mutex<BTreeMap<TestId, AbTest>>,
    latest: Mutex<Option<AnalysisReport>>,
    totals: Mutex<FeedbackTotals>,
}

impl FeedbackLoop {
    pub fn new(settings: FeedbackSettings, sink: Arc<dyn StrategySink>) -> Self {
        Self {
            settings,
            sink,
            pending: Mutex::new(Vec::new()),
            metrics: Mutex::new(BTreeMap::new()),
            strategies: Mutex::new(BTreeMap::new()),
            tests: Mutex::new(BTreeMap::new()),
            latest: Mutex::new(None),
            totals: Mutex::new(FeedbackTotals::default()),
        }
    }

    pub fn settings(&self) -> &FeedbackSettings {
        &self.settings
    }

    fn bump(&self, f: impl FnOnce(&mut FeedbackTotals)) {
        f(&mut *self.totals.lock().unwrap_or_else(PoisonError::into_inner));
    }

    pub fn totals(&self) -> FeedbackTotals {
        self.totals.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    // ── Interactions ─────────────────────────────────────────────────────────

    /// Queue an interaction for the next collection run.
    pub fn submit(&self, interaction: Interaction) {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).push(interaction);
    }

    /// Drain the queue into the counters. Returns how many were ingested.
    pub fn collect(&self) -> usize {
        let batch =
            std::mem::take(&mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner));
        for interaction in &batch {
            self.ingest(interaction);
        }
        self.bump(|t| t.collection_runs += 1);
        debug!(ingested = batch.len(), "feedback collected");
        batch.len()
    }

    pub fn ingest(&self, interaction: &Interaction) {
        self.metrics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(interaction.subject_id.clone())
            .or_insert_with(|| InteractionMetric::new(interaction.subject_id.clone()))
            .record(interaction);
        self.bump(|t| t.interactions_tracked += 1);
    }

    pub fn metric(&self, subject_id: &str) -> Option<InteractionMetric> {
        self.metrics.lock().unwrap_or_else(PoisonError::into_inner).get(subject_id).cloned()
    }

    fn metrics_snapshot(&self) -> Vec<InteractionMetric> {
        self.metrics.lock().unwrap_or_else(PoisonError::into_inner).values().cloned().collect()
    }

    // ── Analysis ─────────────────────────────────────────────────────────────

    pub fn analyze_offer_performance(&self) -> OfferAnalysis {
        analyze_offer_performance(&self.metrics_snapshot(), self.settings.thresholds)
    }

    pub fn analyze_engagement(&self) -> EngagementAnalysis {
        analyze_engagement(&self.metrics_snapshot())
    }

    /// Record a terminal task outcome against its search dimension. Events
    /// without a dimension carry no strategy signal and are skipped.
    pub fn observe_task(&self, event: &TaskEvent) {
        self.bump(|t| t.task_events_observed += 1);
        let Some(dimension) = &event.dimension else {
            return;
        };
        let mut strategies = self.strategies.lock().unwrap_or_else(PoisonError::into_inner);
        let stats = strategies.entry(dimension.clone()).or_default();
        match event.outcome {
            TaskStatus::Completed => stats.completed += 1,
            TaskStatus::Failed => stats.failed += 1,
            _ => {}
        }
    }

    pub fn strategy_stats(&self) -> BTreeMap<String, StrategyStats> {
        self.strategies.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Run one analysis cycle and keep its report.
    pub fn run_analysis(&self) -> AnalysisReport {
        let snapshot = self.metrics_snapshot();
        let report = AnalysisReport {
            offers: analyze_offer_performance(&snapshot, self.settings.thresholds),
            engagement: analyze_engagement(&snapshot),
            strategies: self.strategy_stats(),
            generated_at: chrono::Utc::now(),
        };
        info!(
            subjects = report.offers.total_subjects,
            insights = report.offers.insights.len(),
            users = report.engagement.distinct_users,
            "analysis cycle completed"
        );
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(report.clone());
        self.bump(|t| t.analysis_runs += 1);
        report
    }

    pub fn latest_report(&self) -> Option<AnalysisReport> {
        self.latest.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    // ── Optimization ─────────────────────────────────────────────────────────

    /// Build recommendations and a fresh strategy bias, then push the bias.
    ///
    /// A dimension with at least `min_strategy_observations` outcomes gets
    /// `success_rate - 0.5`; each concluded test with a winner adds
    /// `WINNER_BIAS` to its dimension.
    pub fn optimize(&self) -> OptimizationPlan {
        let mut plan = OptimizationPlan::default();
        let snapshot = self.metrics_snapshot();

        let mut strong: Vec<(f64, &str)> = snapshot
            .iter()
            .filter_map(|m| Some((m.click_rate()?, m.subject_id.as_str())))
            .filter(|(rate, _)| *rate > HEALTHY_CLICK_RATE)
            .collect();
        strong.sort_by(|a, b| b.0.total_cmp(&a.0));
        if !strong.is_empty() {
            plan.recommendations.push(Recommendation {
                kind: RecommendationKind::ContentOptimization,
                message: "focus on content patterns from top-performing subjects".to_string(),
                subjects: strong
                    .iter()
                    .take(MAX_LISTED_SUBJECTS)
                    .map(|(_, s)| s.to_string())
                    .collect(),
                priority: Priority::High,
            });
        }

        let weak: Vec<String> = snapshot
            .iter()
            .filter(|m| m.click_rate().is_some_and(|r| r < self.settings.thresholds.low_click_rate))
            .take(MAX_LISTED_SUBJECTS)
            .map(|m| m.subject_id.clone())
            .collect();
        if !weak.is_empty() {
            plan.recommendations.push(Recommendation {
                kind: RecommendationKind::ContentImprovement,
                message: "review and improve underperforming subjects".to_string(),
                subjects: weak,
                priority: Priority::Medium,
            });
        }

        for (dimension, stats) in self.strategy_stats() {
            if stats.observations() >= self.settings.min_strategy_observations {
                plan.bias.insert(dimension, stats.success_rate() - 0.5);
            }
        }

        let tests = self.tests.lock().unwrap_or_else(PoisonError::into_inner);
        for test in tests.values() {
            let Some(winner) = test.result().and_then(|r| r.winner) else {
                continue;
            };
            plan.recommendations.push(Recommendation {
                kind: RecommendationKind::AdoptVariant,
                message: format!("use variant {winner:?} of '{}'", test.config().name),
                subjects: vec![test.id().to_string()],
                priority: Priority::High,
            });
            if let Some(dimension) = &test.config().dimension {
                *plan.bias.entry(dimension.clone()).or_insert(0.0) += WINNER_BIAS;
            }
        }
        drop(tests);

        self.sink.apply_bias(plan.bias.clone());
        self.bump(|t| t.optimizations_applied += 1);
        info!(
            recommendations = plan.recommendations.len(),
            biased_dimensions = plan.bias.len(),
            "optimization cycle applied"
        );
        plan
    }

    // ── A/B tests ────────────────────────────────────────────────────────────

    pub fn create_test(&self, config: AbTestConfig) -> TestId {
        let test = AbTest::new(config);
        let id = test.id();
        info!(test_id = %id, name = %test.config().name, "A/B test created");
        self.tests.lock().unwrap_or_else(PoisonError::into_inner).insert(id, test);
        self.bump(|t| t.tests_created += 1);
        id
    }

    fn with_test<T>(&self, id: TestId, f: impl FnOnce(&mut AbTest) -> T) -> CompassResult<T> {
        let mut tests = self.tests.lock().unwrap_or_else(PoisonError::into_inner);
        let test = tests
            .get_mut(&id)
            .ok_or_else(|| CompassError::TestNotFound { id: id.to_string() })?;
        Ok(f(test))
    }

    pub fn assign(&self, id: TestId, user_id: &str) -> CompassResult<Variant> {
        let variant = self.with_test(id, |test| test.assign(user_id))??;
        debug!(test_id = %id, user_id = %user_id, variant = ?variant, "A/B assignment");
        Ok(variant)
    }

    pub fn record_conversion(&self, id: TestId, user_id: &str) -> CompassResult<bool> {
        self.with_test(id, |test| test.record_conversion(user_id))?
    }

    /// Analyze a test with the configured sample size, confidence level and
    /// significance method.
    pub fn analyze_test(&self, id: TestId) -> CompassResult<AbVerdict> {
        let settings = &self.settings;
        let (verdict, newly_concluded) = self.with_test(id, |test| {
            let was_open = test.result().is_none();
            let verdict = test.analyze(
                settings.min_sample_size,
                settings.confidence_level,
                settings.significance,
            );
            let concluded = was_open && matches!(verdict, AbVerdict::Concluded(_));
            (verdict, concluded)
        })?;

        match &verdict {
            AbVerdict::InsufficientSample { participants, required } => {
                debug!(test_id = %id, participants, required, "A/B sample too small");
            }
            AbVerdict::Concluded(analysis) if newly_concluded => {
                self.bump(|t| t.tests_concluded += 1);
                info!(
                    test_id = %id,
                    winner = ?analysis.winner,
                    significance = analysis.significance,
                    "A/B test concluded"
                );
            }
            AbVerdict::Concluded(_) => {}
        }
        Ok(verdict)
    }

    pub fn test(&self, id: TestId) -> CompassResult<AbTestView> {
        self.with_test(id, |test| test.view())
    }

    pub fn tests(&self) -> Vec<AbTestView> {
        self.tests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(AbTest::view)
            .collect()
    }

    // ── Scheduler ────────────────────────────────────────────────────────────

    /// Spawn the three activities on their intervals. The first run of each
    /// happens one full interval after start.
    pub fn start(self: &Arc<Self>) -> FeedbackHandle {
        let collection = self.spawn_activity("collection", self.settings.collection_interval, |fl| {
            fl.collect();
        });
        let analysis = self.spawn_activity("analysis", self.settings.analysis_interval, |fl| {
            fl.run_analysis();
        });
        let optimization =
            self.spawn_activity("optimization", self.settings.optimization_interval, |fl| {
                fl.optimize();
            });
        info!("feedback loop started");
        FeedbackHandle { tasks: vec![collection, analysis, optimization] }
    }

    fn spawn_activity(
        self: &Arc<Self>,
        name: &'static str,
        period: Duration,
        activity: fn(&FeedbackLoop),
    ) -> JoinHandle<()> {
        let feedback = Arc::clone(self);
        let period = period.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                debug!(activity = name, "feedback activity tick");
                activity(&feedback);
            }
        })
    }
}

/// Owns the scheduled activities; stopping (or dropping) aborts them.
pub struct FeedbackHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl FeedbackHandle {
    pub fn stop(mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        info!("feedback loop stopped");
    }
}

impl Drop for FeedbackHandle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
