//! Pure analyses over interaction counters and task outcomes.
//!
//! Nothing here touches shared state; the feedback loop takes snapshots and
//! hands them in.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::interaction::InteractionMetric;

/// Average click rate above which performance is considered healthy.
pub const HEALTHY_CLICK_RATE: f64 = 0.12;
/// Average click rate below which targeting should be reviewed.
pub const CONCERNING_CLICK_RATE: f64 = 0.08;

/// Click-rate cut-offs for tagging individual subjects.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceThresholds {
    pub top_click_rate: f64,
    pub low_click_rate: f64,
}

impl Default for PerformanceThresholds {
    fn default() -> Self {
        Self { top_click_rate: 0.15, low_click_rate: 0.05 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectPerformance {
    pub subject_id: String,
    pub click_rate: f64,
    pub conversion_rate: f64,
    pub sent: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightKind {
    PositivePerformance,
    PerformanceConcern,
    SuccessPattern,
}

/// A qualitative finding with an attached confidence in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub kind: InsightKind,
    pub message: String,
    pub recommendation: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OfferAnalysis {
    pub total_subjects: usize,
    /// Mean over subjects with at least one `sent`.
    pub average_click_rate: f64,
    pub average_conversion_rate: f64,
    pub top_performing: Vec<SubjectPerformance>,
    pub underperforming: Vec<SubjectPerformance>,
    pub insights: Vec<Insight>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngagementAnalysis {
    pub distinct_users: usize,
    pub total_interactions: u64,
    pub interactions_per_user: f64,
}

/// Terminal task outcomes seen for one search dimension.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyStats {
    pub completed: u64,
    pub failed: u64,
}

impl StrategyStats {
    pub fn observations(&self) -> u64 {
        self.completed + self.failed
    }

    pub fn success_rate(&self) -> f64 {
        match self.observations() {
            0 => 0.0,
            n => self.completed as f64 / n as f64,
        }
    }
}

/// Output of one analysis cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub offers: OfferAnalysis,
    pub engagement: EngagementAnalysis,
    pub strategies: BTreeMap<String, StrategyStats>,
    pub generated_at: DateTime<Utc>,
}

// ── Analyses ─────────────────────────────────────────────────────────────────

pub fn analyze_offer_performance<'a>(
    metrics: impl IntoIterator<Item = &'a InteractionMetric>,
    thresholds: PerformanceThresholds,
) -> OfferAnalysis {
    let mut analysis = OfferAnalysis::default();
    let mut click_total = 0.0;
    let mut conversion_total = 0.0;
    let mut counted = 0usize;

    for metric in metrics {
        analysis.total_subjects += 1;
        let Some(click_rate) = metric.click_rate() else {
            continue;
        };
        let performance = SubjectPerformance {
            subject_id: metric.subject_id.clone(),
            click_rate,
            conversion_rate: metric.conversion_rate(),
            sent: metric.sent,
        };
        click_total += click_rate;
        conversion_total += performance.conversion_rate;
        counted += 1;

        if click_rate > thresholds.top_click_rate {
            analysis.top_performing.push(performance);
        } else if click_rate < thresholds.low_click_rate {
            analysis.underperforming.push(performance);
        }
    }

    if counted > 0 {
        analysis.average_click_rate = click_total / counted as f64;
        analysis.average_conversion_rate = conversion_total / counted as f64;
        analysis.insights = offer_insights(&analysis);
    }
    analysis
}

fn offer_insights(analysis: &OfferAnalysis) -> Vec<Insight> {
    let mut insights = Vec::new();

    if analysis.average_click_rate > HEALTHY_CLICK_RATE {
        insights.push(Insight {
            kind: InsightKind::PositivePerformance,
            message: "click rates are above average".to_string(),
            recommendation: "continue the current strategy".to_string(),
            confidence: 0.8,
        });
    } else if analysis.average_click_rate < CONCERNING_CLICK_RATE {
        insights.push(Insight {
            kind: InsightKind::PerformanceConcern,
            message: "click rates are below average".to_string(),
            recommendation: "review offer content and targeting".to_string(),
            confidence: 0.9,
        });
    }

    if !analysis.top_performing.is_empty() {
        insights.push(Insight {
            kind: InsightKind::SuccessPattern,
            message: format!("found {} high-performing subjects", analysis.top_performing.len()),
            recommendation: "analyze patterns in the successful subjects".to_string(),
            confidence: 0.85,
        });
    }
    insights
}

pub fn analyze_engagement<'a>(
    metrics: impl IntoIterator<Item = &'a InteractionMetric>,
) -> EngagementAnalysis {
    let mut users: BTreeSet<&str> = BTreeSet::new();
    let mut total_interactions = 0;
    for metric in metrics {
        total_interactions += metric.total();
        users.extend(metric.distinct_users.iter().map(String::as_str));
    }
    let interactions_per_user = match users.len() {
        0 => 0.0,
        n => total_interactions as f64 / n as f64,
    };
    EngagementAnalysis { distinct_users: users.len(), total_interactions, interactions_per_user }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interaction::{Interaction, InteractionKind};

    fn metric(subject: &str, sent: u64, clicked: u64, converted: u64) -> InteractionMetric {
        let mut m = InteractionMetric::new(subject);
        let mut push = |kind: InteractionKind, n: u64| {
            for i in 0..n {
                m.record(&Interaction::new(subject, format!("user-{i}"), kind));
            }
        };
        push(InteractionKind::Sent, sent);
        push(InteractionKind::Clicked, clicked);
        push(InteractionKind::Converted, converted);
        m
    }

    #[test]
    fn subjects_are_tagged_by_click_rate() {
        let metrics = [
            metric("hot", 10, 3, 1),
            metric("cold", 100, 2, 0),
            metric("middling", 10, 1, 0),
            metric("unsent", 0, 4, 0),
        ];
        let analysis = analyze_offer_performance(&metrics, PerformanceThresholds::default());

        assert_eq!(analysis.total_subjects, 4);
        assert_eq!(analysis.top_performing.len(), 1);
        assert_eq!(analysis.top_performing[0].subject_id, "hot");
        assert_eq!(analysis.underperforming.len(), 1);
        assert_eq!(analysis.underperforming[0].subject_id, "cold");
        // Mean over the three sent subjects: (0.3 + 0.02 + 0.1) / 3.
        assert!((analysis.average_click_rate - 0.14).abs() < 1e-12);
    }

    #[test]
    fn healthy_average_reports_positive_insight() {
        let analysis =
            analyze_offer_performance(&[metric("hot", 10, 3, 1)], PerformanceThresholds::default());
        let kinds: Vec<InsightKind> = analysis.insights.iter().map(|i| i.kind).collect();
        assert_eq!(kinds, vec![InsightKind::PositivePerformance, InsightKind::SuccessPattern]);
    }

    #[test]
    fn weak_average_reports_concern() {
        let analysis = analyze_offer_performance(
            &[metric("cold", 100, 2, 0)],
            PerformanceThresholds::default(),
        );
        assert_eq!(analysis.insights.len(), 1);
        assert_eq!(analysis.insights[0].kind, InsightKind::PerformanceConcern);
        assert_eq!(analysis.insights[0].confidence, 0.9);
        assert!(analysis.insights[0].recommendation.contains("targeting"));
    }

    #[test]
    fn no_data_means_no_insights() {
        let none: Vec<InteractionMetric> = Vec::new();
        let analysis = analyze_offer_performance(&none, PerformanceThresholds::default());
        assert_eq!(analysis, OfferAnalysis::default());
    }

    #[test]
    fn engagement_counts_users_across_subjects() {
        let metrics = [metric("a", 2, 0, 0), metric("b", 3, 0, 0)];
        let engagement = analyze_engagement(&metrics);
        // user-0 and user-1 appear in both subjects; user-2 only in `b`.
        assert_eq!(engagement.distinct_users, 3);
        assert_eq!(engagement.total_interactions, 5);
        assert!((engagement.interactions_per_user - 5.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn strategy_success_rate() {
        let stats = StrategyStats { completed: 3, failed: 1 };
        assert_eq!(stats.observations(), 4);
        assert_eq!(stats.success_rate(), 0.75);
        assert_eq!(StrategyStats::default().success_rate(), 0.0);
    }
}
