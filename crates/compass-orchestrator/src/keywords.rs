//! Keyword-driven task analysis.
//!
//! A task description is scanned for keyword groups. Each matched group
//! contributes one solution dimension and its capability names. The scan is
//! a pure function of the description text: the same input always yields
//! the same `TaskAnalysis`.

use serde::{Deserialize, Serialize};

use compass_contracts::selection::{Complexity, TaskAnalysis};

/// One domain keyword group.
///
/// ```toml
/// [[orchestrator.keyword_groups]]
/// dimension = "budget"
/// keywords = ["budget", "cost", "price"]
/// capabilities = ["budget_analysis", "price_tracking"]
/// steps = ["collect price points", "compare against budget"]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordGroup {
    /// Solution dimension name; also the candidate's approach tag.
    pub dimension: String,
    /// Lowercase substrings that trigger the group.
    pub keywords: Vec<String>,
    pub capabilities: Vec<String>,
    /// Outline used as the candidate sketch.
    #[serde(default)]
    pub steps: Vec<String>,
}

impl KeywordGroup {
    fn new(dimension: &str, keywords: &[&str], capabilities: &[&str], steps: &[&str]) -> Self {
        Self {
            dimension: dimension.to_string(),
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            capabilities: capabilities.iter().map(|s| s.to_string()).collect(),
            steps: steps.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Return true if any keyword occurs in the lowercased `text`.
    pub fn matches(&self, lowercase_text: &str) -> bool {
        self.keywords
            .iter()
            .any(|k| lowercase_text.contains(k.to_lowercase().as_str()))
    }
}

/// The travel-domain groups used when no configuration overrides them.
pub fn default_keyword_groups() -> Vec<KeywordGroup> {
    vec![
        KeywordGroup::new(
            "planning",
            &["itinerary", "plan", "trip"],
            &["itinerary_design", "destination_research"],
            &[
                "gather destination preferences",
                "draft a day-by-day itinerary",
                "balance pace and logistics",
            ],
        ),
        KeywordGroup::new(
            "budget",
            &["budget", "cost", "price"],
            &["budget_analysis", "price_tracking"],
            &["collect price points", "compare against the stated budget", "suggest savings"],
        ),
        KeywordGroup::new(
            "verification",
            &["research", "verify", "check"],
            &["fact_checking", "information_gathering"],
            &["gather sources", "cross-check claims", "flag uncertainty"],
        ),
        KeywordGroup::new(
            "monitoring",
            &["proactive", "monitor", "offer"],
            &["user_interest_monitoring", "proactive_offer_generation"],
            &["watch for interest signals", "match signals to offers", "time the outreach"],
        ),
    ]
}

/// Maps task descriptions to required capabilities and complexity.
#[derive(Debug, Clone)]
pub struct TaskAnalyzer {
    groups: Vec<KeywordGroup>,
}

impl Default for TaskAnalyzer {
    fn default() -> Self {
        Self::new(default_keyword_groups())
    }
}

impl TaskAnalyzer {
    pub fn new(groups: Vec<KeywordGroup>) -> Self {
        Self { groups }
    }

    pub fn groups(&self) -> &[KeywordGroup] {
        &self.groups
    }

    pub fn group(&self, dimension: &str) -> Option<&KeywordGroup> {
        self.groups.iter().find(|g| g.dimension == dimension)
    }

    /// Analyze a description.
    ///
    /// More than three capabilities → high (3 agents, search on); two or
    /// three → medium (2 agents, search on); otherwise low (1 agent, direct
    /// lookup).
    pub fn analyze(&self, description: &str) -> TaskAnalysis {
        let text = description.to_lowercase();
        let mut dimensions = Vec::new();
        let mut required_capabilities: Vec<String> = Vec::new();

        for group in self.groups.iter().filter(|g| g.matches(&text)) {
            dimensions.push(group.dimension.clone());
            for capability in &group.capabilities {
                if !required_capabilities.contains(capability) {
                    required_capabilities.push(capability.clone());
                }
            }
        }

        let (complexity, estimated_agents, search_enabled) = match required_capabilities.len() {
            n if n > 3 => (Complexity::High, 3, true),
            n if n > 1 => (Complexity::Medium, 2, true),
            _ => (Complexity::Low, 1, false),
        };

        TaskAnalysis {
            required_capabilities,
            dimensions,
            complexity,
            estimated_agents,
            search_enabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_groups_make_a_high_complexity_task() {
        let analysis = TaskAnalyzer::default().analyze("Plan a Lisbon TRIP within a tight budget");

        assert_eq!(analysis.dimensions, vec!["planning", "budget"]);
        assert_eq!(
            analysis.required_capabilities,
            vec!["itinerary_design", "destination_research", "budget_analysis", "price_tracking"]
        );
        assert_eq!(analysis.complexity, Complexity::High);
        assert_eq!(analysis.estimated_agents, 3);
        assert!(analysis.search_enabled);
    }

    #[test]
    fn one_group_is_medium() {
        let analysis = TaskAnalyzer::default().analyze("verify the museum opening hours");
        assert_eq!(analysis.complexity, Complexity::Medium);
        assert_eq!(analysis.estimated_agents, 2);
        assert!(analysis.search_enabled);
    }

    #[test]
    fn no_match_is_low_and_skips_search() {
        let analysis = TaskAnalyzer::default().analyze("tell me a joke");
        assert!(analysis.required_capabilities.is_empty());
        assert_eq!(analysis.complexity, Complexity::Low);
        assert_eq!(analysis.estimated_agents, 1);
        assert!(!analysis.search_enabled);
    }

    #[test]
    fn single_capability_group_is_low() {
        let analyzer =
            TaskAnalyzer::new(vec![KeywordGroup::new("weather", &["rain"], &["forecast"], &[])]);
        let analysis = analyzer.analyze("Will it rain in Bergen?");
        assert_eq!(analysis.required_capabilities, vec!["forecast"]);
        assert_eq!(analysis.complexity, Complexity::Low);
        assert!(!analysis.search_enabled);
    }

    #[test]
    fn analysis_is_reproducible() {
        let analyzer = TaskAnalyzer::default();
        let text = "monitor fares and check the offer";
        assert_eq!(analyzer.analyze(text), analyzer.analyze(text));
    }
}
