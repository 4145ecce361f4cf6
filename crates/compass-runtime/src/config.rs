//! Runtime configuration.
//!
//! Every field has a default, so an empty file is a valid configuration.
//!
//! ```toml
//! [loader]
//! agents_dir = "agents"
//! verify_integrity = true
//!
//! [executor]
//! call_timeout_ms = 30000
//!
//! [orchestrator]
//! max_concurrent_tasks = 8
//! search_seed = 42
//!
//! [feedback]
//! significance = "normal-cdf"
//! ```

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use compass_contracts::error::{CompassError, CompassResult};
use compass_core::{traits::GenerationOptions, ExecutorSettings};
use compass_feedback::{FeedbackSettings, PerformanceThresholds, SignificanceMethod};
use compass_loader::LoaderSettings;
use compass_orchestrator::{default_keyword_groups, EngineSettings, KeywordGroup};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompassConfig {
    pub loader: LoaderConfig,
    pub executor: ExecutorConfig,
    pub orchestrator: OrchestratorConfig,
    pub feedback: FeedbackConfig,
}

impl CompassConfig {
    pub fn from_toml_str(s: &str) -> CompassResult<Self> {
        let config: Self = toml::from_str(s).map_err(|e| CompassError::Config {
            reason: format!("failed to parse compass configuration: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the components cannot run with.
    pub fn validate(&self) -> CompassResult<()> {
        let invalid = |reason: String| Err(CompassError::Config { reason });
        let fb = &self.feedback;

        if !(fb.confidence_level > 0.0 && fb.confidence_level < 1.0) {
            return invalid(format!(
                "feedback.confidence_level must be between 0 and 1, got {}",
                fb.confidence_level
            ));
        }
        for (name, rate) in
            [("top_click_rate", fb.top_click_rate), ("low_click_rate", fb.low_click_rate)]
        {
            if !(0.0..=1.0).contains(&rate) {
                return invalid(format!("feedback.{name} must be between 0 and 1, got {rate}"));
            }
        }
        if fb.low_click_rate > fb.top_click_rate {
            return invalid(format!(
                "feedback.low_click_rate ({}) exceeds top_click_rate ({})",
                fb.low_click_rate, fb.top_click_rate
            ));
        }
        if !(0.0..=1.0).contains(&self.executor.temperature) {
            return invalid(format!(
                "executor.temperature must be between 0 and 1, got {}",
                self.executor.temperature
            ));
        }
        let damping = self.orchestrator.adjustment_damping;
        if !(damping >= 0.0 && damping.is_finite()) {
            return invalid(format!(
                "orchestrator.adjustment_damping must be a non-negative number, got {damping}"
            ));
        }
        for (name, value) in [
            ("executor.call_timeout_ms", self.executor.call_timeout_ms),
            ("orchestrator.max_concurrent_tasks", self.orchestrator.max_concurrent_tasks as u64),
            ("orchestrator.event_buffer", self.orchestrator.event_buffer as u64),
            ("feedback.collection_interval_secs", fb.collection_interval_secs),
            ("feedback.analysis_interval_secs", fb.analysis_interval_secs),
            ("feedback.optimization_interval_secs", fb.optimization_interval_secs),
        ] {
            if value == 0 {
                return invalid(format!("{name} must be greater than zero"));
            }
        }
        Ok(())
    }

    /// Read and parse `path`. A relative `agents_dir` is resolved against
    /// the directory containing the file.
    pub fn from_file(path: &Path) -> CompassResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| CompassError::Config {
            reason: format!("failed to read configuration file '{}': {e}", path.display()),
        })?;
        let mut config = Self::from_toml_str(&contents)?;
        if config.loader.agents_dir.is_relative() {
            if let Some(parent) = path.parent() {
                config.loader.agents_dir = parent.join(&config.loader.agents_dir);
            }
        }
        Ok(config)
    }
}

// ── Sections ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub agents_dir: PathBuf,
    pub verify_integrity: bool,
    pub extensions: Vec<String>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        let defaults = LoaderSettings::default();
        Self {
            agents_dir: PathBuf::from("agents"),
            verify_integrity: defaults.verify_integrity,
            extensions: defaults.extensions,
        }
    }
}

impl LoaderConfig {
    pub fn settings(&self) -> LoaderSettings {
        LoaderSettings {
            verify_integrity: self.verify_integrity,
            extensions: self.extensions.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub call_timeout_ms: u64,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { call_timeout_ms: 30_000, temperature: 0.7, max_tokens: 2000 }
    }
}

impl ExecutorConfig {
    pub fn settings(&self) -> ExecutorSettings {
        ExecutorSettings {
            call_timeout: Duration::from_millis(self.call_timeout_ms),
            generation: GenerationOptions {
                temperature: self.temperature,
                max_tokens: self.max_tokens,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub max_concurrent_tasks: usize,
    pub search_seed: Option<u64>,
    pub adjustment_damping: f64,
    pub event_buffer: usize,
    /// Replaces the built-in travel keyword groups when present.
    pub keyword_groups: Option<Vec<KeywordGroup>>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 8,
            search_seed: None,
            adjustment_damping: 0.1,
            event_buffer: 256,
            keyword_groups: None,
        }
    }
}

impl OrchestratorConfig {
    pub fn settings(&self) -> EngineSettings {
        EngineSettings {
            max_concurrent_tasks: self.max_concurrent_tasks,
            search_seed: self.search_seed,
            adjustment_damping: self.adjustment_damping,
            event_buffer: self.event_buffer,
            keyword_groups: self.keyword_groups.clone().unwrap_or_else(default_keyword_groups),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    pub collection_interval_secs: u64,
    pub analysis_interval_secs: u64,
    pub optimization_interval_secs: u64,
    pub min_sample_size: u64,
    pub confidence_level: f64,
    pub significance: SignificanceMethod,
    pub top_click_rate: f64,
    pub low_click_rate: f64,
    pub min_strategy_observations: u64,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        let thresholds = PerformanceThresholds::default();
        Self {
            collection_interval_secs: 120,
            analysis_interval_secs: 1800,
            optimization_interval_secs: 3600,
            min_sample_size: 50,
            confidence_level: 0.95,
            significance: SignificanceMethod::default(),
            top_click_rate: thresholds.top_click_rate,
            low_click_rate: thresholds.low_click_rate,
            min_strategy_observations: 5,
        }
    }
}

impl FeedbackConfig {
    pub fn settings(&self) -> FeedbackSettings {
        FeedbackSettings {
            collection_interval: Duration::from_secs(self.collection_interval_secs),
            analysis_interval: Duration::from_secs(self.analysis_interval_secs),
            optimization_interval: Duration::from_secs(self.optimization_interval_secs),
            min_sample_size: self.min_sample_size,
            confidence_level: self.confidence_level,
            significance: self.significance,
            thresholds: PerformanceThresholds {
                top_click_rate: self.top_click_rate,
                low_click_rate: self.low_click_rate,
            },
            min_strategy_observations: self.min_strategy_observations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_all_defaults() {
        let config = CompassConfig::from_toml_str("").unwrap();
        assert_eq!(config, CompassConfig::default());
        assert_eq!(config.loader.agents_dir, PathBuf::from("agents"));
        assert_eq!(config.executor.settings().call_timeout, Duration::from_secs(30));
        assert_eq!(config.orchestrator.settings().keyword_groups.len(), 4);
        assert_eq!(config.feedback.settings(), FeedbackSettings::default());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = CompassConfig::from_toml_str(
            r#"
            [executor]
            call_timeout_ms = 500

            [orchestrator]
            search_seed = 42

            [[orchestrator.keyword_groups]]
            dimension = "weather"
            keywords = ["rain", "storm"]
            capabilities = ["forecast"]

            [feedback]
            significance = "normal-cdf"
            "#,
        )
        .unwrap();

        assert_eq!(config.executor.call_timeout_ms, 500);
        assert_eq!(config.executor.max_tokens, 2000);

        let engine = config.orchestrator.settings();
        assert_eq!(engine.search_seed, Some(42));
        assert_eq!(engine.max_concurrent_tasks, 8);
        assert_eq!(engine.keyword_groups.len(), 1);
        assert!(engine.keyword_groups[0].steps.is_empty());

        assert_eq!(config.feedback.significance, SignificanceMethod::NormalCdf);
        assert_eq!(config.feedback.min_sample_size, 50);
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        let err =
            CompassConfig::from_toml_str("[executor]\ncall_timeout_ms = \"soon\"").unwrap_err();
        assert!(matches!(err, CompassError::Config { .. }));
        assert_eq!(err.code(), "config_error");
    }

    #[test]
    fn out_of_range_values_are_config_errors() {
        for (doc, field) in [
            ("[feedback]\nconfidence_level = 1.5", "confidence_level"),
            ("[feedback]\nconfidence_level = 0.0", "confidence_level"),
            ("[feedback]\nlow_click_rate = -0.1", "low_click_rate"),
            ("[feedback]\ntop_click_rate = 0.02", "exceeds top_click_rate"),
            ("[executor]\ncall_timeout_ms = 0", "call_timeout_ms"),
            ("[orchestrator]\nmax_concurrent_tasks = 0", "max_concurrent_tasks"),
            ("[orchestrator]\nadjustment_damping = -1.0", "adjustment_damping"),
        ] {
            let err = CompassConfig::from_toml_str(doc).unwrap_err();
            assert_eq!(err.code(), "config_error", "{doc}");
            assert!(err.to_string().contains(field), "{doc}: {err}");
        }
        assert!(CompassConfig::default().validate().is_ok());
    }

    #[test]
    fn relative_agents_dir_follows_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("compass.toml");
        std::fs::write(&path, "[loader]\nagents_dir = \"defs\"\n").unwrap();

        let config = CompassConfig::from_file(&path).unwrap();
        assert_eq!(config.loader.agents_dir, dir.path().join("defs"));
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = CompassConfig::from_file(Path::new("/nonexistent/compass.toml")).unwrap_err();
        assert!(matches!(err, CompassError::Config { .. }));
    }
}
