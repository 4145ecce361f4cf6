//! Two-variant A/B tests.
//!
//! A user's variant is derived from SHA-256 of `"{test_id}:{user_id}"`, so
//! assignment is stable without any stored randomness. Once a test is
//! analyzed with enough participants it is `Completed`: its result is frozen
//! and its assignment map can no longer grow.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use compass_contracts::error::{CompassError, CompassResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TestId(pub Uuid);

impl TestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Variant {
    A,
    B,
}

impl Variant {
    /// Stable assignment for `user_id` in `test_id`.
    pub fn for_user(test_id: TestId, user_id: &str) -> Self {
        let digest = Sha256::digest(format!("{test_id}:{user_id}").as_bytes());
        if digest[0] % 2 == 0 {
            Variant::A
        } else {
            Variant::B
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignificanceMethod {
    /// `1 - exp(-z²/2)`.
    #[default]
    ExponentialApprox,
    /// Two-sided two-proportion z-test: `2Φ(|z|) - 1`.
    NormalCdf,
}

impl SignificanceMethod {
    /// Significance of the difference between two conversion proportions.
    ///
    /// Zero when either variant is empty or the pooled standard error is
    /// zero (both variants converted at 0% or both at 100%).
    pub fn significance(self, a: VariantTally, b: VariantTally) -> f64 {
        if a.participants == 0 || b.participants == 0 {
            return 0.0;
        }
        let (n1, n2) = (a.participants as f64, b.participants as f64);
        let (p1, p2) = (a.conversion_rate(), b.conversion_rate());
        let pooled = (a.conversions + b.conversions) as f64 / (n1 + n2);
        let se = (pooled * (1.0 - pooled) * (1.0 / n1 + 1.0 / n2)).sqrt();
        if se == 0.0 || !se.is_finite() {
            return 0.0;
        }
        let z = (p1 - p2).abs() / se;

        match self {
            SignificanceMethod::ExponentialApprox => (1.0 - (-z * z / 2.0).exp()).max(0.0),
            SignificanceMethod::NormalCdf => erf(z / std::f64::consts::SQRT_2).clamp(0.0, 1.0),
        }
    }
}

/// Abramowitz and Stegun 7.1.26, absolute error below 1.5e-7.
fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + 0.327_591_1 * x);
    let inner = -1.453_152_027 + t * 1.061_405_429;
    let poly = t * (0.254_829_592 + t * (-0.284_496_736 + t * (1.421_413_741 + t * inner)));
    sign * (1.0 - poly * (-x * x).exp())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantTally {
    pub participants: u64,
    pub conversions: u64,
}

impl VariantTally {
    pub fn conversion_rate(&self) -> f64 {
        self.conversions as f64 / self.participants.max(1) as f64
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbTestConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Search dimension the test is about, if any. A concluded winner nudges
    /// this dimension's strategy bias.
    #[serde(default)]
    pub dimension: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbTestStatus {
    Active,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbAnalysis {
    pub test_id: TestId,
    pub total_participants: u64,
    pub conversion_rate_a: f64,
    pub conversion_rate_b: f64,
    pub significance: f64,
    /// `None` when the difference is not significant at the configured level.
    pub winner: Option<Variant>,
    pub recommendation: String,
}

/// Result of analyzing a test. Too few participants is an expected outcome,
/// not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AbVerdict {
    InsufficientSample { participants: u64, required: u64 },
    Concluded(AbAnalysis),
}

impl AbVerdict {
    /// Turn an insufficient sample into `CompassError::InsufficientSample`.
    pub fn concluded(self) -> CompassResult<AbAnalysis> {
        match self {
            AbVerdict::Concluded(analysis) => Ok(analysis),
            AbVerdict::InsufficientSample { participants, required } => {
                Err(CompassError::InsufficientSample { participants, required })
            }
        }
    }
}

/// Read-only snapshot of a test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbTestView {
    pub id: TestId,
    pub config: AbTestConfig,
    pub status: AbTestStatus,
    pub created_at: DateTime<Utc>,
    pub variant_a: VariantTally,
    pub variant_b: VariantTally,
    pub result: Option<AbAnalysis>,
}

// ── AbTest ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct AbTest {
    id: TestId,
    config: AbTestConfig,
    status: AbTestStatus,
    created_at: DateTime<Utc>,
    assignments: BTreeMap<String, Variant>,
    converted: BTreeSet<String>,
    variant_a: VariantTally,
    variant_b: VariantTally,
    result: Option<AbAnalysis>,
}

impl AbTest {
    pub fn new(config: AbTestConfig) -> Self {
        Self {
            id: TestId::new(),
            config,
            status: AbTestStatus::Active,
            created_at: Utc::now(),
            assignments: BTreeMap::new(),
            converted: BTreeSet::new(),
            variant_a: VariantTally::default(),
            variant_b: VariantTally::default(),
            result: None,
        }
    }

    pub fn id(&self) -> TestId {
        self.id
    }

    pub fn config(&self) -> &AbTestConfig {
        &self.config
    }

    pub fn status(&self) -> AbTestStatus {
        self.status
    }

    pub fn result(&self) -> Option<&AbAnalysis> {
        self.result.as_ref()
    }

    pub fn variant_of(&self, user_id: &str) -> Option<Variant> {
        self.assignments.get(user_id).copied()
    }

    fn tally_mut(&mut self, variant: Variant) -> &mut VariantTally {
        match variant {
            Variant::A => &mut self.variant_a,
            Variant::B => &mut self.variant_b,
        }
    }

    /// Assign `user_id`, or return their existing variant.
    ///
    /// A completed test still answers for known users but refuses new ones.
    pub fn assign(&mut self, user_id: &str) -> CompassResult<Variant> {
        if let Some(variant) = self.variant_of(user_id) {
            return Ok(variant);
        }
        if self.status == AbTestStatus::Completed {
            return Err(CompassError::TestConcluded { id: self.id.to_string() });
        }
        let variant = Variant::for_user(self.id, user_id);
        self.assignments.insert(user_id.to_string(), variant);
        self.tally_mut(variant).participants += 1;
        Ok(variant)
    }

    /// Count one conversion for an assigned user. Each user converts at most
    /// once; returns whether this call counted.
    pub fn record_conversion(&mut self, user_id: &str) -> CompassResult<bool> {
        if self.status == AbTestStatus::Completed {
            return Err(CompassError::TestConcluded { id: self.id.to_string() });
        }
        let Some(variant) = self.variant_of(user_id) else {
            return Ok(false);
        };
        if !self.converted.insert(user_id.to_string()) {
            return Ok(false);
        }
        self.tally_mut(variant).conversions += 1;
        Ok(true)
    }

    /// Analyze the test, concluding it when the sample is large enough.
    /// A completed test returns its frozen result.
    pub fn analyze(
        &mut self,
        min_sample_size: u64,
        confidence_level: f64,
        method: SignificanceMethod,
    ) -> AbVerdict {
        if let Some(result) = &self.result {
            return AbVerdict::Concluded(result.clone());
        }

        let total = self.variant_a.participants + self.variant_b.participants;
        if total < min_sample_size {
            return AbVerdict::InsufficientSample { participants: total, required: min_sample_size };
        }

        let rate_a = self.variant_a.conversion_rate();
        let rate_b = self.variant_b.conversion_rate();
        let significance = method.significance(self.variant_a, self.variant_b);
        let winner = (significance > confidence_level)
            .then(|| if rate_a > rate_b { Variant::A } else { Variant::B });
        let recommendation = match winner {
            Some(v) => format!("use variant {v:?}"),
            None => "no significant difference".to_string(),
        };

        let analysis = AbAnalysis {
            test_id: self.id,
            total_participants: total,
            conversion_rate_a: rate_a,
            conversion_rate_b: rate_b,
            significance,
            winner,
            recommendation,
        };
        self.status = AbTestStatus::Completed;
        self.result = Some(analysis.clone());
        AbVerdict::Concluded(analysis)
    }

    pub fn view(&self) -> AbTestView {
        AbTestView {
            id: self.id,
            config: self.config.clone(),
            status: self.status,
            created_at: self.created_at,
            variant_a: self.variant_a,
            variant_b: self.variant_b,
            result: self.result.clone(),
        }
    }
}
