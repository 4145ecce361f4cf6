//! Candidate search: weighted multi-strategy scoring over solution dimensions.
//!
//! One pass, five steps:
//!
//!   1. generate   one candidate per matched dimension, weight r·(1+bias), phase in [0, 2π)
//!   2. normalize  p_i = w_i² / Σ w_j²
//!   3. adjust     w_i += damping · Σ_{j≠i} cos(φ_i − φ_j) · w_j, then renormalize
//!   4. collapse   highest p wins; ties go to the smallest dimension name
//!   5. map        winner's capabilities → agents ranked by required-capability coverage
//!
//! Deterministic for a given RNG state. An empty candidate set yields no
//! winner, which callers treat as "fall back to direct lookup".

use std::{
    cmp::Ordering,
    collections::BTreeMap,
    f64::consts::TAU,
};

use rand::Rng;

use compass_contracts::{
    agent::{AgentId, AgentSummary},
    selection::Candidate,
};
use compass_registry::Registry;

use crate::keywords::KeywordGroup;

/// Result of one search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    /// Every candidate after adjustment, in input order.
    pub candidates: Vec<Candidate>,
    pub winner: Candidate,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidateSearch {
    damping: f64,
}

impl Default for CandidateSearch {
    fn default() -> Self {
        Self { damping: 0.1 }
    }
}

impl CandidateSearch {
    pub fn new(damping: f64) -> Self {
        Self { damping }
    }

    /// Run steps 1 to 4 over `groups`.
    pub fn run<R: Rng + ?Sized>(
        &self,
        groups: &[&KeywordGroup],
        bias: &BTreeMap<String, f64>,
        rng: &mut R,
    ) -> Option<SearchOutcome> {
        let mut candidates = generate(groups, bias, rng);
        normalize(&mut candidates);
        adjust(&mut candidates, self.damping);
        let winner = collapse(&candidates)?.clone();
        Some(SearchOutcome { candidates, winner })
    }
}

/// Step 1.
pub fn generate<R: Rng + ?Sized>(
    groups: &[&KeywordGroup],
    bias: &BTreeMap<String, f64>,
    rng: &mut R,
) -> Vec<Candidate> {
    groups
        .iter()
        .map(|group| {
            let r: f64 = rng.gen();
            let phase = rng.gen_range(0.0..TAU);
            let b = bias.get(&group.dimension).copied().unwrap_or(0.0);
            Candidate {
                approach_tag: group.dimension.clone(),
                raw_weight: (r * (1.0 + b)).max(0.0),
                phase,
                normalized_score: 0.0,
                sketch: group.steps.clone(),
            }
        })
        .collect()
}

/// Step 2. An all-zero set is spread uniformly.
pub fn normalize(candidates: &mut [Candidate]) {
    let total: f64 = candidates.iter().map(|c| c.raw_weight * c.raw_weight).sum();
    let n = candidates.len() as f64;
    for c in candidates.iter_mut() {
        c.normalized_score =
            if total > 0.0 { c.raw_weight * c.raw_weight / total } else { 1.0 / n };
    }
}

/// Step 3. Reads the pre-pass weights for every contribution, clamps each
/// adjusted weight at zero, then renormalizes.
pub fn adjust(candidates: &mut [Candidate], damping: f64) {
    let before: Vec<(f64, f64)> = candidates.iter().map(|c| (c.raw_weight, c.phase)).collect();
    for (i, c) in candidates.iter_mut().enumerate() {
        let interference: f64 = before
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != i)
            .map(|(_, (w, phase))| (c.phase - phase).cos() * w)
            .sum();
        c.raw_weight = (c.raw_weight + damping * interference).max(0.0);
    }
    normalize(candidates);
}

/// Step 4.
pub fn collapse(candidates: &[Candidate]) -> Option<&Candidate> {
    candidates.iter().min_by(|a, b| {
        b.normalized_score
            .partial_cmp(&a.normalized_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.approach_tag.cmp(&b.approach_tag))
    })
}

/// Step 5. Agents holding any of `capabilities`, most required-capability
/// coverage first, agent id breaking ties, at most `limit`.
pub fn rank_agents(
    registry: &Registry,
    capabilities: &[String],
    required: &[String],
    limit: usize,
) -> Vec<AgentSummary> {
    let mut pool: BTreeMap<AgentId, AgentSummary> = BTreeMap::new();
    for capability in capabilities {
        for summary in registry.by_capability(capability) {
            pool.entry(summary.id).or_insert(summary);
        }
    }

    let mut ranked: Vec<(usize, AgentSummary)> = pool
        .into_values()
        .map(|s| {
            let coverage = required.iter().filter(|r| s.capabilities.contains(r)).count();
            (coverage, s)
        })
        .collect();
    ranked.sort_by(|(ca, a), (cb, b)| cb.cmp(ca).then_with(|| a.id.cmp(&b.id)));
    ranked.into_iter().take(limit).map(|(_, s)| s).collect()
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;
    use crate::keywords::default_keyword_groups;

    fn candidate(tag: &str, weight: f64, phase: f64) -> Candidate {
        Candidate {
            approach_tag: tag.to_string(),
            raw_weight: weight,
            phase,
            normalized_score: 0.0,
            sketch: vec![],
        }
    }

    #[test]
    fn normalization_uses_squared_weights() {
        let mut c = vec![candidate("a", 1.0, 0.0), candidate("b", 2.0, 0.0)];
        normalize(&mut c);
        assert!((c[0].normalized_score - 0.2).abs() < 1e-12);
        assert!((c[1].normalized_score - 0.8).abs() < 1e-12);
    }

    #[test]
    fn zero_weights_normalize_uniformly() {
        let mut c = vec![candidate("a", 0.0, 0.0), candidate("b", 0.0, 1.0)];
        normalize(&mut c);
        assert_eq!(c[0].normalized_score, 0.5);
    }

    #[test]
    fn in_phase_candidates_reinforce_each_other() {
        let mut c = vec![candidate("a", 0.5, 0.0), candidate("b", 0.4, 0.0)];
        adjust(&mut c, 0.1);
        assert!((c[0].raw_weight - 0.54).abs() < 1e-12);
        assert!((c[1].raw_weight - 0.45).abs() < 1e-12);

        let mut opposed = vec![candidate("a", 0.5, 0.0), candidate("b", 0.4, std::f64::consts::PI)];
        adjust(&mut opposed, 0.1);
        assert!((opposed[0].raw_weight - 0.46).abs() < 1e-12);
    }

    #[test]
    fn ties_collapse_to_smallest_dimension() {
        let mut c = vec![candidate("verification", 1.0, 0.0), candidate("budget", 1.0, 0.0)];
        normalize(&mut c);
        assert_eq!(collapse(&c).unwrap().approach_tag, "budget");
    }

    #[test]
    fn empty_set_has_no_winner() {
        let mut rng = StdRng::seed_from_u64(7);
        assert!(CandidateSearch::default().run(&[], &BTreeMap::new(), &mut rng).is_none());
    }

    #[test]
    fn search_has_exactly_one_winner_and_is_seed_deterministic() {
        let groups = default_keyword_groups();
        let refs: Vec<&KeywordGroup> = groups.iter().collect();
        let search = CandidateSearch::default();

        for seed in 0..50 {
            let a = search.run(&refs, &BTreeMap::new(), &mut StdRng::seed_from_u64(seed)).unwrap();
            let b = search.run(&refs, &BTreeMap::new(), &mut StdRng::seed_from_u64(seed)).unwrap();
            assert_eq!(a, b);
            assert_eq!(a.candidates.len(), 4);

            let total: f64 = a.candidates.iter().map(|c| c.normalized_score).sum();
            assert!((total - 1.0).abs() < 1e-9);
            let best = a.candidates.iter().map(|c| c.normalized_score).fold(f64::MIN, f64::max);
            assert_eq!(a.winner.normalized_score, best);
        }
    }

    #[test]
    fn heavy_bias_steers_the_winner() {
        let groups = default_keyword_groups();
        let refs: Vec<&KeywordGroup> = groups.iter().take(2).collect();
        let mut bias = BTreeMap::new();
        bias.insert("budget".to_string(), 1000.0);
        bias.insert("planning".to_string(), -1.0);

        for seed in 0..20 {
            let out = CandidateSearch::default()
                .run(&refs, &bias, &mut StdRng::seed_from_u64(seed))
                .unwrap();
            assert_eq!(out.winner.approach_tag, "budget");
            assert_eq!(out.winner.sketch, groups[1].steps);
        }
    }
}
