//! Fourteen-dimension prompt classifier.
//!
//! Each dimension is a weighted bag of whole-word, case-insensitive keywords.
//! A prompt's raw score per dimension is `matchCount × weight`; the total
//! score buckets the prompt into a [`Tier`](crate::config::Tier). Patterns
//! are compiled once from [`ScoringConfig`](crate::config::ScoringConfig) at
//! startup (and again on every hot-reload) into a [`CompiledScoring`], never
//! per-request.

use anyhow::Context;
use regex::Regex;

use crate::config::{ScoringConfig, Tier};

/// A single dimension's compiled keyword patterns.
struct CompiledDimension {
    name: String,
    weight: f64,
    patterns: Vec<Regex>,
}

/// Compiled form of [`ScoringConfig`] — built once, reused across requests.
pub struct CompiledScoring {
    dimensions: Vec<CompiledDimension>,
    tier_medium_min: f64,
    tier_complex_min: f64,
    tier_reasoning_min: f64,
}

impl CompiledScoring {
    /// Compile every dimension's keyword list into whole-word, case-insensitive patterns.
    pub fn compile(cfg: &ScoringConfig) -> anyhow::Result<Self> {
        let dimensions = cfg
            .dimensions
            .iter()
            .map(|d| {
                let patterns = d
                    .keywords
                    .iter()
                    .map(|kw| {
                        Regex::new(&format!(r"(?i)\b{}\b", regex::escape(kw)))
                            .with_context(|| format!("compiling keyword `{kw}` for dimension `{}`", d.name))
                    })
                    .collect::<anyhow::Result<Vec<_>>>()?;
                Ok(CompiledDimension { name: d.name.clone(), weight: d.weight, patterns })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Self {
            dimensions,
            tier_medium_min: cfg.tier_medium_min,
            tier_complex_min: cfg.tier_complex_min,
            tier_reasoning_min: cfg.tier_reasoning_min,
        })
    }

    fn tier_for_score(&self, score: f64) -> Tier {
        if score < self.tier_medium_min {
            Tier::Simple
        } else if score < self.tier_complex_min {
            Tier::Medium
        } else if score < self.tier_reasoning_min {
            Tier::Complex
        } else {
            Tier::Reasoning
        }
    }
}

/// A single dimension's contribution to the total score.
#[derive(Debug, Clone)]
pub struct DimensionScore {
    pub name: String,
    pub score: f64,
}

/// The outcome of classifying one prompt.
#[derive(Debug, Clone)]
pub struct ScoringResult {
    pub tier: Tier,
    pub total_score: f64,
    /// Top-3 dimension score share of the total; `0.5` when `total_score == 0.0`.
    pub confidence: f64,
    /// All configured dimensions, sorted by score descending (ties keep
    /// config order, since [`Vec::sort_by`] is stable).
    pub dimensions: Vec<DimensionScore>,
}

/// Classify a prompt's text against every configured dimension.
pub fn classify(prompt: &str, scoring: &CompiledScoring) -> ScoringResult {
    let mut dims: Vec<DimensionScore> = scoring
        .dimensions
        .iter()
        .map(|dim| {
            let matches: u32 = dim.patterns.iter().map(|p| p.find_iter(prompt).count() as u32).sum();
            DimensionScore { name: dim.name.clone(), score: matches as f64 * dim.weight }
        })
        .collect();

    let total: f64 = dims.iter().map(|d| d.score).sum();
    dims.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    let confidence = if total == 0.0 {
        0.5
    } else {
        dims.iter().take(3).map(|d| d.score).sum::<f64>() / total
    };

    ScoringResult { tier: scoring.tier_for_score(total), total_score: total, confidence, dimensions: dims }
}
