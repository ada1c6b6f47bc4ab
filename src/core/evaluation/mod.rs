//! Constraint & Robustness Evaluator
//!
//! Pure scoring of a [`GenerationResult`] against an audience profile.
//! Each quality dimension is a [`ScoringStrategy`]; forbidden-topic
//! detection is a separate pass whose hits force `critical`.

mod constraints;
mod dimensions;
mod text;

pub use constraints::{ConstraintChecker, ConstraintViolation, ViolationSource};
pub use dimensions::{
    repeated_phrase_ratio, standard_strategies, word_limit_score, CoreEmotionScorer,
    ReadabilityScorer, RepetitionScorer, ScoringContext, ScoringStrategy, StructureScorer,
    WordLimitScorer,
};
pub use text::{word_count, TextStats};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::generation::GenerationResult;
use crate::core::profiles::{AudienceProfile, Band, DimensionWeights, ProfileSnapshot};

// ============================================================================
// Dimensions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityDimension {
    WordLimit,
    CoreEmotion,
    Repetition,
    Readability,
    Structure,
}

impl QualityDimension {
    pub const ALL: [QualityDimension; 5] = [
        QualityDimension::WordLimit,
        QualityDimension::CoreEmotion,
        QualityDimension::Repetition,
        QualityDimension::Readability,
        QualityDimension::Structure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityDimension::WordLimit => "word_limit",
            QualityDimension::CoreEmotion => "core_emotion",
            QualityDimension::Repetition => "repetition",
            QualityDimension::Readability => "readability",
            QualityDimension::Structure => "structure",
        }
    }
}

impl std::fmt::Display for QualityDimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl DimensionWeights {
    pub fn for_dimension(&self, dimension: QualityDimension) -> f64 {
        match dimension {
            QualityDimension::WordLimit => self.word_limit,
            QualityDimension::CoreEmotion => self.core_emotion,
            QualityDimension::Repetition => self.repetition,
            QualityDimension::Readability => self.readability,
            QualityDimension::Structure => self.structure,
        }
    }
}

// ============================================================================
// Results
// ============================================================================

/// Score of one dimension for one language section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionScore {
    pub dimension: QualityDimension,
    /// Always within `[0, 1]`.
    pub score: f64,
    /// Raw measurement behind the score (words, ratio, average length, ...).
    pub measured: f64,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageEvaluation {
    pub language: String,
    pub score: f64,
    pub word_count: usize,
    pub dimensions: Vec<DimensionScore>,
}

impl LanguageEvaluation {
    pub fn dimension(&self, dimension: QualityDimension) -> Option<&DimensionScore> {
        self.dimensions.iter().find(|d| d.dimension == dimension)
    }
}

/// Scores and flags for one generation. Deterministic in its inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub prompt_hash: String,
    pub languages: BTreeMap<String, LanguageEvaluation>,
    /// Mean of the language scores, within `[0, 1]`.
    pub combined_score: f64,
    /// Per-dimension mean across languages.
    pub dimensions: BTreeMap<QualityDimension, f64>,
    pub violations: Vec<ConstraintViolation>,
    /// Requested languages with no text in the output.
    pub missing_languages: Vec<String>,
    pub review_required: bool,
    pub critical: bool,
}

impl EvaluationResult {
    /// Weakest dimension; ties resolve in [`QualityDimension::ALL`] order.
    pub fn lowest_dimension(&self) -> Option<(QualityDimension, f64)> {
        QualityDimension::ALL
            .iter()
            .filter_map(|d| self.dimensions.get(d).map(|s| (*d, *s)))
            .fold(None, |lowest, (d, s)| match lowest {
                Some((_, best)) if best <= s => lowest,
                _ => Some((d, s)),
            })
    }

    /// Ordering used to pick the best attempt: non-critical first, then
    /// complete (no missing language), then passing, then score.
    pub fn ranks_above(&self, other: &EvaluationResult) -> bool {
        let (ours, theirs) = (self.standing(), other.standing());
        if ours != theirs {
            return ours > theirs;
        }
        self.combined_score > other.combined_score
    }

    fn standing(&self) -> (bool, bool, bool) {
        (
            !self.critical,
            self.missing_languages.is_empty(),
            !self.review_required,
        )
    }
}

// ============================================================================
// Evaluator
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Combined scores below this require review.
    pub review_threshold: f64,
    /// Relative tolerance around a request's explicit word target.
    pub word_target_tolerance: f64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            review_threshold: 0.7,
            word_target_tolerance: 0.2,
        }
    }
}

/// What a generation is judged against.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationContext<'a> {
    pub snapshot: &'a ProfileSnapshot,
    pub audience: &'a AudienceProfile,
    pub emotion: &'a str,
    /// Explicit word target from the request, if any.
    pub target_words: Option<u32>,
    pub forbidden_topics: &'a [String],
    pub expected_languages: &'a [String],
}

/// Runs every strategy plus the constraint pass.
#[derive(Debug)]
pub struct Evaluator {
    config: EvaluationConfig,
    strategies: Vec<Box<dyn ScoringStrategy>>,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new(EvaluationConfig::default())
    }
}

impl Evaluator {
    pub fn new(config: EvaluationConfig) -> Self {
        Self {
            config,
            strategies: standard_strategies(),
        }
    }

    /// Replace the strategy for its dimension (or add it if absent).
    pub fn with_strategy(mut self, strategy: Box<dyn ScoringStrategy>) -> Self {
        let dimension = strategy.dimension();
        self.strategies.retain(|s| s.dimension() != dimension);
        self.strategies.push(strategy);
        self.strategies.sort_by_key(|s| s.dimension());
        self
    }

    pub fn config(&self) -> &EvaluationConfig {
        &self.config
    }

    /// Word band applied to a section: the request target widened by the
    /// tolerance, or the audience band.
    pub fn word_band(&self, audience: &AudienceProfile, target_words: Option<u32>) -> Band<u32> {
        match target_words {
            Some(target) if target > 0 => {
                let tolerance = self.config.word_target_tolerance.clamp(0.0, 1.0);
                let spread = (f64::from(target) * tolerance).round() as u32;
                Band::new(target.saturating_sub(spread), target.saturating_add(spread))
            }
            _ => audience.thresholds.word_band,
        }
    }

    pub fn evaluate(&self, result: &GenerationResult, ctx: &EvaluationContext<'_>) -> EvaluationResult {
        let checker = ConstraintChecker::new(&ctx.audience.forbidden_markers, ctx.forbidden_topics);
        let weights = ctx.audience.weights.normalized();
        let active_weight: f64 = self
            .strategies
            .iter()
            .map(|s| weights.for_dimension(s.dimension()))
            .sum();
        let word_band = self.word_band(ctx.audience, ctx.target_words);

        let mut languages = BTreeMap::new();
        let mut violations = Vec::new();
        for section in &result.sections {
            let keywords = ctx.snapshot.emotion_keywords(&section.language, ctx.emotion);
            let scoring = ScoringContext {
                language: &section.language,
                thresholds: &ctx.audience.thresholds,
                word_band,
                emotion_keywords: &keywords,
            };
            let stats = TextStats::analyze(&section.text);
            let dimensions: Vec<DimensionScore> = self
                .strategies
                .iter()
                .map(|s| {
                    let mut score = s.score(&stats, &scoring);
                    score.score = clamp_score(score.score);
                    score
                })
                .collect();
            let weighted: f64 = dimensions
                .iter()
                .map(|d| d.score * weights.for_dimension(d.dimension))
                .sum();
            let score = if active_weight > f64::EPSILON {
                clamp_score(weighted / active_weight)
            } else {
                0.0
            };

            violations.extend(checker.check(&section.language, &section.text));
            languages.insert(
                section.language.clone(),
                LanguageEvaluation {
                    language: section.language.clone(),
                    score,
                    word_count: stats.word_count(),
                    dimensions,
                },
            );
        }

        let combined_score = if languages.is_empty() {
            0.0
        } else {
            clamp_score(
                languages.values().map(|l| l.score).sum::<f64>() / languages.len() as f64,
            )
        };

        let mut dimensions = BTreeMap::new();
        for dimension in QualityDimension::ALL {
            let scores: Vec<f64> = languages
                .values()
                .filter_map(|l| l.dimension(dimension).map(|d| d.score))
                .collect();
            if !scores.is_empty() {
                dimensions.insert(dimension, scores.iter().sum::<f64>() / scores.len() as f64);
            }
        }

        let missing_languages: Vec<String> = ctx
            .expected_languages
            .iter()
            .filter(|lang| {
                languages
                    .get(lang.as_str())
                    .map_or(true, |l| l.word_count == 0)
            })
            .cloned()
            .collect();

        let critical = !violations.is_empty();
        let review_required = critical
            || combined_score < self.config.review_threshold
            || !missing_languages.is_empty();

        EvaluationResult {
            prompt_hash: result.prompt_hash.clone(),
            languages,
            combined_score,
            dimensions,
            violations,
            missing_languages,
            review_required,
            critical,
        }
    }
}

fn clamp_score(score: f64) -> f64 {
    if score.is_finite() {
        score.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
