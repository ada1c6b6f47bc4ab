//! One scoring strategy per quality dimension.

use std::collections::HashSet;
use std::fmt::Debug;

use super::text::{matches_keyword, TextStats};
use super::{DimensionScore, QualityDimension};
use crate::core::profiles::{AudienceThresholds, Band};

/// Texts shorter than this are never penalised for repetition.
const MIN_WORDS_FOR_REPETITION: usize = 10;

/// Inputs every strategy may read.
#[derive(Debug, Clone, Copy)]
pub struct ScoringContext<'a> {
    pub language: &'a str,
    pub thresholds: &'a AudienceThresholds,
    /// Band actually applied to the word count (request target or audience band).
    pub word_band: Band<u32>,
    pub emotion_keywords: &'a [&'a str],
}

/// A pure scoring rule for one dimension. Implementations must return a
/// score in `[0, 1]` and depend only on their inputs.
pub trait ScoringStrategy: Send + Sync + Debug {
    fn dimension(&self) -> QualityDimension;

    fn score(&self, text: &TextStats, ctx: &ScoringContext<'_>) -> DimensionScore;
}

/// The built-in strategy for every dimension.
pub fn standard_strategies() -> Vec<Box<dyn ScoringStrategy>> {
    vec![
        Box::new(WordLimitScorer),
        Box::new(CoreEmotionScorer),
        Box::new(RepetitionScorer),
        Box::new(ReadabilityScorer),
        Box::new(StructureScorer),
    ]
}

fn clamp01(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

// ============================================================================
// Word limit
// ============================================================================

/// 1.0 inside the band (edges inclusive); outside, loses twice the relative
/// deviation from the violated edge, so 50% over or under scores 0.0.
pub fn word_limit_score(count: u32, band: Band<u32>) -> f64 {
    if band.contains(count) {
        return 1.0;
    }
    let deviation = if count < band.min {
        f64::from(band.min - count) / f64::from(band.min)
    } else {
        f64::from(count - band.max) / f64::from(band.max.max(1))
    };
    clamp01(1.0 - 2.0 * deviation)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WordLimitScorer;

impl ScoringStrategy for WordLimitScorer {
    fn dimension(&self) -> QualityDimension {
        QualityDimension::WordLimit
    }

    fn score(&self, text: &TextStats, ctx: &ScoringContext<'_>) -> DimensionScore {
        let count = u32::try_from(text.word_count()).unwrap_or(u32::MAX);
        DimensionScore {
            dimension: self.dimension(),
            score: word_limit_score(count, ctx.word_band),
            measured: f64::from(count),
            detail: format!(
                "{count} words, band {}-{}",
                ctx.word_band.min, ctx.word_band.max
            ),
        }
    }
}

// ============================================================================
// Core emotion
// ============================================================================

/// Share of sentences containing at least one emotion keyword, against the
/// audience minimum.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoreEmotionScorer;

impl ScoringStrategy for CoreEmotionScorer {
    fn dimension(&self) -> QualityDimension {
        QualityDimension::CoreEmotion
    }

    fn score(&self, text: &TextStats, ctx: &ScoringContext<'_>) -> DimensionScore {
        let dimension = self.dimension();
        if ctx.emotion_keywords.is_empty() {
            return DimensionScore {
                dimension,
                score: 0.5,
                measured: 0.0,
                detail: format!("no emotion lexicon for '{}'", ctx.language),
            };
        }
        if text.sentences.is_empty() {
            return DimensionScore {
                dimension,
                score: 0.0,
                measured: 0.0,
                detail: "no sentences".to_string(),
            };
        }

        let marked = text
            .sentences
            .iter()
            .filter(|sentence| {
                sentence.iter().any(|word| {
                    ctx.emotion_keywords
                        .iter()
                        .any(|keyword| matches_keyword(word, keyword))
                })
            })
            .count();
        let ratio = marked as f64 / text.sentences.len() as f64;
        let min_ratio = ctx.thresholds.min_emotion_ratio;
        let score = if min_ratio <= 0.0 {
            1.0
        } else {
            clamp01(ratio / min_ratio)
        };

        DimensionScore {
            dimension,
            score,
            measured: ratio,
            detail: format!(
                "{marked}/{} sentences marked, minimum {:.0}%",
                text.sentences.len(),
                min_ratio * 100.0
            ),
        }
    }
}

// ============================================================================
// Repetition
// ============================================================================

/// Share of repeated three-word phrases.
pub fn repeated_phrase_ratio(words: &[String]) -> f64 {
    if words.len() < 3 {
        return 0.0;
    }
    let trigrams: Vec<&[String]> = words.windows(3).collect();
    let unique: HashSet<&[String]> = trigrams.iter().copied().collect();
    1.0 - unique.len() as f64 / trigrams.len() as f64
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RepetitionScorer;

impl ScoringStrategy for RepetitionScorer {
    fn dimension(&self) -> QualityDimension {
        QualityDimension::Repetition
    }

    fn score(&self, text: &TextStats, ctx: &ScoringContext<'_>) -> DimensionScore {
        let dimension = self.dimension();
        if text.word_count() < MIN_WORDS_FOR_REPETITION {
            return DimensionScore {
                dimension,
                score: 1.0,
                measured: 0.0,
                detail: "text too short to judge repetition".to_string(),
            };
        }
        let ratio = repeated_phrase_ratio(&text.words);
        let max = ctx.thresholds.max_repetition_ratio;
        let score = if ratio <= max {
            1.0
        } else {
            clamp01(1.0 - (ratio - max) / (1.0 - max))
        };
        DimensionScore {
            dimension,
            score,
            measured: ratio,
            detail: format!(
                "{:.1}% repeated phrases, maximum {:.1}%",
                ratio * 100.0,
                max * 100.0
            ),
        }
    }
}

// ============================================================================
// Readability
// ============================================================================

/// Average sentence length against the audience band.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadabilityScorer;

impl ScoringStrategy for ReadabilityScorer {
    fn dimension(&self) -> QualityDimension {
        QualityDimension::Readability
    }

    fn score(&self, text: &TextStats, ctx: &ScoringContext<'_>) -> DimensionScore {
        let dimension = self.dimension();
        let Some(avg) = text.avg_sentence_length() else {
            return DimensionScore {
                dimension,
                score: 0.0,
                measured: 0.0,
                detail: "no sentences".to_string(),
            };
        };
        let band = ctx.thresholds.sentence_length;
        let score = if band.contains(avg) {
            1.0
        } else if avg < band.min {
            clamp01(avg / band.min)
        } else {
            clamp01(1.0 - (avg - band.max) / band.max.max(1.0))
        };
        DimensionScore {
            dimension,
            score,
            measured: avg,
            detail: format!(
                "{avg:.1} words per sentence, band {:.0}-{:.0}",
                band.min, band.max
            ),
        }
    }
}

// ============================================================================
// Structure
// ============================================================================

/// Paragraph count against the audience band.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructureScorer;

impl ScoringStrategy for StructureScorer {
    fn dimension(&self) -> QualityDimension {
        QualityDimension::Structure
    }

    fn score(&self, text: &TextStats, ctx: &ScoringContext<'_>) -> DimensionScore {
        let count = u32::try_from(text.paragraph_count()).unwrap_or(u32::MAX);
        let band = ctx.thresholds.paragraph_count;
        let score = if count == 0 {
            0.0
        } else if band.contains(count) {
            1.0
        } else if count < band.min {
            f64::from(count) / f64::from(band.min)
        } else {
            f64::from(band.max) / f64::from(count)
        };
        DimensionScore {
            dimension: self.dimension(),
            score: clamp01(score),
            measured: f64::from(count),
            detail: format!("{count} paragraphs, band {}-{}", band.min, band.max),
        }
    }
}
