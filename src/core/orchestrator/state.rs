//! Run state machine: states, trace and the pure retry decision.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::evaluation::{EvaluationResult, QualityDimension};
use crate::core::generation::GenerationError;
use crate::core::profiles::{AudienceThresholds, Band};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Init,
    Compose,
    Optimize,
    Generate,
    Split,
    Evaluate,
    Decide,
    Retry,
    PromoteCheck,
    Fail,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Init => "INIT",
            RunState::Compose => "COMPOSE",
            RunState::Optimize => "OPTIMIZE",
            RunState::Generate => "GENERATE",
            RunState::Split => "SPLIT",
            RunState::Evaluate => "EVALUATE",
            RunState::Decide => "DECIDE",
            RunState::Retry => "RETRY",
            RunState::PromoteCheck => "PROMOTE_CHECK",
            RunState::Fail => "FAIL",
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub attempt: u32,
    pub state: RunState,
    pub at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Every state a run passed through, in order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunTrace {
    entries: Vec<TraceEntry>,
}

impl RunTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&mut self, attempt: u32, state: RunState) {
        self.push(attempt, state, None);
    }

    pub fn note(&mut self, attempt: u32, state: RunState, note: impl Into<String>) {
        self.push(attempt, state, Some(note.into()));
    }

    fn push(&mut self, attempt: u32, state: RunState, note: Option<String>) {
        tracing::trace!(attempt, state = %state, "Run state");
        self.entries.push(TraceEntry {
            attempt,
            state,
            at: Utc::now(),
            note,
        });
    }

    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    pub fn states(&self) -> Vec<RunState> {
        self.entries.iter().map(|e| e.state).collect()
    }

    pub fn count(&self, state: RunState) -> usize {
        self.entries.iter().filter(|e| e.state == state).count()
    }
}

// ============================================================================
// Decision
// ============================================================================

/// Why another attempt is made.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum RetryReason {
    /// Forbidden content was found.
    ConstraintViolation { topics: Vec<String> },
    /// Some requested languages came back empty.
    MissingLanguages { languages: Vec<String> },
    /// The weakest dimension pulled the score under the review threshold.
    Dimension { dimension: QualityDimension, score: f64 },
}

/// What the last step of an attempt produced.
#[derive(Debug, Clone, Copy)]
pub enum AttemptOutcome<'a> {
    Evaluated(&'a EvaluationResult),
    /// Transport retries were exhausted for this attempt.
    TransportFailed {
        error: &'a GenerationError,
        has_prior_result: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Retry(RetryReason),
    /// Stop and return the best attempt. `review_required` is forced when
    /// the run stopped without an acceptable result.
    Finalize { review_required: bool },
    Fail,
}

/// Next step after attempt `attempt` of at most `max_attempts`.
pub fn decide(outcome: AttemptOutcome<'_>, attempt: u32, max_attempts: u32) -> Decision {
    let evaluation = match outcome {
        AttemptOutcome::TransportFailed {
            has_prior_result: true,
            ..
        } => return Decision::Finalize {
            review_required: true,
        },
        AttemptOutcome::TransportFailed { .. } => return Decision::Fail,
        AttemptOutcome::Evaluated(evaluation) => evaluation,
    };

    let budget_left = attempt < max_attempts;
    if !evaluation.review_required {
        return Decision::Finalize {
            review_required: false,
        };
    }
    if !budget_left {
        return Decision::Finalize {
            review_required: true,
        };
    }

    if evaluation.critical {
        let mut topics: Vec<String> = evaluation
            .violations
            .iter()
            .map(|v| v.topic.clone())
            .collect();
        topics.sort();
        topics.dedup();
        return Decision::Retry(RetryReason::ConstraintViolation { topics });
    }
    if !evaluation.missing_languages.is_empty() {
        return Decision::Retry(RetryReason::MissingLanguages {
            languages: evaluation.missing_languages.clone(),
        });
    }
    match evaluation.lowest_dimension() {
        Some((dimension, score)) => Decision::Retry(RetryReason::Dimension { dimension, score }),
        None => Decision::Finalize {
            review_required: true,
        },
    }
}

// ============================================================================
// Retry directives
// ============================================================================

/// Instruction lines folded into the next prompt's constraints layer.
pub fn retry_directives(
    reason: &RetryReason,
    evaluation: &EvaluationResult,
    thresholds: &AudienceThresholds,
    word_band: Band<u32>,
    emotion: &str,
) -> Vec<String> {
    match reason {
        RetryReason::ConstraintViolation { topics } => {
            let mut lines = vec![
                "The previous draft contained content that is not allowed for this audience.".to_string(),
            ];
            for topic in topics {
                let description = evaluation
                    .violations
                    .iter()
                    .find(|v| &v.topic == topic)
                    .map(|v| v.description.as_str())
                    .unwrap_or("");
                let mut matched: Vec<&str> = evaluation
                    .violations
                    .iter()
                    .filter(|v| &v.topic == topic)
                    .map(|v| v.matched.as_str())
                    .collect();
                matched.sort_unstable();
                matched.dedup();
                lines.push(format!(
                    "Remove everything related to '{topic}' ({description}); avoid words such as: {}.",
                    matched.join(", ")
                ));
            }
            lines.push("Keep the plot intact and resolve tension gently.".to_string());
            lines
        }
        RetryReason::MissingLanguages { languages } => vec![format!(
            "The previous draft was missing these language sections: {}. Write every language section in full and separate them exactly as instructed.",
            languages.join(", ")
        )],
        RetryReason::Dimension { dimension, .. } => {
            vec![dimension_directive(*dimension, evaluation, thresholds, word_band, emotion)]
        }
    }
}

fn dimension_directive(
    dimension: QualityDimension,
    evaluation: &EvaluationResult,
    thresholds: &AudienceThresholds,
    word_band: Band<u32>,
    emotion: &str,
) -> String {
    match dimension {
        QualityDimension::WordLimit => {
            let counts: Vec<usize> = evaluation.languages.values().map(|l| l.word_count).collect();
            let average = if counts.is_empty() {
                0
            } else {
                counts.iter().sum::<usize>() / counts.len()
            };
            let target = (word_band.min + word_band.max) / 2;
            if (average as u64) < u64::from(word_band.min) {
                format!(
                    "The previous draft was too short ({average} words). Expand the chapter to about {target} words per language ({}-{}).",
                    word_band.min, word_band.max
                )
            } else {
                format!(
                    "The previous draft was too long ({average} words). Shorten the chapter to about {target} words per language ({}-{}).",
                    word_band.min, word_band.max
                )
            }
        }
        QualityDimension::CoreEmotion => format!(
            "Deepen the core emotion '{emotion}': show it in at least {:.0}% of sentences through actions, thoughts and sensory detail.",
            thresholds.min_emotion_ratio * 100.0
        ),
        QualityDimension::Repetition => {
            "Vary the phrasing: do not repeat the same word sequences, and find fresh images for recurring ideas.".to_string()
        }
        QualityDimension::Readability => format!(
            "Adjust sentence length to {:.0}-{:.0} words per sentence on average.",
            thresholds.sentence_length.min, thresholds.sentence_length.max
        ),
        QualityDimension::Structure => format!(
            "Organise the chapter into {}-{} paragraphs separated by blank lines.",
            thresholds.paragraph_count.min, thresholds.paragraph_count.max
        ),
    }
}
