//! Promotion guardrails.
//!
//! A pure function over the candidate's state, its recent scores and the
//! lineage's last promotion time. Checks run in a fixed order and the first
//! failing one decides: state, cooldown, stability, combined score.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::LifecycleState;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardrailConfig {
    /// Minimum weighted combination of quality and feedback.
    pub min_combined_score: f64,
    pub quality_weight: f64,
    pub feedback_weight: f64,
    /// Minimum time between two promotions in the same lineage.
    pub cooldown_hours: i64,
    /// Number of most recent scores used for the stability check.
    pub stability_window: usize,
    /// Maximum sample standard deviation over the stability window.
    pub stability_ceiling: f64,
    /// Feedback below this adds a recommendation, never a rejection.
    pub feedback_advisory_floor: f64,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            min_combined_score: 0.7,
            quality_weight: 0.7,
            feedback_weight: 0.3,
            cooldown_hours: 24,
            stability_window: 5,
            stability_ceiling: 0.1,
            feedback_advisory_floor: 0.6,
        }
    }
}

impl GuardrailConfig {
    /// Weighted combination rescaled to `[0, 1]`. Without feedback the
    /// quality score stands in for it.
    pub fn combined_score(&self, quality: f64, feedback: Option<f64>) -> f64 {
        let quality = quality.clamp(0.0, 1.0);
        let feedback = feedback.map(|f| f.clamp(0.0, 1.0)).unwrap_or(quality);
        let qw = self.quality_weight.max(0.0);
        let fw = self.feedback_weight.max(0.0);
        let total = qw + fw;
        if total <= f64::EPSILON {
            return quality;
        }
        ((qw * quality + fw * feedback) / total).clamp(0.0, 1.0)
    }
}

/// Everything the decision looks at.
#[derive(Debug, Clone)]
pub struct PromotionInput<'a> {
    pub state: LifecycleState,
    /// Latest quality score of the candidate.
    pub latest_quality: f64,
    pub aggregated_feedback: Option<f64>,
    /// Candidate scores, oldest first.
    pub recent_scores: &'a [f64],
    pub last_lineage_promotion: Option<DateTime<Utc>>,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "code")]
pub enum RejectionReason {
    NotEligible { state: LifecycleState },
    Cooldown { remaining_secs: i64 },
    Instability { std_dev: f64, ceiling: f64 },
    InsufficientScore { combined_score: f64, minimum: f64 },
}

impl RejectionReason {
    pub fn code(&self) -> &'static str {
        match self {
            RejectionReason::NotEligible { .. } => "not_eligible",
            RejectionReason::Cooldown { .. } => "cooldown",
            RejectionReason::Instability { .. } => "instability",
            RejectionReason::InsufficientScore { .. } => "insufficient_score",
        }
    }
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectionReason::NotEligible { state } => write!(f, "version is {state}"),
            RejectionReason::Cooldown { remaining_secs } => {
                write!(f, "lineage cooldown active for another {remaining_secs}s")
            }
            RejectionReason::Instability { std_dev, ceiling } => {
                write!(f, "score std dev {std_dev:.3} exceeds {ceiling:.3}")
            }
            RejectionReason::InsufficientScore {
                combined_score,
                minimum,
            } => write!(f, "combined score {combined_score:.3} below {minimum:.3}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum PromotionDecision {
    Approved {
        combined_score: f64,
        std_dev: f64,
        recommendations: Vec<String>,
    },
    Rejected {
        reason: RejectionReason,
    },
}

impl PromotionDecision {
    pub fn is_approved(&self) -> bool {
        matches!(self, PromotionDecision::Approved { .. })
    }

    pub fn rejection_code(&self) -> Option<&'static str> {
        match self {
            PromotionDecision::Rejected { reason } => Some(reason.code()),
            PromotionDecision::Approved { .. } => None,
        }
    }
}

/// Sample standard deviation; fewer than two scores count as stable.
pub fn sample_std_dev(scores: &[f64]) -> f64 {
    if scores.len() < 2 {
        return 0.0;
    }
    let n = scores.len() as f64;
    let mean = scores.iter().sum::<f64>() / n;
    let variance = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / (n - 1.0);
    variance.sqrt()
}

/// Decide whether a candidate may be promoted.
pub fn evaluate_promotion(config: &GuardrailConfig, input: &PromotionInput<'_>) -> PromotionDecision {
    if input.state != LifecycleState::Eligible {
        return PromotionDecision::Rejected {
            reason: RejectionReason::NotEligible { state: input.state },
        };
    }

    if let Some(last) = input.last_lineage_promotion {
        let ready_at = last + Duration::hours(config.cooldown_hours.max(0));
        if input.now < ready_at {
            return PromotionDecision::Rejected {
                reason: RejectionReason::Cooldown {
                    remaining_secs: (ready_at - input.now).num_seconds(),
                },
            };
        }
    }

    let window = config.stability_window.max(1);
    let start = input.recent_scores.len().saturating_sub(window);
    let recent = &input.recent_scores[start..];
    let std_dev = sample_std_dev(recent);
    if std_dev > config.stability_ceiling {
        return PromotionDecision::Rejected {
            reason: RejectionReason::Instability {
                std_dev,
                ceiling: config.stability_ceiling,
            },
        };
    }

    let combined_score = config.combined_score(input.latest_quality, input.aggregated_feedback);
    if combined_score < config.min_combined_score {
        return PromotionDecision::Rejected {
            reason: RejectionReason::InsufficientScore {
                combined_score,
                minimum: config.min_combined_score,
            },
        };
    }

    PromotionDecision::Approved {
        combined_score,
        std_dev,
        recommendations: recommendations(config, input, recent, combined_score),
    }
}

fn recommendations(
    config: &GuardrailConfig,
    input: &PromotionInput<'_>,
    recent: &[f64],
    combined_score: f64,
) -> Vec<String> {
    let mut out = Vec::new();
    if combined_score >= 0.9 {
        out.push("Excellent combined score; consider using this version as a reference".to_string());
    }
    match input.aggregated_feedback {
        None => out.push("No user ratings yet; promotion relied on quality scores only".to_string()),
        Some(f) if f < config.feedback_advisory_floor => {
            out.push(format!("User feedback is low ({f:.2}); review ratings before wide rollout"))
        }
        Some(_) => {}
    }
    if !recent.is_empty() {
        let mean = recent.iter().sum::<f64>() / recent.len() as f64;
        if input.latest_quality < mean {
            out.push(format!(
                "Latest score {:.2} is below the recent average {:.2}",
                input.latest_quality, mean
            ));
        }
    }
    out
}
