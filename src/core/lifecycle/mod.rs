//! Template Lifecycle Governor
//!
//! Template versions move through `Candidate -> Eligible -> Promoted ->
//! Deprecated`. The governor owns that state exclusively:
//!
//! - [`guardrails`]: the pure promotion decision (cooldown, stability, score)
//! - [`governor`]: registration, outcome recording and the single-writer commit
//! - [`drift`]: per-segment longitudinal monitoring, advisory only
//!
//! State transitions are published to a [`LifecycleEventSink`]; persistence
//! of versions and events belongs to whoever consumes them.

pub mod drift;
pub mod governor;
pub mod guardrails;

pub use drift::{DriftAlert, DriftConfig, DriftDetector, DriftKind, DriftSeverity, DriftSummary, SegmentKey, SegmentStats};
pub use governor::{GovernorConfig, GovernorError, OutcomeReport, PromotionAttempt, TemplateGovernor};
pub use guardrails::{evaluate_promotion, GuardrailConfig, PromotionDecision, PromotionInput, RejectionReason};

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

pub type TemplateVersionId = Uuid;

// ============================================================================
// Template identity
// ============================================================================

/// Lineage of a template: every version for the same profile combination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TemplateKey {
    pub audience: String,
    pub genre: String,
    pub emotion: String,
    pub languages: Vec<String>,
}

impl TemplateKey {
    pub fn new(audience: &str, genre: &str, emotion: &str, languages: &[String]) -> Self {
        Self {
            audience: audience.to_string(),
            genre: genre.to_string(),
            emotion: emotion.to_string(),
            languages: languages.to_vec(),
        }
    }
}

impl std::fmt::Display for TemplateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.audience,
            self.genre,
            self.emotion,
            self.languages.join("+")
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    Candidate,
    Eligible,
    Promoted,
    Deprecated,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LifecycleState::Candidate => "CANDIDATE",
            LifecycleState::Eligible => "ELIGIBLE",
            LifecycleState::Promoted => "PROMOTED",
            LifecycleState::Deprecated => "DEPRECATED",
        };
        f.write_str(s)
    }
}

/// A hashed, versioned layer bundle. Content never changes; a changed
/// bundle is a new version in the same lineage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateVersion {
    pub id: TemplateVersionId,
    pub key: TemplateKey,
    pub version: u32,
    pub layer_hashes: Vec<String>,
    pub bundle_hash: String,
    pub(crate) state: LifecycleState,
    pub sample_count: u32,
    pub created_at: DateTime<Utc>,
    pub promoted_at: Option<DateTime<Utc>>,
    pub deprecated_at: Option<DateTime<Utc>>,
}

impl TemplateVersion {
    pub fn state(&self) -> LifecycleState {
        self.state
    }
}

// ============================================================================
// Events
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum TransitionReason {
    Registered,
    MinimumSamples { samples: u32 },
    GuardrailApproved { combined_score: f64 },
    Superseded { by: TemplateVersionId },
    Drift { alert_id: Uuid, relative_drop: f64 },
    Manual { note: String },
    /// An earlier promoted version restored by an operator.
    Rollback { note: String },
}

impl std::fmt::Display for TransitionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransitionReason::Registered => write!(f, "registered"),
            TransitionReason::MinimumSamples { samples } => {
                write!(f, "minimum samples reached ({samples})")
            }
            TransitionReason::GuardrailApproved { combined_score } => {
                write!(f, "guardrails passed (combined {combined_score:.3})")
            }
            TransitionReason::Superseded { by } => write!(f, "superseded by {by}"),
            TransitionReason::Drift { relative_drop, .. } => {
                write!(f, "drift ({:.0}% drop)", relative_drop * 100.0)
            }
            TransitionReason::Manual { note } => write!(f, "manual: {note}"),
            TransitionReason::Rollback { note } => write!(f, "rollback: {note}"),
        }
    }
}

/// A state transition of one template version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub version_id: TemplateVersionId,
    pub key: TemplateKey,
    pub version: u32,
    /// `None` when the version was just registered.
    pub from: Option<LifecycleState>,
    pub to: LifecycleState,
    pub reason: TransitionReason,
    pub at: DateTime<Utc>,
}

/// Receives lifecycle transitions, e.g. a template marketplace store.
#[cfg_attr(test, mockall::automock)]
pub trait LifecycleEventSink: Send + Sync {
    fn emit(&self, event: &LifecycleEvent);
}

/// Discards events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventSink;

impl LifecycleEventSink for NoopEventSink {
    fn emit(&self, _event: &LifecycleEvent) {}
}

/// Keeps events in memory.
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl LifecycleEventSink for MemoryEventSink {
    fn emit(&self, event: &LifecycleEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
    }
}

/// Forwards events to an async consumer. Events are dropped once the
/// receiver is gone.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<LifecycleEvent>,
}

impl ChannelEventSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LifecycleEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl LifecycleEventSink for ChannelEventSink {
    fn emit(&self, event: &LifecycleEvent) {
        if self.tx.send(event.clone()).is_err() {
            tracing::debug!(version_id = %event.version_id, "Lifecycle event receiver closed");
        }
    }
}
