//! Template governor: sole owner of template version state.
//!
//! Each lineage sits behind its own async mutex, so promotion commits are
//! serialized per lineage while different lineages proceed in parallel.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::drift::{DriftAlert, DriftConfig, DriftDetector, DriftSummary, SegmentKey, SegmentStats};
use super::guardrails::{self, GuardrailConfig, PromotionDecision, PromotionInput};
use super::{
    LifecycleEvent, LifecycleEventSink, LifecycleState, TemplateKey, TemplateVersion,
    TemplateVersionId, TransitionReason,
};
use crate::core::hashing::content_hash;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GovernorError {
    #[error("Unknown template version: {0}")]
    UnknownVersion(TemplateVersionId),

    #[error("Invalid transition for {version}: {from} -> {to}")]
    InvalidTransition {
        version: TemplateVersionId,
        from: LifecycleState,
        to: LifecycleState,
    },

    #[error("No version {version} in lineage {key}")]
    UnknownLineageVersion { key: TemplateKey, version: u32 },

    #[error("Import conflict: {0}")]
    ImportConflict(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, GovernorError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    /// Scored samples before a candidate becomes eligible.
    pub min_samples_for_eligibility: u32,
    /// Scores kept per version for the stability check.
    pub score_history: usize,
    /// Apply drift demotion proposals immediately instead of leaving them
    /// to the caller.
    pub auto_deprecate_on_drift: bool,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            min_samples_for_eligibility: 5,
            score_history: 50,
            auto_deprecate_on_drift: false,
        }
    }
}

/// One recorded promotion attempt, approved or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionAttempt {
    pub version_id: TemplateVersionId,
    pub at: DateTime<Utc>,
    pub decision: PromotionDecision,
}

/// Result of recording a run outcome against a version.
#[derive(Debug, Clone, PartialEq)]
pub struct OutcomeReport {
    pub version: TemplateVersion,
    pub events: Vec<LifecycleEvent>,
    pub drift_alerts: Vec<DriftAlert>,
}

#[derive(Debug, Default)]
struct Lineage {
    versions: Vec<TemplateVersion>,
    scores: HashMap<TemplateVersionId, VecDeque<f64>>,
    last_promotion_at: Option<DateTime<Utc>>,
    attempts: Vec<PromotionAttempt>,
}

impl Lineage {
    fn get(&self, id: TemplateVersionId) -> Option<&TemplateVersion> {
        self.versions.iter().find(|v| v.id == id)
    }

    fn get_mut(&mut self, id: TemplateVersionId) -> Option<&mut TemplateVersion> {
        self.versions.iter_mut().find(|v| v.id == id)
    }
}

/// Versioning, promotion and demotion of prompt templates.
pub struct TemplateGovernor {
    config: GovernorConfig,
    guardrails: GuardrailConfig,
    lineages: RwLock<HashMap<TemplateKey, Arc<Mutex<Lineage>>>>,
    index: RwLock<HashMap<TemplateVersionId, TemplateKey>>,
    drift: Mutex<DriftDetector>,
    sink: Arc<dyn LifecycleEventSink>,
}

impl std::fmt::Debug for TemplateGovernor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateGovernor")
            .field("config", &self.config)
            .field("guardrails", &self.guardrails)
            .finish_non_exhaustive()
    }
}

impl TemplateGovernor {
    pub fn new(
        config: GovernorConfig,
        guardrails: GuardrailConfig,
        drift: DriftConfig,
        sink: Arc<dyn LifecycleEventSink>,
    ) -> Self {
        Self {
            config,
            guardrails,
            lineages: RwLock::new(HashMap::new()),
            index: RwLock::new(HashMap::new()),
            drift: Mutex::new(DriftDetector::new(drift)),
            sink,
        }
    }

    pub fn guardrails(&self) -> &GuardrailConfig {
        &self.guardrails
    }

    async fn lineage(&self, key: &TemplateKey) -> Arc<Mutex<Lineage>> {
        if let Some(l) = self.lineages.read().await.get(key) {
            return Arc::clone(l);
        }
        let mut lineages = self.lineages.write().await;
        Arc::clone(lineages.entry(key.clone()).or_default())
    }

    async fn lineage_of(&self, id: TemplateVersionId) -> Result<Arc<Mutex<Lineage>>> {
        let key = self
            .index
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(GovernorError::UnknownVersion(id))?;
        Ok(self.lineage(&key).await)
    }

    fn publish(&self, version: &TemplateVersion, from: Option<LifecycleState>, reason: TransitionReason, at: DateTime<Utc>) -> LifecycleEvent {
        let event = LifecycleEvent {
            version_id: version.id,
            key: version.key.clone(),
            version: version.version,
            from,
            to: version.state,
            reason,
            at,
        };
        info!(
            template = %event.key,
            version = event.version,
            from = ?event.from,
            to = %event.to,
            reason = %event.reason,
            "Template lifecycle transition"
        );
        self.sink.emit(&event);
        event
    }

    // ========================================================================
    // Registration and outcomes
    // ========================================================================

    /// Register a layer bundle. A bundle already known to the lineage
    /// returns its existing version; a new one becomes the next version as
    /// a candidate.
    pub async fn register_bundle(
        &self,
        key: &TemplateKey,
        layer_hashes: &[String],
        now: DateTime<Utc>,
    ) -> TemplateVersion {
        let bundle_hash = content_hash(layer_hashes.iter());
        let lineage = self.lineage(key).await;
        let mut lineage = lineage.lock().await;

        if let Some(existing) = lineage.versions.iter().find(|v| v.bundle_hash == bundle_hash) {
            return existing.clone();
        }

        let next = lineage.versions.iter().map(|v| v.version).max().unwrap_or(0) + 1;
        let version = TemplateVersion {
            id: Uuid::new_v4(),
            key: key.clone(),
            version: next,
            layer_hashes: layer_hashes.to_vec(),
            bundle_hash,
            state: LifecycleState::Candidate,
            sample_count: 0,
            created_at: now,
            promoted_at: None,
            deprecated_at: None,
        };
        self.index.write().await.insert(version.id, key.clone());
        lineage.versions.push(version.clone());
        self.publish(&version, None, TransitionReason::Registered, now);
        version
    }

    /// Record the final score of a run and feed per-language scores to
    /// drift monitoring. A candidate becomes eligible once it has enough
    /// samples.
    pub async fn record_outcome(
        &self,
        id: TemplateVersionId,
        score: f64,
        segment_scores: &[(SegmentKey, f64)],
        now: DateTime<Utc>,
    ) -> Result<OutcomeReport> {
        let lineage = self.lineage_of(id).await?;
        let mut lineage = lineage.lock().await;
        let history = self.config.score_history.max(1);
        let min_samples = self.config.min_samples_for_eligibility;

        let scores = lineage.scores.entry(id).or_default();
        scores.push_back(score.clamp(0.0, 1.0));
        while scores.len() > history {
            scores.pop_front();
        }

        let mut events = Vec::new();
        let version = lineage.get_mut(id).ok_or(GovernorError::UnknownVersion(id))?;
        version.sample_count += 1;
        let promote_to_eligible =
            version.state == LifecycleState::Candidate && version.sample_count >= min_samples;
        if promote_to_eligible {
            version.state = LifecycleState::Eligible;
        }
        let mut snapshot = version.clone();
        if promote_to_eligible {
            events.push(self.publish(
                &snapshot,
                Some(LifecycleState::Candidate),
                TransitionReason::MinimumSamples {
                    samples: snapshot.sample_count,
                },
                now,
            ));
        }

        let mut drift_alerts = Vec::new();
        {
            let mut drift = self.drift.lock().await;
            for (segment, s) in segment_scores {
                drift_alerts.extend(drift.observe(segment, Some(id), *s, now));
            }
        }

        if self.config.auto_deprecate_on_drift && snapshot.state == LifecycleState::Promoted {
            if let Some(alert) = drift_alerts.iter().find(|a| a.proposes_demotion) {
                let reason = TransitionReason::Drift {
                    alert_id: alert.id,
                    relative_drop: alert.relative_drop,
                };
                let (updated, event) = self.deprecate_locked(&mut lineage, id, reason, now)?;
                snapshot = updated;
                events.push(event);
            }
        }

        debug!(version_id = %id, samples = snapshot.sample_count, state = %snapshot.state, "Recorded outcome");
        Ok(OutcomeReport {
            version: snapshot,
            events,
            drift_alerts,
        })
    }

    // ========================================================================
    // Promotion
    // ========================================================================

    fn decide(&self, lineage: &Lineage, id: TemplateVersionId, feedback: Option<f64>, now: DateTime<Utc>) -> Result<PromotionDecision> {
        let version = lineage.get(id).ok_or(GovernorError::UnknownVersion(id))?;
        let scores: Vec<f64> = lineage
            .scores
            .get(&id)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        let input = PromotionInput {
            state: version.state,
            latest_quality: scores.last().copied().unwrap_or(0.0),
            aggregated_feedback: feedback,
            recent_scores: &scores,
            last_lineage_promotion: lineage.last_promotion_at,
            now,
        };
        Ok(guardrails::evaluate_promotion(&self.guardrails, &input))
    }

    /// Read-only guardrail check for `id`.
    pub async fn evaluate_promotion(
        &self,
        id: TemplateVersionId,
        aggregated_feedback: Option<f64>,
        now: DateTime<Utc>,
    ) -> Result<PromotionDecision> {
        let lineage = self.lineage_of(id).await?;
        let lineage = lineage.lock().await;
        self.decide(&lineage, id, aggregated_feedback, now)
    }

    /// Evaluate guardrails and, when they pass, promote `id` and deprecate
    /// the previously promoted version of the lineage. The decision is
    /// re-evaluated under the lineage lock, so two concurrent attempts
    /// cannot both commit within one cooldown.
    pub async fn try_promote(
        &self,
        id: TemplateVersionId,
        aggregated_feedback: Option<f64>,
        now: DateTime<Utc>,
    ) -> Result<PromotionDecision> {
        let lineage = self.lineage_of(id).await?;
        let mut lineage = lineage.lock().await;
        let decision = self.decide(&lineage, id, aggregated_feedback, now)?;
        lineage.attempts.push(PromotionAttempt {
            version_id: id,
            at: now,
            decision: decision.clone(),
        });

        let combined_score = match &decision {
            PromotionDecision::Approved { combined_score, .. } => *combined_score,
            PromotionDecision::Rejected { reason } => {
                debug!(version_id = %id, code = reason.code(), reason = %reason, "Promotion rejected");
                return Ok(decision);
            }
        };

        let previous: Vec<TemplateVersionId> = lineage
            .versions
            .iter()
            .filter(|v| v.state == LifecycleState::Promoted && v.id != id)
            .map(|v| v.id)
            .collect();
        for old in previous {
            self.deprecate_locked(&mut lineage, old, TransitionReason::Superseded { by: id }, now)?;
        }

        let version = lineage.get_mut(id).ok_or(GovernorError::UnknownVersion(id))?;
        let from = version.state;
        version.state = LifecycleState::Promoted;
        version.promoted_at = Some(now);
        let snapshot = version.clone();
        lineage.last_promotion_at = Some(now);
        self.publish(
            &snapshot,
            Some(from),
            TransitionReason::GuardrailApproved { combined_score },
            now,
        );
        Ok(decision)
    }

    fn deprecate_locked(
        &self,
        lineage: &mut Lineage,
        id: TemplateVersionId,
        reason: TransitionReason,
        now: DateTime<Utc>,
    ) -> Result<(TemplateVersion, LifecycleEvent)> {
        let version = lineage.get_mut(id).ok_or(GovernorError::UnknownVersion(id))?;
        if version.state == LifecycleState::Deprecated {
            return Err(GovernorError::InvalidTransition {
                version: id,
                from: version.state,
                to: LifecycleState::Deprecated,
            });
        }
        let from = version.state;
        version.state = LifecycleState::Deprecated;
        version.deprecated_at = Some(now);
        let snapshot = version.clone();
        let event = self.publish(&snapshot, Some(from), reason, now);
        Ok((snapshot, event))
    }

    /// Deprecate a version. Deprecated versions stay queryable.
    pub async fn deprecate(
        &self,
        id: TemplateVersionId,
        reason: TransitionReason,
        now: DateTime<Utc>,
    ) -> Result<TemplateVersion> {
        let lineage = self.lineage_of(id).await?;
        let mut lineage = lineage.lock().await;
        self.deprecate_locked(&mut lineage, id, reason, now)
            .map(|(version, _)| version)
    }

    /// Apply a drift alert's demotion proposal. Returns the deprecated
    /// version, or `None` when the alert proposes nothing or the version is
    /// no longer promoted.
    pub async fn apply_drift_alert(
        &self,
        alert: &DriftAlert,
        now: DateTime<Utc>,
    ) -> Result<Option<TemplateVersion>> {
        let Some(id) = alert.version_id.filter(|_| alert.proposes_demotion) else {
            return Ok(None);
        };
        let lineage = self.lineage_of(id).await?;
        let mut lineage = lineage.lock().await;
        if lineage.get(id).map(|v| v.state) != Some(LifecycleState::Promoted) {
            return Ok(None);
        }
        warn!(version_id = %id, segment = %alert.segment, "Demoting template after drift");
        let reason = TransitionReason::Drift {
            alert_id: alert.id,
            relative_drop: alert.relative_drop,
        };
        self.deprecate_locked(&mut lineage, id, reason, now)
            .map(|(version, _)| Some(version))
    }

    /// Restore an earlier promoted version of `key` as the active one.
    ///
    /// The current promoted version, if any, is deprecated as superseded.
    /// Guardrails are not consulted, but the rollback starts a new cooldown.
    /// Only versions that have been promoted before can be restored.
    pub async fn rollback(
        &self,
        key: &TemplateKey,
        target_version: u32,
        note: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<TemplateVersion> {
        let unknown = || GovernorError::UnknownLineageVersion {
            key: key.clone(),
            version: target_version,
        };
        let lineage = self.lineages.read().await.get(key).cloned().ok_or_else(unknown)?;
        let mut lineage = lineage.lock().await;
        let target = lineage
            .versions
            .iter()
            .find(|v| v.version == target_version)
            .ok_or_else(unknown)?;
        let id = target.id;
        if target.state == LifecycleState::Promoted || target.promoted_at.is_none() {
            return Err(GovernorError::InvalidTransition {
                version: id,
                from: target.state,
                to: LifecycleState::Promoted,
            });
        }

        let current: Vec<TemplateVersionId> = lineage
            .versions
            .iter()
            .filter(|v| v.state == LifecycleState::Promoted)
            .map(|v| v.id)
            .collect();
        for old in current {
            self.deprecate_locked(&mut lineage, old, TransitionReason::Superseded { by: id }, now)?;
        }

        let version = lineage.get_mut(id).ok_or(GovernorError::UnknownVersion(id))?;
        let from = version.state;
        version.state = LifecycleState::Promoted;
        version.promoted_at = Some(now);
        version.deprecated_at = None;
        let snapshot = version.clone();
        lineage.last_promotion_at = Some(now);
        warn!(template = %key, version = target_version, "Rolling back template");
        self.publish(
            &snapshot,
            Some(from),
            TransitionReason::Rollback { note: note.into() },
            now,
        );
        Ok(snapshot)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub async fn version(&self, id: TemplateVersionId) -> Option<TemplateVersion> {
        let lineage = self.lineage_of(id).await.ok()?;
        let lineage = lineage.lock().await;
        lineage.get(id).cloned()
    }

    /// All versions of a lineage, oldest first.
    pub async fn versions(&self, key: &TemplateKey) -> Vec<TemplateVersion> {
        let lineage = self.lineages.read().await.get(key).cloned();
        match lineage {
            Some(l) => l.lock().await.versions.clone(),
            None => Vec::new(),
        }
    }

    /// The promoted version of a lineage, if any.
    pub async fn active_version(&self, key: &TemplateKey) -> Option<TemplateVersion> {
        self.versions(key)
            .await
            .into_iter()
            .find(|v| v.state == LifecycleState::Promoted)
    }

    pub async fn promotion_history(&self, key: &TemplateKey) -> Vec<PromotionAttempt> {
        let lineage = self.lineages.read().await.get(key).cloned();
        match lineage {
            Some(l) => l.lock().await.attempts.clone(),
            None => Vec::new(),
        }
    }

    pub async fn drift_alerts(&self) -> Vec<DriftAlert> {
        self.drift.lock().await.alerts().to_vec()
    }

    pub async fn drift_summary(&self) -> DriftSummary {
        self.drift.lock().await.summary()
    }

    pub async fn segment_stats(&self, segment: &SegmentKey) -> Option<SegmentStats> {
        self.drift.lock().await.segment_stats(segment)
    }

    // ========================================================================
    // Export / import
    // ========================================================================

    /// Every known version as JSON, grouped by lineage.
    pub async fn export_json(&self) -> Result<String> {
        let lineages: Vec<Arc<Mutex<Lineage>>> =
            self.lineages.read().await.values().cloned().collect();
        let mut versions = Vec::new();
        for l in lineages {
            versions.extend(l.lock().await.versions.iter().cloned());
        }
        versions.sort_by(|a, b| a.key.cmp(&b.key).then(a.version.cmp(&b.version)));
        serde_json::to_string_pretty(&versions).map_err(|e| GovernorError::Serialization(e.to_string()))
    }

    /// Restore versions exported by [`Self::export_json`]. No lifecycle
    /// events are emitted. The whole batch is checked before anything is
    /// stored: known or repeated ids, bundles already present in a lineage
    /// and a second promoted version in one lineage reject the import
    /// without side effects.
    pub async fn import_json(&self, json: &str) -> Result<usize> {
        let versions: Vec<TemplateVersion> =
            serde_json::from_str(json).map_err(|e| GovernorError::Serialization(e.to_string()))?;

        let mut ids = HashSet::new();
        let mut batch: BTreeMap<TemplateKey, Vec<TemplateVersion>> = BTreeMap::new();
        for v in versions {
            if !ids.insert(v.id) {
                return Err(GovernorError::ImportConflict(format!("version {} listed twice", v.id)));
            }
            batch.entry(v.key.clone()).or_default().push(v);
        }

        // Lineages are locked in key order for the whole check-and-commit.
        let mut handles = Vec::with_capacity(batch.len());
        for key in batch.keys() {
            handles.push(self.lineage(key).await);
        }
        let mut guards = Vec::with_capacity(handles.len());
        for handle in &handles {
            guards.push(handle.lock().await);
        }

        {
            let index = self.index.read().await;
            if let Some(id) = ids.iter().find(|id| index.contains_key(*id)) {
                return Err(GovernorError::ImportConflict(format!("version {id} already exists")));
            }
        }
        for ((key, incoming), lineage) in batch.iter().zip(&guards) {
            check_import(lineage, key, incoming)?;
        }

        let mut index = self.index.write().await;
        let mut imported = 0;
        for ((key, incoming), lineage) in batch.into_iter().zip(guards.iter_mut()) {
            for v in incoming {
                if let Some(at) = v.promoted_at {
                    lineage.last_promotion_at = Some(lineage.last_promotion_at.map_or(at, |l| l.max(at)));
                }
                index.insert(v.id, key.clone());
                lineage.versions.push(v);
                imported += 1;
            }
            lineage.versions.sort_by_key(|v| v.version);
        }
        debug!(imported, "Imported template versions");
        Ok(imported)
    }
}

fn check_import(lineage: &Lineage, key: &TemplateKey, incoming: &[TemplateVersion]) -> Result<()> {
    let mut bundles: HashSet<&str> = lineage.versions.iter().map(|v| v.bundle_hash.as_str()).collect();
    let mut numbers: HashSet<u32> = lineage.versions.iter().map(|v| v.version).collect();
    let mut promoted = lineage
        .versions
        .iter()
        .filter(|v| v.state == LifecycleState::Promoted)
        .count();

    for v in incoming {
        if !bundles.insert(v.bundle_hash.as_str()) {
            return Err(GovernorError::ImportConflict(format!(
                "bundle {} already registered for {key}",
                v.bundle_hash
            )));
        }
        if !numbers.insert(v.version) {
            return Err(GovernorError::ImportConflict(format!(
                "version number {} already used in {key}",
                v.version
            )));
        }
        if v.state == LifecycleState::Promoted {
            promoted += 1;
        }
    }
    if promoted > 1 {
        return Err(GovernorError::ImportConflict(format!(
            "lineage {key} would have more than one promoted version"
        )));
    }
    Ok(())
}
