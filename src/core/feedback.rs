//! Append-only feedback log
//!
//! One partition per template version. A run appends all of its records in a
//! single batch under the partition lock, so readers see either the whole
//! run or none of it. Records are never updated or removed; user ratings
//! arrive as new records referencing a prompt hash.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::core::cost::RunCost;
use crate::core::evaluation::EvaluationResult;
use crate::core::generation::SplitFallback;
use crate::core::lifecycle::TemplateVersionId;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FeedbackError {
    #[error("Feedback batch is empty")]
    EmptyBatch,

    #[error("Record {record} belongs to version {found}, batch targets {expected}")]
    VersionMismatch {
        record: Uuid,
        expected: TemplateVersionId,
        found: TemplateVersionId,
    },

    #[error("Rating must be between 1 and 5, got {0}")]
    InvalidRating(u8),

    #[error("Feedback storage failed: {0}")]
    Storage(String),
}

// ============================================================================
// Records
// ============================================================================

/// User rating on a 1-5 scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Rating(u8);

impl Rating {
    pub fn new(value: u8) -> Result<Self, FeedbackError> {
        if (1..=5).contains(&value) {
            Ok(Self(value))
        } else {
            Err(FeedbackError::InvalidRating(value))
        }
    }

    pub fn value(&self) -> u8 {
        self.0
    }

    /// Rating mapped onto `[0, 1]`.
    pub fn normalized(&self) -> f64 {
        f64::from(self.0 - 1) / 4.0
    }
}

impl TryFrom<u8> for Rating {
    type Error = FeedbackError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Rating::new(value)
    }
}

impl From<Rating> for u8 {
    fn from(rating: Rating) -> Self {
        rating.0
    }
}

/// Which side of an A/B comparison produced an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Branch {
    Original,
    Refined,
}

/// How an attempt ended up in the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptDisposition {
    /// Returned as the run's result.
    Final,
    /// Replaced by a later or better attempt.
    Superseded,
    /// Losing side of an A/B comparison.
    Discarded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum FeedbackKind {
    Attempt {
        attempt: u32,
        branch: Branch,
        disposition: AttemptDisposition,
        evaluation: EvaluationResult,
        cost: RunCost,
        fallback: Option<SplitFallback>,
    },
    Rating {
        rating: Rating,
        comment: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub id: Uuid,
    pub template_version: TemplateVersionId,
    pub prompt_hash: String,
    pub request_id: String,
    pub recorded_at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: FeedbackKind,
}

impl FeedbackRecord {
    pub fn rating(
        template_version: TemplateVersionId,
        prompt_hash: impl Into<String>,
        request_id: impl Into<String>,
        rating: Rating,
        comment: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            template_version,
            prompt_hash: prompt_hash.into(),
            request_id: request_id.into(),
            recorded_at: Utc::now(),
            kind: FeedbackKind::Rating { rating, comment },
        }
    }

    pub fn evaluation(&self) -> Option<&EvaluationResult> {
        match &self.kind {
            FeedbackKind::Attempt { evaluation, .. } => Some(evaluation),
            FeedbackKind::Rating { .. } => None,
        }
    }

    pub fn is_final_attempt(&self) -> bool {
        matches!(
            self.kind,
            FeedbackKind::Attempt {
                disposition: AttemptDisposition::Final,
                ..
            }
        )
    }
}

// ============================================================================
// Log
// ============================================================================

/// Destination of feedback records. Persistence backends implement this.
#[async_trait]
pub trait FeedbackLog: Send + Sync {
    /// Append all records atomically to the partition of `version`.
    async fn append_batch(
        &self,
        version: TemplateVersionId,
        records: Vec<FeedbackRecord>,
    ) -> Result<(), FeedbackError>;

    /// Mean normalised rating for `version`, if any ratings exist.
    async fn aggregated_feedback(&self, version: TemplateVersionId) -> Option<f64>;
}

type Partition = Arc<Mutex<Vec<FeedbackRecord>>>;

/// In-process feedback log. Appends to different versions never contend.
#[derive(Debug, Default)]
pub struct InMemoryFeedbackLog {
    partitions: RwLock<HashMap<TemplateVersionId, Partition>>,
}

impl InMemoryFeedbackLog {
    pub fn new() -> Self {
        Self::default()
    }

    async fn partition(&self, version: TemplateVersionId) -> Partition {
        if let Some(p) = self.partitions.read().await.get(&version) {
            return Arc::clone(p);
        }
        let mut partitions = self.partitions.write().await;
        Arc::clone(partitions.entry(version).or_default())
    }

    /// Snapshot of all records for `version`, in append order.
    pub async fn records(&self, version: TemplateVersionId) -> Vec<FeedbackRecord> {
        let partition = self.partitions.read().await.get(&version).cloned();
        match partition {
            Some(p) => p.lock().await.clone(),
            None => Vec::new(),
        }
    }

    pub async fn len(&self) -> usize {
        let partitions: Vec<Partition> = self.partitions.read().await.values().cloned().collect();
        let mut total = 0;
        for p in partitions {
            total += p.lock().await.len();
        }
        total
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Combined scores of the final attempts of `version`, oldest first.
    pub async fn final_scores(&self, version: TemplateVersionId) -> Vec<f64> {
        self.records(version)
            .await
            .iter()
            .filter(|r| r.is_final_attempt())
            .filter_map(|r| r.evaluation().map(|e| e.combined_score))
            .collect()
    }

    /// Append a user rating for a prompt hash of `version`.
    pub async fn rate(
        &self,
        version: TemplateVersionId,
        prompt_hash: &str,
        request_id: &str,
        rating: Rating,
        comment: Option<String>,
    ) -> Result<(), FeedbackError> {
        let record = FeedbackRecord::rating(version, prompt_hash, request_id, rating, comment);
        self.append_batch(version, vec![record]).await
    }
}

#[async_trait]
impl FeedbackLog for InMemoryFeedbackLog {
    async fn append_batch(
        &self,
        version: TemplateVersionId,
        records: Vec<FeedbackRecord>,
    ) -> Result<(), FeedbackError> {
        if records.is_empty() {
            return Err(FeedbackError::EmptyBatch);
        }
        if let Some(r) = records.iter().find(|r| r.template_version != version) {
            return Err(FeedbackError::VersionMismatch {
                record: r.id,
                expected: version,
                found: r.template_version,
            });
        }
        let partition = self.partition(version).await;
        partition.lock().await.extend(records);
        Ok(())
    }

    async fn aggregated_feedback(&self, version: TemplateVersionId) -> Option<f64> {
        let ratings: Vec<f64> = self
            .records(version)
            .await
            .iter()
            .filter_map(|r| match &r.kind {
                FeedbackKind::Rating { rating, .. } => Some(rating.normalized()),
                FeedbackKind::Attempt { .. } => None,
            })
            .collect();
        if ratings.is_empty() {
            None
        } else {
            Some(ratings.iter().sum::<f64>() / ratings.len() as f64)
        }
    }
}
