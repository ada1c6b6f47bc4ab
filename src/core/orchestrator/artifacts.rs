//! Per-run artifacts handed to the storage layer.
//!
//! For chapter `n` a run produces `chapter_NN_<lang>.txt` per language, a
//! `chapter_NN_bilingual.txt` when the prompt was bilingual, and
//! `chapter_NN_meta.json` with hashes, scores, flags and costs.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::RunOutcome;
use crate::core::cost::ServiceRole;
use crate::core::evaluation::EvaluationResult;
use crate::core::generation::SplitFallback;
use crate::core::lifecycle::TemplateVersionId;

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostSummary {
    pub total_usd: f64,
    pub primary_usd: f64,
    pub refinement_usd: f64,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub calls: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub request_id: String,
    pub project_id: String,
    pub chapter_number: u32,
    pub prompt_hash: String,
    pub template_version_id: TemplateVersionId,
    pub template_version: u32,
    pub languages: Vec<String>,
    pub word_counts: Vec<(String, usize)>,
    pub evaluation: EvaluationResult,
    pub review_required: bool,
    pub critical: bool,
    pub attempts: u32,
    pub fallback: Option<SplitFallback>,
    pub cost: CostSummary,
    pub provider_id: String,
    pub model_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactFile {
    pub file_name: String,
    pub contents: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunArtifacts {
    pub files: Vec<ArtifactFile>,
    pub metadata: RunMetadata,
}

impl RunArtifacts {
    pub fn from_outcome(outcome: &RunOutcome) -> Result<Self, ArtifactError> {
        let chapter = outcome.chapter_number;
        let result = &outcome.result;
        let usage = outcome.cost.total_usage();

        let metadata = RunMetadata {
            request_id: outcome.request_id.clone(),
            project_id: outcome.project_id.clone(),
            chapter_number: chapter,
            prompt_hash: outcome.prompt.hash().to_string(),
            template_version_id: outcome.template_version.id,
            template_version: outcome.template_version.version,
            languages: outcome.prompt.languages().to_vec(),
            word_counts: result
                .sections
                .iter()
                .map(|s| (s.language.clone(), s.word_count))
                .collect(),
            evaluation: outcome.evaluation.clone(),
            review_required: outcome.review_required,
            critical: outcome.critical,
            attempts: outcome.attempts,
            fallback: result.fallback.clone(),
            cost: CostSummary {
                total_usd: outcome.cost.total_usd(),
                primary_usd: outcome.cost.by_role(ServiceRole::Primary),
                refinement_usd: outcome.cost.by_role(ServiceRole::Refinement),
                input_tokens: usage.input_tokens,
                output_tokens: usage.output_tokens,
                calls: outcome.cost.calls.len(),
            },
            provider_id: result.provider_id.clone(),
            model_id: result.model_id.clone(),
            created_at: result.created_at,
        };

        let mut files: Vec<ArtifactFile> = result
            .sections
            .iter()
            .map(|s| ArtifactFile {
                file_name: format!("chapter_{chapter:02}_{}.txt", s.language),
                contents: s.text.clone(),
            })
            .collect();

        if outcome.prompt.is_bilingual() {
            let combined = result
                .sections
                .iter()
                .map(|s| format!("## {}\n\n{}", s.language.to_uppercase(), s.text))
                .collect::<Vec<_>>()
                .join("\n\n---\n\n");
            files.push(ArtifactFile {
                file_name: format!("chapter_{chapter:02}_bilingual.txt"),
                contents: combined,
            });
        }

        files.push(ArtifactFile {
            file_name: format!("chapter_{chapter:02}_meta.json"),
            contents: serde_json::to_string_pretty(&metadata)?,
        });

        Ok(Self { files, metadata })
    }

    pub fn file(&self, file_name: &str) -> Option<&ArtifactFile> {
        self.files.iter().find(|f| f.file_name == file_name)
    }

    /// Write every file into `dir`, creating it if needed.
    pub async fn write_to(&self, dir: &Path) -> Result<Vec<PathBuf>, ArtifactError> {
        tokio::fs::create_dir_all(dir).await?;
        let mut written = Vec::with_capacity(self.files.len());
        for file in &self.files {
            let path = dir.join(&file.file_name);
            tokio::fs::write(&path, &file.contents).await?;
            written.push(path);
        }
        tracing::debug!(dir = %dir.display(), files = written.len(), "Wrote run artifacts");
        Ok(written)
    }
}
