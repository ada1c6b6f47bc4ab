//! Common Test Utilities
//!
//! Scripted text-generation services, a deterministic scorer and request
//! fixtures shared by the integration and property tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::core::composition::DEFAULT_LANGUAGE_DELIMITER;
use crate::core::cost::{ProviderPricing, TokenUsage};
use crate::core::evaluation::{
    DimensionScore, EvaluationConfig, Evaluator, QualityDimension, ScoringContext, ScoringStrategy,
    TextStats,
};
use crate::core::generation::{
    GenerationError, Result, ServiceRequest, ServiceResponse, TextGenerationService, TransportConfig,
};
use crate::core::request::GenerationRequest;

/// Word that makes [`MarkerScorer`] score a section low.
pub const WEAK_MARKER: &str = "weak";
pub const STRONG_SCORE: f64 = 0.95;
pub const WEAK_SCORE: f64 = 0.3;
/// Word that makes [`MarkerScorer`] score a section as passing but not strong.
pub const FAIR_MARKER: &str = "fair";
pub const FAIR_SCORE: f64 = 0.8;

// ============================================================================
// Scripted service
// ============================================================================

/// Replays queued responses in order, then repeats the fallback text.
pub struct ScriptedService {
    id: String,
    model: String,
    script: Mutex<VecDeque<Result<ServiceResponse>>>,
    fallback: String,
    prompts: Mutex<Vec<String>>,
    calls: AtomicU32,
    delay: Duration,
}

impl ScriptedService {
    pub fn new(fallback: impl Into<String>) -> Self {
        Self {
            id: "scripted".to_string(),
            model: "scripted-1".to_string(),
            script: Mutex::new(VecDeque::new()),
            fallback: fallback.into(),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicU32::new(0),
            delay: Duration::ZERO,
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = id.to_string();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn then_text(self, text: impl Into<String>) -> Self {
        self.push(Ok(ServiceResponse::new(text, usage())));
        self
    }

    pub fn then_error(self, error: GenerationError) -> Self {
        self.push(Err(error));
        self
    }

    fn push(&self, entry: Result<ServiceResponse>) {
        self.script
            .lock()
            .expect("script lock poisoned")
            .push_back(entry);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompt lock poisoned").clone()
    }
}

#[async_trait]
impl TextGenerationService for ScriptedService {
    fn id(&self) -> &str {
        &self.id
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn pricing(&self) -> Option<ProviderPricing> {
        Some(ProviderPricing::new(&self.id, &self.model, 1.0, 2.0))
    }

    async fn generate(&self, request: ServiceRequest) -> Result<ServiceResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts
            .lock()
            .expect("prompt lock poisoned")
            .push(request.prompt.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.script.lock().expect("script lock poisoned").pop_front();
        next.unwrap_or_else(|| Ok(ServiceResponse::new(self.fallback.clone(), usage())))
    }
}

/// 1000 prompt tokens and 2000 completion tokens; $0.005 at scripted pricing.
pub fn usage() -> TokenUsage {
    TokenUsage::new(1000, 2000)
}

pub const CALL_COST_USD: f64 = 0.005;

// ============================================================================
// Deterministic scoring
// ============================================================================

/// Scores a dimension high unless the section contains [`WEAK_MARKER`].
#[derive(Debug)]
pub struct MarkerScorer(pub QualityDimension);

impl ScoringStrategy for MarkerScorer {
    fn dimension(&self) -> QualityDimension {
        self.0
    }

    fn score(&self, text: &TextStats, _ctx: &ScoringContext<'_>) -> DimensionScore {
        let weak = text.words.iter().any(|w| w == WEAK_MARKER);
        let fair = text.words.iter().any(|w| w == FAIR_MARKER);
        let score = match (weak, fair) {
            (true, _) => WEAK_SCORE,
            (false, true) => FAIR_SCORE,
            (false, false) => STRONG_SCORE,
        };
        DimensionScore {
            dimension: self.0,
            score,
            measured: if weak { 1.0 } else { 0.0 },
            detail: "scripted".to_string(),
        }
    }
}

/// Evaluator whose scores depend only on [`WEAK_MARKER`] and constraint hits.
pub fn marker_evaluator() -> Evaluator {
    QualityDimension::ALL
        .iter()
        .fold(Evaluator::new(EvaluationConfig::default()), |e, d| {
            e.with_strategy(Box::new(MarkerScorer(*d)))
        })
}

/// Transport settings that fail fast.
pub fn fast_transport() -> TransportConfig {
    TransportConfig {
        request_timeout_secs: 5,
        max_attempts: 1,
        base_delay_ms: 1,
        max_delay_ms: 5,
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn chapter_request(request_id: &str, chapter: u32) -> GenerationRequest {
    GenerationRequest::new(request_id, "project-1", chapter, "early_reader", "adventure", "courage")
        .with_languages(["en"])
}

pub fn bilingual_request(request_id: &str, chapter: u32) -> GenerationRequest {
    GenerationRequest::new(request_id, "project-1", chapter, "early_reader", "adventure", "courage")
        .with_languages(["de", "en"])
}

pub const GOOD_EN: &str = "Tom found a lantern in the attic.\n\nHe carried it down the stairs and smiled.";
pub const GOOD_DE: &str = "Tom fand eine Laterne auf dem Dachboden.\n\nEr trug sie die Treppe hinunter.";
pub const WEAK_EN: &str = "Tom was weak and the story was weak.";
pub const FAIR_EN: &str = "Tom found a fair lantern in the attic.\n\nHe carried it down.";
pub const FAIR_DE: &str = "Tom fand eine fair gebaute Laterne.\n\nEr trug sie hinunter.";

pub fn bilingual_text(de: &str, en: &str) -> String {
    format!("{de}\n{DEFAULT_LANGUAGE_DELIMITER}\n{en}")
}

pub fn scripted(fallback: &str) -> Arc<ScriptedService> {
    Arc::new(ScriptedService::new(fallback))
}
