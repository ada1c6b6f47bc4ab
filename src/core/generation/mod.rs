//! Text-generation boundary
//!
//! The engine talks to two logical services: `primary` drafts chapters and
//! `refinement` optionally rewrites prompts. Both sit behind
//! [`TextGenerationService`]; concrete HTTP clients live outside this crate.
//! [`ResilientService`] adds timeouts and bounded retry with backoff.

mod error;
mod split;
mod transport;

pub use error::{GenerationError, Result};
pub use split::{split_output, SplitFallback, SplitOutcome};
pub use transport::{ResilientService, ServiceCall, TransportConfig};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::cost::{ProviderPricing, TokenUsage};
use crate::core::evaluation::word_count;

// ============================================================================
// Service contract
// ============================================================================

/// Sampling parameters sent with every call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 4096,
        }
    }
}

/// Prompt text plus parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRequest {
    pub prompt: String,
    pub params: GenerationParams,
}

impl ServiceRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            params: GenerationParams::default(),
        }
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.params.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.params.max_tokens = max_tokens;
        self
    }
}

/// Raw text plus token counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceResponse {
    pub text: String,
    pub usage: TokenUsage,
}

impl ServiceResponse {
    pub fn new(text: impl Into<String>, usage: TokenUsage) -> Self {
        Self {
            text: text.into(),
            usage,
        }
    }
}

/// A text-generation endpoint. Implementations must surface failures as
/// [`GenerationError`] values and never swallow them.
#[async_trait]
pub trait TextGenerationService: Send + Sync {
    /// Provider identifier used for pricing (e.g. "openai", "claude")
    fn id(&self) -> &str;

    /// Model being used
    fn model(&self) -> &str;

    /// Pricing for this provider/model, when the service knows it
    fn pricing(&self) -> Option<ProviderPricing> {
        ProviderPricing::for_model(self.id(), self.model())
    }

    async fn generate(&self, request: ServiceRequest) -> Result<ServiceResponse>;
}

// ============================================================================
// Generation results
// ============================================================================

/// Text of one output language.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageSection {
    pub language: String,
    pub text: String,
    pub word_count: usize,
}

impl LanguageSection {
    pub fn new(language: &str, text: &str) -> Self {
        Self {
            language: language.to_string(),
            text: text.to_string(),
            word_count: word_count(text),
        }
    }
}

/// Output of one primary call, split per language. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub prompt_hash: String,
    pub sections: Vec<LanguageSection>,
    pub usage: TokenUsage,
    pub cost_usd: f64,
    pub provider_id: String,
    pub model_id: String,
    pub fallback: Option<SplitFallback>,
    pub transport_attempts: u32,
    pub latency_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl GenerationResult {
    pub fn new(
        prompt_hash: impl Into<String>,
        sections: Vec<LanguageSection>,
        usage: TokenUsage,
        cost_usd: f64,
    ) -> Self {
        Self {
            prompt_hash: prompt_hash.into(),
            sections,
            usage,
            cost_usd,
            provider_id: String::new(),
            model_id: String::new(),
            fallback: None,
            transport_attempts: 1,
            latency_ms: 0,
            created_at: Utc::now(),
        }
    }

    pub fn section(&self, language: &str) -> Option<&LanguageSection> {
        self.sections.iter().find(|s| s.language == language)
    }

    pub fn total_words(&self) -> usize {
        self.sections.iter().map(|s| s.word_count).sum()
    }
}
