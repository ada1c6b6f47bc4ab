//! Profile & Layer Store
//!
//! Weighted prompt layers and the audience profiles that parameterise
//! scoring. Everything here is immutable once built; a [`ProfileStore`]
//! hands out `Arc<ProfileSnapshot>` values and swaps them on explicit reload.

mod defaults;
mod store;

pub use defaults::builtin_snapshot;
pub use store::{LayerLookup, ProfileDocument, ProfileSnapshot, ProfileStore};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::hashing::content_hash;

/// Profile key every layer type must provide.
pub const DEFAULT_PROFILE_KEY: &str = "default";

// ============================================================================
// Errors
// ============================================================================

/// Errors raised while loading or reloading profile documents.
#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("Failed to parse profile document: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid layer '{layer_type}/{profile_key}': {reason}")]
    InvalidLayer {
        layer_type: String,
        profile_key: String,
        reason: String,
    },

    #[error("Invalid audience profile '{key}': {reason}")]
    InvalidAudience { key: String, reason: String },

    #[error("Invalid topic pattern '{pattern}' in marker '{topic}': {source}")]
    InvalidPattern {
        topic: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

// ============================================================================
// Layers
// ============================================================================

/// The kind of prompt fragment a layer contributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerType {
    SystemNote,
    Audience,
    Genre,
    Emotion,
    Style,
    NarrativeContext,
    Constraints,
    Language,
}

impl LayerType {
    /// Merge order of a compiled prompt. Later layers may refer to entities
    /// introduced by earlier ones.
    pub const MERGE_ORDER: [LayerType; 8] = [
        LayerType::SystemNote,
        LayerType::Audience,
        LayerType::Genre,
        LayerType::Emotion,
        LayerType::Style,
        LayerType::NarrativeContext,
        LayerType::Constraints,
        LayerType::Language,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LayerType::SystemNote => "system_note",
            LayerType::Audience => "audience",
            LayerType::Genre => "genre",
            LayerType::Emotion => "emotion",
            LayerType::Style => "style",
            LayerType::NarrativeContext => "narrative_context",
            LayerType::Constraints => "constraints",
            LayerType::Language => "language",
        }
    }

    /// Section heading used when the layer is rendered into a prompt.
    pub fn heading(&self) -> &'static str {
        match self {
            LayerType::SystemNote => "ROLE",
            LayerType::Audience => "TARGET AUDIENCE",
            LayerType::Genre => "GENRE",
            LayerType::Emotion => "CORE EMOTION",
            LayerType::Style => "STYLE",
            LayerType::NarrativeContext => "STORY CONTEXT",
            LayerType::Constraints => "CONSTRAINTS",
            LayerType::Language => "LANGUAGE & OUTPUT",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        LayerType::MERGE_ORDER
            .into_iter()
            .find(|t| t.as_str() == value)
    }
}

impl std::fmt::Display for LayerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named, weighted, content-hashed prompt fragment.
///
/// Fields are private so the hash can never disagree with the content.
/// Derived layers (request data folded in, summarised content) are new
/// values built through [`Layer::derive`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Layer {
    layer_type: LayerType,
    profile_key: String,
    name: String,
    content: String,
    weight: f32,
    hash: String,
}

impl Layer {
    pub fn new(
        layer_type: LayerType,
        profile_key: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
        weight: f32,
    ) -> Self {
        let profile_key = profile_key.into();
        let name = name.into();
        let content = content.into();
        let weight = if weight.is_finite() {
            weight.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let hash = Self::compute_hash(layer_type, &profile_key, weight, &content);
        Self {
            layer_type,
            profile_key,
            name,
            content,
            weight,
            hash,
        }
    }

    fn compute_hash(layer_type: LayerType, profile_key: &str, weight: f32, content: &str) -> String {
        content_hash([
            layer_type.as_str(),
            profile_key,
            &format!("{:.4}", weight),
            content,
        ])
    }

    /// Same identity, new content (and therefore a new hash).
    pub fn derive(&self, content: impl Into<String>) -> Self {
        Self::new(
            self.layer_type,
            self.profile_key.clone(),
            self.name.clone(),
            content,
            self.weight,
        )
    }

    pub fn layer_type(&self) -> LayerType {
        self.layer_type
    }

    pub fn profile_key(&self) -> &str {
        &self.profile_key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn weight(&self) -> f32 {
        self.weight
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn is_default(&self) -> bool {
        self.profile_key == DEFAULT_PROFILE_KEY
    }
}

// ============================================================================
// Audience Profiles
// ============================================================================

/// Inclusive numeric band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Band<T> {
    pub min: T,
    pub max: T,
}

impl<T: PartialOrd + Copy> Band<T> {
    pub fn new(min: T, max: T) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: T) -> bool {
        value >= self.min && value <= self.max
    }

    pub fn is_valid(&self) -> bool {
        self.min <= self.max
    }
}

/// Measurable thresholds a chapter for this audience should meet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudienceThresholds {
    /// Acceptable word count per language section.
    pub word_band: Band<u32>,
    /// Word count the prompt asks for when the request sets none.
    pub target_words: u32,
    /// Minimum share of sentences carrying an emotion keyword.
    pub min_emotion_ratio: f64,
    /// Maximum share of repeated three-word phrases.
    pub max_repetition_ratio: f64,
    /// Average words per sentence.
    pub sentence_length: Band<f64>,
    /// Paragraphs per language section.
    pub paragraph_count: Band<u32>,
}

impl Default for AudienceThresholds {
    fn default() -> Self {
        Self {
            word_band: Band::new(600, 1000),
            target_words: 800,
            min_emotion_ratio: 0.2,
            max_repetition_ratio: 0.1,
            sentence_length: Band::new(8.0, 18.0),
            paragraph_count: Band::new(4, 12),
        }
    }
}

/// Relative weights of the quality dimensions for one audience.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DimensionWeights {
    pub word_limit: f64,
    pub core_emotion: f64,
    pub repetition: f64,
    pub readability: f64,
    pub structure: f64,
}

impl Default for DimensionWeights {
    fn default() -> Self {
        Self {
            word_limit: 0.25,
            core_emotion: 0.20,
            repetition: 0.15,
            readability: 0.20,
            structure: 0.20,
        }
    }
}

impl DimensionWeights {
    pub fn total(&self) -> f64 {
        self.word_limit + self.core_emotion + self.repetition + self.readability + self.structure
    }

    /// Weights rescaled to sum to one. Falls back to the defaults when the
    /// configured weights are unusable (negative, NaN or all zero).
    pub fn normalized(&self) -> Self {
        let all = [
            self.word_limit,
            self.core_emotion,
            self.repetition,
            self.readability,
            self.structure,
        ];
        let total = self.total();
        if all.iter().any(|w| !w.is_finite() || *w < 0.0) || total <= f64::EPSILON {
            return Self::default().normalized_unchecked();
        }
        self.normalized_unchecked()
    }

    fn normalized_unchecked(&self) -> Self {
        let total = self.total();
        Self {
            word_limit: self.word_limit / total,
            core_emotion: self.core_emotion / total,
            repetition: self.repetition / total,
            readability: self.readability / total,
            structure: self.structure / total,
        }
    }
}

/// How serious a forbidden-topic hit is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for MarkerSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MarkerSeverity::Low => "low",
            MarkerSeverity::Medium => "medium",
            MarkerSeverity::High => "high",
            MarkerSeverity::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// A forbidden topic and the case-insensitive patterns that detect it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicMarker {
    pub topic: String,
    pub description: String,
    pub severity: MarkerSeverity,
    pub patterns: Vec<String>,
}

impl TopicMarker {
    pub fn new(topic: &str, description: &str, severity: MarkerSeverity, patterns: &[&str]) -> Self {
        Self {
            topic: topic.to_string(),
            description: description.to_string(),
            severity,
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// Target-audience profile: who the chapter is for and how it is judged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudienceProfile {
    pub key: String,
    pub name: String,
    pub min_age: u8,
    pub max_age: u8,
    pub thresholds: AudienceThresholds,
    pub weights: DimensionWeights,
    pub forbidden_markers: Vec<TopicMarker>,
}

impl Default for AudienceProfile {
    fn default() -> Self {
        Self {
            key: DEFAULT_PROFILE_KEY.to_string(),
            name: "General readers".to_string(),
            min_age: 8,
            max_age: 99,
            thresholds: AudienceThresholds::default(),
            weights: DimensionWeights::default(),
            forbidden_markers: Vec::new(),
        }
    }
}

impl AudienceProfile {
    pub fn validate(&self) -> Result<(), ProfileError> {
        let invalid = |reason: &str| ProfileError::InvalidAudience {
            key: self.key.clone(),
            reason: reason.to_string(),
        };
        let t = &self.thresholds;
        if !t.word_band.is_valid() {
            return Err(invalid("word band min exceeds max"));
        }
        if !t.sentence_length.is_valid() || t.sentence_length.min < 0.0 {
            return Err(invalid("sentence length band is invalid"));
        }
        if !t.paragraph_count.is_valid() {
            return Err(invalid("paragraph band min exceeds max"));
        }
        if !(0.0..=1.0).contains(&t.min_emotion_ratio) {
            return Err(invalid("min_emotion_ratio must be within [0, 1]"));
        }
        if !(0.0..1.0).contains(&t.max_repetition_ratio) {
            return Err(invalid("max_repetition_ratio must be within [0, 1)"));
        }
        for marker in &self.forbidden_markers {
            for pattern in &marker.patterns {
                regex::Regex::new(pattern).map_err(|source| ProfileError::InvalidPattern {
                    topic: marker.topic.clone(),
                    pattern: pattern.clone(),
                    source,
                })?;
            }
        }
        Ok(())
    }
}
