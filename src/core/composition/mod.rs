//! Composition Engine
//!
//! Merges one layer per [`LayerType`] into a [`CompiledPrompt`]:
//!
//! - layers are resolved from an explicit [`ProfileSnapshot`] with default fallback
//! - merge order is fixed by [`LayerType::MERGE_ORDER`]
//! - weight decides inclusion (below threshold: dropped) and emphasis
//!   (near threshold: summarised), never order
//! - bilingual requests get one joint prompt whose language sections are
//!   separated by a delimiter token that appears nowhere else
//! - the prompt hash is derived from the ordered effective layer hashes only

mod diff;

pub use diff::{DiffKind, DiffLine, PromptDiff};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::hashing::{content_hash, short_hash};
use crate::core::profiles::{
    AudienceProfile, Layer, LayerType, ProfileSnapshot, DEFAULT_PROFILE_KEY,
};
use crate::core::request::{GenerationRequest, RequestError};

/// Token separating language sections in bilingual output.
pub const DEFAULT_LANGUAGE_DELIMITER: &str = "<<<STORYLOOM_LANGUAGE_BREAK>>>";

/// Heading of the retry section folded into the constraints layer.
pub const RETRY_HEADING: &str = "=== RETRY ===";

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositionConfig {
    /// Layers weighted below this are dropped.
    pub inclusion_threshold: f32,
    /// Layers weighted in `[threshold, threshold + band)` are summarised.
    pub summary_band: f32,
    /// Lines kept from a summarised layer.
    pub summary_max_lines: usize,
    /// Language used when a request names none.
    pub default_language: String,
    pub language_delimiter: String,
}

impl Default for CompositionConfig {
    fn default() -> Self {
        Self {
            inclusion_threshold: 0.3,
            summary_band: 0.2,
            summary_max_lines: 2,
            default_language: "de".to_string(),
            language_delimiter: DEFAULT_LANGUAGE_DELIMITER.to_string(),
        }
    }
}

// ============================================================================
// Compiled Prompt
// ============================================================================

/// Full prompt text plus the hashes it was built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledPrompt {
    text: String,
    layer_hashes: Vec<String>,
    hash: String,
    bilingual: bool,
    languages: Vec<String>,
    delimiter: Option<String>,
    /// Hash of the resolved profile layers, before request data was folded in.
    bundle_hash: String,
    /// Rendered output-language section, re-appended to refined prompts that lost it.
    output_instructions: String,
}

impl CompiledPrompt {
    /// Hash of an ordered list of layer hashes.
    pub fn hash_of(layer_hashes: &[String]) -> String {
        content_hash(layer_hashes.iter())
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn layer_hashes(&self) -> &[String] {
        &self.layer_hashes
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn short_hash(&self) -> &str {
        short_hash(&self.hash)
    }

    pub fn is_bilingual(&self) -> bool {
        self.bilingual
    }

    pub fn languages(&self) -> &[String] {
        &self.languages
    }

    pub fn delimiter(&self) -> Option<&str> {
        self.delimiter.as_deref()
    }

    pub fn bundle_hash(&self) -> &str {
        &self.bundle_hash
    }

    /// True when the stored hash matches the layer hashes.
    pub fn verify_hash(&self) -> bool {
        Self::hash_of(&self.layer_hashes) == self.hash
    }

    /// Prompt produced by the refinement service from this one.
    ///
    /// The refinement is treated as one more layer, so the hash stays
    /// reproducible from the layer hash list.
    pub fn refined(&self, refined_text: &str) -> CompiledPrompt {
        let mut text = refined_text.trim().to_string();
        if let Some(delimiter) = &self.delimiter {
            if !text.contains(delimiter.as_str()) {
                text.push_str("\n\n### ");
                text.push_str(LayerType::Language.heading());
                text.push('\n');
                text.push_str(&self.output_instructions);
            }
        }
        let mut layer_hashes = self.layer_hashes.clone();
        layer_hashes.push(content_hash(["refinement", text.as_str()]));
        let hash = Self::hash_of(&layer_hashes);
        CompiledPrompt {
            text,
            layer_hashes,
            hash,
            bilingual: self.bilingual,
            languages: self.languages.clone(),
            delimiter: self.delimiter.clone(),
            bundle_hash: self.bundle_hash.clone(),
            output_instructions: self.output_instructions.clone(),
        }
    }
}

// ============================================================================
// Composition Output
// ============================================================================

/// What happened to a layer during composition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerTreatment {
    Included,
    Summarized,
    Dropped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerOutcome {
    pub layer_type: LayerType,
    /// Key that was asked for.
    pub requested_key: String,
    /// Key that was used.
    pub resolved_key: String,
    pub fell_back: bool,
    pub weight: f32,
    pub treatment: LayerTreatment,
    /// Hash of the effective layer, absent when dropped.
    pub hash: Option<String>,
}

/// Extra instructions for a retry, folded into the constraints layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositionOverrides {
    pub retry_directives: Vec<String>,
}

impl CompositionOverrides {
    pub fn retry(directives: Vec<String>) -> Self {
        Self {
            retry_directives: directives,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.retry_directives.is_empty()
    }
}

/// A compiled prompt with its provenance.
#[derive(Debug, Clone)]
pub struct Composition {
    pub prompt: CompiledPrompt,
    /// Resolved profile layer hashes in merge order (the template bundle).
    pub bundle_hashes: Vec<String>,
    pub layers: Vec<LayerOutcome>,
    /// Diff against the prior prompt of the same template version, when one was given.
    pub diff: Option<PromptDiff>,
    /// Word count the prompt asks for.
    pub target_words: u32,
}

impl Composition {
    pub fn fallbacks(&self) -> impl Iterator<Item = &LayerOutcome> {
        self.layers.iter().filter(|l| l.fell_back)
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Stateless prompt composer. Profiles are passed per call.
#[derive(Debug, Clone, Default)]
pub struct CompositionEngine {
    config: CompositionConfig,
}

impl CompositionEngine {
    pub fn new(config: CompositionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CompositionConfig {
        &self.config
    }

    /// Compose the prompt for `request`.
    ///
    /// Only malformed requests error; unknown profile keys fall back to
    /// default layers and are reported in [`Composition::layers`].
    pub fn compose(
        &self,
        snapshot: &ProfileSnapshot,
        request: &GenerationRequest,
        overrides: &CompositionOverrides,
        prior: Option<&CompiledPrompt>,
    ) -> Result<Composition, RequestError> {
        request.validate()?;

        let languages = request.effective_languages(&self.config.default_language);
        let bilingual = languages.len() > 1;
        let (audience, _) = snapshot.audience(&request.audience);
        let target_words = request
            .target_words
            .unwrap_or(audience.thresholds.target_words);

        let mut outcomes = Vec::with_capacity(LayerType::MERGE_ORDER.len());
        let mut bundle_hashes = Vec::with_capacity(LayerType::MERGE_ORDER.len() + 1);
        let mut effective: Vec<Layer> = Vec::with_capacity(LayerType::MERGE_ORDER.len());

        for layer_type in LayerType::MERGE_ORDER {
            if layer_type == LayerType::Language {
                let resolved: Vec<(&str, &Layer, bool)> = languages
                    .iter()
                    .map(|lang| {
                        let lookup = snapshot.layer(LayerType::Language, lang);
                        (lang.as_str(), lookup.layer, lookup.fell_back)
                    })
                    .collect();
                for (lang, layer, fell_back) in &resolved {
                    bundle_hashes.push(layer.hash().to_string());
                    outcomes.push(self.outcome(layer, lang, *fell_back));
                }
                let layer = self.language_layer(&resolved, &languages);
                if let Some(last) = outcomes.last_mut() {
                    last.hash = Some(layer.hash().to_string());
                }
                effective.push(layer);
                continue;
            }

            let requested_key = self.requested_key(layer_type, request);
            let lookup = snapshot.layer(layer_type, &requested_key);
            bundle_hashes.push(lookup.layer.hash().to_string());

            let base = self.weighted_content(lookup.layer);
            let content = match layer_type {
                LayerType::Audience => fold_audience(base, audience, target_words),
                LayerType::Style => fold_list(base, "Style directives:", &request.style_directives),
                LayerType::NarrativeContext => fold_narrative(base, request),
                LayerType::Constraints => {
                    fold_constraints(base, audience, request, overrides, target_words)
                }
                _ => base,
            };
            let content = self.sanitize(&content);

            let mut outcome = self.outcome(lookup.layer, &requested_key, lookup.fell_back);
            if content.trim().is_empty() {
                outcome.treatment = LayerTreatment::Dropped;
                outcome.hash = None;
            } else {
                let layer = lookup.layer.derive(content);
                outcome.hash = Some(layer.hash().to_string());
                effective.push(layer);
            }
            outcomes.push(outcome);
        }

        for fallback in outcomes.iter().filter(|o| o.fell_back) {
            debug!(
                request_id = %request.request_id,
                layer_type = %fallback.layer_type,
                requested = %fallback.requested_key,
                "Layer fell back to default"
            );
        }

        let text = render(&effective);
        let layer_hashes: Vec<String> = effective.iter().map(|l| l.hash().to_string()).collect();
        let hash = CompiledPrompt::hash_of(&layer_hashes);
        let output_instructions = effective
            .last()
            .filter(|l| l.layer_type() == LayerType::Language)
            .map(|l| l.content().to_string())
            .unwrap_or_default();

        let prompt = CompiledPrompt {
            text,
            layer_hashes,
            hash,
            bilingual,
            languages,
            delimiter: bilingual.then(|| self.config.language_delimiter.clone()),
            bundle_hash: content_hash(bundle_hashes.iter()),
            output_instructions,
        };
        let diff = prior.map(|p| PromptDiff::between(p.text(), prompt.text()));

        debug!(
            request_id = %request.request_id,
            prompt_hash = %prompt.short_hash(),
            layers = prompt.layer_hashes().len(),
            bilingual,
            "Prompt composed"
        );

        Ok(Composition {
            prompt,
            bundle_hashes,
            layers: outcomes,
            diff,
            target_words,
        })
    }

    fn requested_key(&self, layer_type: LayerType, request: &GenerationRequest) -> String {
        let key = match layer_type {
            LayerType::SystemNote => request.system_note.as_deref(),
            LayerType::Audience => Some(request.audience.as_str()),
            LayerType::Genre => Some(request.genre.as_str()),
            LayerType::Emotion => Some(request.emotion.as_str()),
            LayerType::Style => request.style.as_deref(),
            LayerType::NarrativeContext | LayerType::Constraints | LayerType::Language => None,
        };
        key.map(str::trim)
            .filter(|k| !k.is_empty())
            .unwrap_or(DEFAULT_PROFILE_KEY)
            .to_string()
    }

    fn treatment(&self, weight: f32) -> LayerTreatment {
        if weight < self.config.inclusion_threshold {
            LayerTreatment::Dropped
        } else if weight < self.config.inclusion_threshold + self.config.summary_band {
            LayerTreatment::Summarized
        } else {
            LayerTreatment::Included
        }
    }

    fn outcome(&self, layer: &Layer, requested_key: &str, fell_back: bool) -> LayerOutcome {
        LayerOutcome {
            layer_type: layer.layer_type(),
            requested_key: requested_key.to_string(),
            resolved_key: layer.profile_key().to_string(),
            fell_back,
            weight: layer.weight(),
            treatment: self.treatment(layer.weight()),
            hash: None,
        }
    }

    /// Profile content after the weight rule.
    fn weighted_content(&self, layer: &Layer) -> String {
        match self.treatment(layer.weight()) {
            LayerTreatment::Dropped => String::new(),
            LayerTreatment::Summarized => summarize(layer.content(), self.config.summary_max_lines),
            LayerTreatment::Included => layer.content().to_string(),
        }
    }

    /// The delimiter may only appear in the language section.
    fn sanitize(&self, content: &str) -> String {
        let delimiter = self.config.language_delimiter.as_str();
        if delimiter.is_empty() || !content.contains(delimiter) {
            return content.to_string();
        }
        warn!("Removed language delimiter from layer content");
        content.replace(delimiter, "")
    }

    fn language_layer(&self, resolved: &[(&str, &Layer, bool)], languages: &[String]) -> Layer {
        let sections: Vec<String> = resolved
            .iter()
            .map(|(lang, layer, _)| {
                let guidance = self.sanitize(&self.weighted_content(layer));
                if guidance.trim().is_empty() {
                    format!("[{lang}]")
                } else {
                    format!("[{lang}] {}", guidance.trim())
                }
            })
            .collect();

        let mut content = sections.join("\n");
        content.push_str("\n\n");
        if let [only] = languages {
            content.push_str(&format!("Write the chapter in '{only}'."));
        } else {
            let delimiter = &self.config.language_delimiter;
            content.push_str(&format!(
                "Write the complete chapter once per language, in this order: {}.\n\
                 Keep plot, names and paragraph structure identical across versions.\n\
                 Between two versions output a line containing only {delimiter}\n\
                 Never use {delimiter} anywhere else.",
                languages.join(", ")
            ));
        }

        // Identity of the section: first language's layer, so the hash still
        // changes with any language, weight or order change.
        let (_, first, _) = resolved[0];
        first.derive(content)
    }
}

// ============================================================================
// Rendering helpers
// ============================================================================

fn render(layers: &[Layer]) -> String {
    layers
        .iter()
        .map(|l| format!("### {}\n{}", l.layer_type().heading(), l.content().trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Keep the first `max_lines` non-empty lines, or the first sentence of a
/// single-line layer.
fn summarize(content: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    match lines.as_slice() {
        [] => String::new(),
        [single] => match single.find(". ") {
            Some(end) => single[..=end].to_string(),
            None => single.to_string(),
        },
        many => many[..many.len().min(max_lines.max(1))].join("\n"),
    }
}

fn fold_list(base: String, title: &str, items: &[String]) -> String {
    let items: Vec<&str> = items
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();
    if items.is_empty() {
        return base;
    }
    let mut out = base;
    if !out.is_empty() {
        out.push_str("\n");
    }
    out.push_str(title);
    for item in items {
        out.push_str("\n- ");
        out.push_str(item);
    }
    out
}

fn fold_audience(base: String, audience: &AudienceProfile, target_words: u32) -> String {
    let mut out = base;
    if !out.is_empty() {
        out.push('\n');
    }
    out.push_str(&format!(
        "Reader age: {}-{}. Aim for about {} words per language.",
        audience.min_age, audience.max_age, target_words
    ));
    out
}

fn fold_narrative(base: String, request: &GenerationRequest) -> String {
    let n = &request.narrative;
    let mut lines: Vec<String> = Vec::new();
    if !n.book_title.trim().is_empty() {
        lines.push(format!("Book: {}", n.book_title.trim()));
    }
    let chapter = if n.chapter_title.trim().is_empty() {
        format!("Chapter {}", request.chapter_number)
    } else {
        format!("Chapter {}: {}", request.chapter_number, n.chapter_title.trim())
    };
    lines.push(chapter);
    let fields = [
        ("Purpose", &n.narrative_purpose),
        ("Position in arc", &n.position_in_arc),
        ("Previously", &n.previous_summary),
        ("Current scene", &n.current_scene),
        ("Setting", &n.setting),
    ];
    for (label, value) in fields {
        if !value.trim().is_empty() {
            lines.push(format!("{label}: {}", value.trim()));
        }
    }
    if !n.characters.is_empty() {
        lines.push(format!("Characters: {}", n.characters.join(", ")));
    }

    let mut out = base;
    if !out.is_empty() {
        out.push('\n');
    }
    out.push_str(&lines.join("\n"));
    out
}

fn fold_constraints(
    base: String,
    audience: &AudienceProfile,
    request: &GenerationRequest,
    overrides: &CompositionOverrides,
    target_words: u32,
) -> String {
    let mut out = base;
    let mut push_line = |line: String| {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&line);
    };

    push_line(format!("Length: about {target_words} words per language."));

    let mut avoid: Vec<&str> = audience
        .forbidden_markers
        .iter()
        .map(|m| m.description.as_str())
        .collect();
    avoid.extend(
        request
            .forbidden_topics
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty()),
    );
    if !avoid.is_empty() {
        push_line(format!("Avoid entirely: {}.", avoid.join("; ")));
    }

    if !overrides.retry_directives.is_empty() {
        push_line(String::new());
        push_line(RETRY_HEADING.to_string());
        for directive in &overrides.retry_directives {
            push_line(format!("- {}", directive.trim()));
        }
    }
    out
}
