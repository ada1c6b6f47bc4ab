//! Generation requests and input validation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Input errors. A request failing validation is rejected before
/// composition and never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("Missing identifier: {0}")]
    MissingIdentifier(&'static str),

    #[error("Chapter number must be at least 1")]
    InvalidChapterNumber,

    #[error("Word target {0} is outside the supported range 1..=20000")]
    InvalidWordTarget(u32),

    #[error("Invalid language code '{0}'")]
    InvalidLanguage(String),
}

/// Longest chapter the engine will ask for.
pub const MAX_WORD_TARGET: u32 = 20_000;

/// Where the chapter sits in the book and what has happened so far.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NarrativeContext {
    pub book_title: String,
    pub chapter_title: String,
    pub narrative_purpose: String,
    pub position_in_arc: String,
    pub current_scene: String,
    pub previous_summary: String,
    pub setting: String,
    pub characters: Vec<String>,
}

impl NarrativeContext {
    pub fn is_empty(&self) -> bool {
        self == &NarrativeContext::default()
    }
}

/// One chapter to generate. Built once and shared read-only for the whole run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub request_id: String,
    pub project_id: String,
    pub chapter_number: u32,
    /// Audience profile key, e.g. `early_reader`.
    pub audience: String,
    pub genre: String,
    pub emotion: String,
    /// Style profile key; the default style is used when absent.
    #[serde(default)]
    pub style: Option<String>,
    /// System-note profile key; the default note is used when absent.
    #[serde(default)]
    pub system_note: Option<String>,
    /// Ordered output languages. More than one means bilingual mode.
    #[serde(default)]
    pub languages: Vec<String>,
    /// Overrides the audience profile's target when set.
    #[serde(default)]
    pub target_words: Option<u32>,
    #[serde(default)]
    pub narrative: NarrativeContext,
    #[serde(default)]
    pub style_directives: Vec<String>,
    #[serde(default)]
    pub forbidden_topics: Vec<String>,
}

impl GenerationRequest {
    pub fn new(
        request_id: impl Into<String>,
        project_id: impl Into<String>,
        chapter_number: u32,
        audience: impl Into<String>,
        genre: impl Into<String>,
        emotion: impl Into<String>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            project_id: project_id.into(),
            chapter_number,
            audience: audience.into(),
            genre: genre.into(),
            emotion: emotion.into(),
            style: None,
            system_note: None,
            languages: Vec::new(),
            target_words: None,
            narrative: NarrativeContext::default(),
            style_directives: Vec::new(),
            forbidden_topics: Vec::new(),
        }
    }

    pub fn with_languages<I, S>(mut self, languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.languages = languages.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_target_words(mut self, words: u32) -> Self {
        self.target_words = Some(words);
        self
    }

    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        self.style = Some(style.into());
        self
    }

    pub fn with_system_note(mut self, key: impl Into<String>) -> Self {
        self.system_note = Some(key.into());
        self
    }

    pub fn with_narrative(mut self, narrative: NarrativeContext) -> Self {
        self.narrative = narrative;
        self
    }

    pub fn with_style_directive(mut self, directive: impl Into<String>) -> Self {
        self.style_directives.push(directive.into());
        self
    }

    pub fn with_forbidden_topic(mut self, topic: impl Into<String>) -> Self {
        self.forbidden_topics.push(topic.into());
        self
    }

    /// Reject requests missing identifiers or carrying unusable values.
    /// Everything else (unknown profiles, empty context) degrades to defaults later.
    pub fn validate(&self) -> Result<(), RequestError> {
        if self.request_id.trim().is_empty() {
            return Err(RequestError::MissingIdentifier("request_id"));
        }
        if self.project_id.trim().is_empty() {
            return Err(RequestError::MissingIdentifier("project_id"));
        }
        if self.chapter_number == 0 {
            return Err(RequestError::InvalidChapterNumber);
        }
        if let Some(words) = self.target_words {
            if words == 0 || words > MAX_WORD_TARGET {
                return Err(RequestError::InvalidWordTarget(words));
            }
        }
        for language in &self.languages {
            let code = language.trim();
            if code.is_empty()
                || code.len() > 8
                || !code.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            {
                return Err(RequestError::InvalidLanguage(language.clone()));
            }
        }
        Ok(())
    }

    /// Normalised, de-duplicated output languages, or `default_language` when none are set.
    pub fn effective_languages(&self, default_language: &str) -> Vec<String> {
        let mut languages: Vec<String> = Vec::with_capacity(self.languages.len().max(1));
        for language in &self.languages {
            let code = language.trim().to_lowercase();
            if !code.is_empty() && !languages.contains(&code) {
                languages.push(code);
            }
        }
        if languages.is_empty() {
            languages.push(default_language.to_lowercase());
        }
        languages
    }
}
