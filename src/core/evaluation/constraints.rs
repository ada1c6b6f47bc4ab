//! Forbidden-topic detection, run as a separate pass from scoring.

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::profiles::{MarkerSeverity, TopicMarker};

/// Characters of context kept on each side of a match.
const CONTEXT_CHARS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSource {
    /// Marker carried by the audience profile.
    Audience,
    /// Topic the request forbade explicitly.
    Request,
}

/// One forbidden-topic hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintViolation {
    pub topic: String,
    pub description: String,
    pub severity: MarkerSeverity,
    pub source: ViolationSource,
    pub language: String,
    /// Matched text as it appears in the output.
    pub matched: String,
    /// 1-based line of the match within its language section.
    pub line: usize,
    pub context: String,
}

#[derive(Debug, Clone)]
struct CompiledMarker {
    topic: String,
    description: String,
    severity: MarkerSeverity,
    source: ViolationSource,
    patterns: Vec<Regex>,
}

/// Compiled matchers for one audience plus request-level topics.
#[derive(Debug, Clone, Default)]
pub struct ConstraintChecker {
    markers: Vec<CompiledMarker>,
}

impl ConstraintChecker {
    pub fn new(audience_markers: &[TopicMarker], request_topics: &[String]) -> Self {
        let mut markers = Vec::with_capacity(audience_markers.len() + request_topics.len());

        for marker in audience_markers {
            let patterns = marker
                .patterns
                .iter()
                .filter_map(|p| match Regex::new(&format!("(?i){p}")) {
                    Ok(re) => Some(re),
                    Err(e) => {
                        warn!(topic = %marker.topic, pattern = %p, error = %e, "Skipping invalid topic pattern");
                        None
                    }
                })
                .collect();
            markers.push(CompiledMarker {
                topic: marker.topic.clone(),
                description: marker.description.clone(),
                severity: marker.severity,
                source: ViolationSource::Audience,
                patterns,
            });
        }

        for topic in request_topics {
            let topic = topic.trim();
            if topic.is_empty() {
                continue;
            }
            let pattern = format!(r"(?i)\b{}\b", regex::escape(topic));
            match Regex::new(&pattern) {
                Ok(re) => markers.push(CompiledMarker {
                    topic: topic.to_string(),
                    description: format!("Forbidden by request: {topic}"),
                    severity: MarkerSeverity::High,
                    source: ViolationSource::Request,
                    patterns: vec![re],
                }),
                Err(e) => warn!(topic = %topic, error = %e, "Skipping unusable forbidden topic"),
            }
        }

        Self { markers }
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    /// All violations in `text`, in marker order then position.
    pub fn check(&self, language: &str, text: &str) -> Vec<ConstraintViolation> {
        let mut violations = Vec::new();
        for marker in &self.markers {
            for pattern in &marker.patterns {
                for m in pattern.find_iter(text) {
                    violations.push(ConstraintViolation {
                        topic: marker.topic.clone(),
                        description: marker.description.clone(),
                        severity: marker.severity,
                        source: marker.source,
                        language: language.to_string(),
                        matched: m.as_str().to_string(),
                        line: line_of(text, m.start()),
                        context: context_around(text, m.start(), m.end()),
                    });
                }
            }
        }
        violations
    }
}

fn line_of(text: &str, byte_offset: usize) -> usize {
    text[..byte_offset].matches('\n').count() + 1
}

fn context_around(text: &str, start: usize, end: usize) -> String {
    let before: String = text[..start]
        .chars()
        .rev()
        .take(CONTEXT_CHARS)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    let after: String = text[end..].chars().take(CONTEXT_CHARS).collect();
    format!("{before}{}{after}", &text[start..end])
        .replace('\n', " ")
        .trim()
        .to_string()
}
