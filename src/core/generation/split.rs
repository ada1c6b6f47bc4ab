//! Splitting raw bilingual output into language sections.

use serde::{Deserialize, Serialize};

use super::LanguageSection;

/// Recorded degradation while splitting. Not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SplitFallback {
    /// Delimiter absent: whole output assigned to the first language.
    BilingualParsing,
    /// Delimiter present but the number of sections did not match.
    SectionCountMismatch { expected: usize, found: usize },
}

impl SplitFallback {
    pub fn as_str(&self) -> &'static str {
        match self {
            SplitFallback::BilingualParsing => "bilingual_parsing",
            SplitFallback::SectionCountMismatch { .. } => "section_count_mismatch",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SplitOutcome {
    pub sections: Vec<LanguageSection>,
    pub fallback: Option<SplitFallback>,
}

/// Split `raw` into one section per language.
///
/// Without a delimiter (single-language prompt) the whole text belongs to
/// the first language. Extra sections are merged into the last language;
/// missing ones are left out and recorded.
pub fn split_output(raw: &str, languages: &[String], delimiter: Option<&str>) -> SplitOutcome {
    let first = languages.first().map(String::as_str).unwrap_or("und");

    let delimiter = match delimiter {
        Some(d) if !d.is_empty() && languages.len() > 1 => d,
        _ => {
            return SplitOutcome {
                sections: vec![section(first, raw)],
                fallback: None,
            }
        }
    };

    if !raw.contains(delimiter) {
        return SplitOutcome {
            sections: vec![section(first, raw)],
            fallback: Some(SplitFallback::BilingualParsing),
        };
    }

    let parts: Vec<&str> = raw
        .split(delimiter)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    let expected = languages.len();
    let found = parts.len();
    let mut sections = Vec::with_capacity(expected);
    for (i, language) in languages.iter().enumerate() {
        let text = match i {
            _ if i >= found => break,
            _ if i == expected - 1 && found > expected => parts[i..].join("\n\n"),
            _ => parts[i].to_string(),
        };
        sections.push(section(language, &text));
    }

    let fallback = if sections.is_empty() {
        sections.push(section(first, ""));
        Some(SplitFallback::BilingualParsing)
    } else if found != expected {
        Some(SplitFallback::SectionCountMismatch { expected, found })
    } else {
        None
    };

    SplitOutcome { sections, fallback }
}

fn section(language: &str, text: &str) -> LanguageSection {
    LanguageSection::new(language, strip_language_label(language, text.trim()))
}

/// Drop a leading line that only labels the language ("[de]", "EN:", ...).
fn strip_language_label<'a>(language: &str, text: &'a str) -> &'a str {
    let Some((first_line, rest)) = text.split_once('\n') else {
        return text;
    };
    let label = first_line
        .trim()
        .trim_matches(|c: char| c == '[' || c == ']' || c == ':' || c == '#' || c == ' ');
    if label.eq_ignore_ascii_case(language) {
        rest.trim_start()
    } else {
        text
    }
}
