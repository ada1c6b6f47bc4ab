//! Tokenisation shared by the scoring strategies.

use once_cell::sync::Lazy;
use regex::Regex;

static SENTENCE_END: Lazy<Regex> = Lazy::new(|| Regex::new(r"[.!?…]+").expect("Invalid sentence regex"));
static PARAGRAPH_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n[ \t]*\n").expect("Invalid paragraph regex"));

/// Words, sentences and paragraphs of one language section.
#[derive(Debug, Clone, PartialEq)]
pub struct TextStats {
    /// Lowercased word tokens with surrounding punctuation removed.
    pub words: Vec<String>,
    /// Sentences, each as its lowercased word tokens.
    pub sentences: Vec<Vec<String>>,
    /// Word count per paragraph.
    pub paragraph_words: Vec<usize>,
}

impl TextStats {
    pub fn analyze(text: &str) -> Self {
        let words = tokenize(text);
        let sentences = SENTENCE_END
            .split(text)
            .map(tokenize)
            .filter(|s| !s.is_empty())
            .collect();
        let paragraph_words = PARAGRAPH_BREAK
            .split(text)
            .map(|p| tokenize(p).len())
            .filter(|count| *count > 0)
            .collect();
        Self {
            words,
            sentences,
            paragraph_words,
        }
    }

    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    pub fn sentence_count(&self) -> usize {
        self.sentences.len()
    }

    pub fn paragraph_count(&self) -> usize {
        self.paragraph_words.len()
    }

    pub fn avg_sentence_length(&self) -> Option<f64> {
        if self.sentences.is_empty() {
            return None;
        }
        let total: usize = self.sentences.iter().map(Vec::len).sum();
        Some(total as f64 / self.sentences.len() as f64)
    }
}

/// Word count as the evaluator sees it.
pub fn word_count(text: &str) -> usize {
    tokenize(text).len()
}

fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|raw| {
            raw.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect()
}

/// Whether `word` carries `keyword`. Short keywords must match exactly,
/// longer ones also match inflected forms ("mutig" in "mutigen").
pub fn matches_keyword(word: &str, keyword: &str) -> bool {
    if keyword.chars().count() >= 4 {
        word.starts_with(keyword)
    } else {
        word == keyword
    }
}
