//! Property-based tests for the Evaluator
//!
//! Tests invariants:
//! - Combined, language and dimension scores are within [0, 1]
//! - The same input always yields the same result
//! - Any constraint violation makes the result critical

use proptest::prelude::*;

use crate::core::cost::TokenUsage;
use crate::core::evaluation::{EvaluationContext, Evaluator};
use crate::core::generation::{GenerationResult, LanguageSection};
use crate::core::profiles::builtin_snapshot;

// ============================================================================
// Strategies for generating test inputs
// ============================================================================

fn arb_audience() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just("preschool"),
        Just("early_reader"),
        Just("middle_grade"),
        Just("young_adult"),
        Just("adult"),
        Just("unknown_audience"),
    ]
}

/// Prose-like text: words, punctuation, blank lines, the odd umlaut.
fn arb_text() -> impl Strategy<Value = String> {
    prop::collection::vec(
        prop_oneof![
            4 => "[a-zA-Zäöü]{1,12}",
            1 => Just(".".to_string()),
            1 => Just("!".to_string()),
            1 => Just("\n\n".to_string()),
        ],
        0..400,
    )
    .prop_map(|tokens| tokens.join(" "))
}

fn result_for(sections: &[(&str, String)]) -> GenerationResult {
    GenerationResult::new(
        "prop-hash",
        sections
            .iter()
            .map(|(lang, text)| LanguageSection::new(lang, text))
            .collect(),
        TokenUsage::new(10, 10),
        0.0,
    )
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: every score is within [0, 1]
    #[test]
    fn prop_scores_are_bounded(
        audience in arb_audience(),
        de in arb_text(),
        en in arb_text(),
        target in prop::option::of(1u32..3000),
    ) {
        let snapshot = builtin_snapshot();
        let (profile, _) = snapshot.audience(audience);
        let languages = vec!["de".to_string(), "en".to_string()];
        let ctx = EvaluationContext {
            snapshot: &snapshot,
            audience: profile,
            emotion: "courage",
            target_words: target,
            forbidden_topics: &[],
            expected_languages: &languages,
        };
        let eval = Evaluator::default().evaluate(&result_for(&[("de", de), ("en", en)]), &ctx);

        prop_assert!((0.0..=1.0).contains(&eval.combined_score));
        for language in eval.languages.values() {
            prop_assert!((0.0..=1.0).contains(&language.score));
            for dimension in &language.dimensions {
                prop_assert!(
                    (0.0..=1.0).contains(&dimension.score),
                    "{} scored {}",
                    dimension.dimension,
                    dimension.score
                );
            }
        }
        for score in eval.dimensions.values() {
            prop_assert!((0.0..=1.0).contains(score));
        }
    }

    /// Property: evaluation is a pure function of its inputs
    #[test]
    fn prop_evaluation_is_deterministic(audience in arb_audience(), text in arb_text()) {
        let snapshot = builtin_snapshot();
        let (profile, _) = snapshot.audience(audience);
        let languages = vec!["en".to_string()];
        let ctx = EvaluationContext {
            snapshot: &snapshot,
            audience: profile,
            emotion: "wonder",
            target_words: None,
            forbidden_topics: &[],
            expected_languages: &languages,
        };
        let result = result_for(&[("en", text)]);
        let evaluator = Evaluator::default();
        prop_assert_eq!(evaluator.evaluate(&result, &ctx), evaluator.evaluate(&result, &ctx));
    }

    /// Property: a forbidden topic in the text is always critical
    #[test]
    fn prop_violation_is_always_critical(
        before in arb_text(),
        after in arb_text(),
        topic in "[a-z]{4,10}",
    ) {
        let snapshot = builtin_snapshot();
        let (profile, _) = snapshot.audience("adult");
        let languages = vec!["en".to_string()];
        let topics = vec![topic.clone()];
        let ctx = EvaluationContext {
            snapshot: &snapshot,
            audience: profile,
            emotion: "courage",
            target_words: None,
            forbidden_topics: &topics,
            expected_languages: &languages,
        };
        let text = format!("{before} {topic} {after}");
        let eval = Evaluator::default().evaluate(&result_for(&[("en", text)]), &ctx);

        prop_assert!(eval.critical);
        prop_assert!(eval.review_required);
        prop_assert!(eval.violations.iter().any(|v| v.topic == topic));
    }
}
