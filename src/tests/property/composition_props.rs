//! Property-based tests for prompt composition
//!
//! Tests invariants:
//! - Identical inputs yield identical prompt text and hash
//! - The prompt hash always matches its layer hashes
//! - Retry directives change the hash, never the template bundle
//! - Only multi-language prompts carry a delimiter

use proptest::prelude::*;

use crate::core::composition::{
    CompositionConfig, CompositionEngine, CompositionOverrides, RETRY_HEADING,
};
use crate::core::profiles::builtin_snapshot;
use crate::core::request::GenerationRequest;

fn arb_request() -> impl Strategy<Value = GenerationRequest> {
    (
        1u32..200,
        prop_oneof![
            Just("preschool"),
            Just("early_reader"),
            Just("young_adult"),
            Just("no_such_audience"),
        ],
        prop_oneof![Just("adventure"), Just("fantasy"), Just("mystery"), Just("unknown")],
        prop_oneof![Just("courage"), Just("wonder"), Just("friendship"), Just("unknown")],
        prop_oneof![
            Just(vec!["de"]),
            Just(vec!["en"]),
            Just(vec!["de", "en"]),
            Just(vec!["en", "de", "fr"]),
        ],
        prop::option::of(50u32..5000),
        prop::collection::vec("[a-z ]{3,30}", 0..3),
    )
        .prop_map(|(chapter, audience, genre, emotion, languages, target, directives)| {
            let mut request =
                GenerationRequest::new("req", "project", chapter, audience, genre, emotion)
                    .with_languages(languages);
            request.target_words = target;
            request.style_directives = directives;
            request
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: composition is deterministic
    #[test]
    fn prop_compose_is_deterministic(request in arb_request()) {
        let snapshot = builtin_snapshot();
        let engine = CompositionEngine::new(CompositionConfig::default());
        let overrides = CompositionOverrides::default();

        let a = engine.compose(&snapshot, &request, &overrides, None).unwrap();
        let b = engine.compose(&snapshot, &request, &overrides, None).unwrap();

        prop_assert_eq!(a.prompt.text(), b.prompt.text());
        prop_assert_eq!(a.prompt.hash(), b.prompt.hash());
        prop_assert_eq!(a.bundle_hashes, b.bundle_hashes);
        prop_assert!(a.prompt.verify_hash());
    }

    /// Property: retry directives change the prompt but not the bundle
    #[test]
    fn prop_retry_changes_prompt_not_bundle(
        request in arb_request(),
        directive in "[A-Za-z ]{5,60}",
    ) {
        let snapshot = builtin_snapshot();
        let engine = CompositionEngine::new(CompositionConfig::default());

        let first = engine
            .compose(&snapshot, &request, &CompositionOverrides::default(), None)
            .unwrap();
        let retry = engine
            .compose(
                &snapshot,
                &request,
                &CompositionOverrides::retry(vec![directive]),
                Some(&first.prompt),
            )
            .unwrap();

        prop_assert_ne!(first.prompt.hash(), retry.prompt.hash());
        prop_assert!(retry.prompt.text().contains(RETRY_HEADING));
        prop_assert!(retry.prompt.verify_hash());
        prop_assert_eq!(first.prompt.bundle_hash(), retry.prompt.bundle_hash());
        prop_assert!(retry.diff.is_some_and(|d| d.added > 0));
    }

    /// Property: a delimiter is present exactly when more than one language is requested
    #[test]
    fn prop_delimiter_iff_bilingual(request in arb_request()) {
        let snapshot = builtin_snapshot();
        let engine = CompositionEngine::new(CompositionConfig::default());
        let composition = engine
            .compose(&snapshot, &request, &CompositionOverrides::default(), None)
            .unwrap();

        let bilingual = request.languages.len() > 1;
        prop_assert_eq!(composition.prompt.is_bilingual(), bilingual);
        prop_assert_eq!(composition.prompt.delimiter().is_some(), bilingual);
        prop_assert_eq!(composition.prompt.languages(), request.languages.as_slice());
        if let Some(delimiter) = composition.prompt.delimiter() {
            prop_assert!(composition.prompt.text().contains(delimiter));
        }
    }
}
