//! Property-based tests for the retry decision and the output split
//!
//! Tests invariants:
//! - The loop never retries on its last attempt, whatever the evaluation
//! - An evaluated draft never fails a run
//! - Every retry yields at least one directive
//! - Split sections only use requested languages, at most one each

use std::collections::{BTreeMap, HashSet};

use proptest::prelude::*;

use crate::core::composition::DEFAULT_LANGUAGE_DELIMITER;
use crate::core::evaluation::{ConstraintViolation, EvaluationResult, QualityDimension, ViolationSource};
use crate::core::generation::split_output;
use crate::core::orchestrator::{decide, retry_directives, AttemptOutcome, Decision, MAX_QUALITY_RETRIES};
use crate::core::profiles::{builtin_snapshot, Band, MarkerSeverity};

fn arb_evaluation() -> impl Strategy<Value = EvaluationResult> {
    (
        0.0f64..=1.0,
        any::<bool>(),
        any::<bool>(),
        prop::collection::vec(0.0f64..=1.0, QualityDimension::ALL.len()),
    )
        .prop_map(|(score, critical, missing, dimension_scores)| {
            let violations = if critical {
                vec![ConstraintViolation {
                    topic: "violence".to_string(),
                    description: "Depictions of violence".to_string(),
                    severity: MarkerSeverity::High,
                    source: ViolationSource::Audience,
                    language: "en".to_string(),
                    matched: "blood".to_string(),
                    line: 1,
                    context: "saw blood".to_string(),
                }]
            } else {
                Vec::new()
            };
            let missing_languages = if missing { vec!["en".to_string()] } else { Vec::new() };
            let dimensions: BTreeMap<_, _> = QualityDimension::ALL
                .iter()
                .copied()
                .zip(dimension_scores)
                .collect();
            EvaluationResult {
                prompt_hash: "h".to_string(),
                languages: BTreeMap::new(),
                combined_score: score,
                dimensions,
                review_required: critical || missing || score < 0.7,
                critical,
                violations,
                missing_languages,
            }
        })
}

proptest! {
    /// Property: the quality loop terminates within its attempt budget
    #[test]
    fn prop_retry_loop_terminates(
        retries in 0u32..=MAX_QUALITY_RETRIES,
        evaluations in prop::collection::vec(arb_evaluation(), (MAX_QUALITY_RETRIES + 1) as usize),
    ) {
        let max_attempts = retries + 1;
        let mut attempts = 0;
        for (i, evaluation) in evaluations.iter().enumerate() {
            let attempt = i as u32 + 1;
            attempts = attempt;
            match decide(AttemptOutcome::Evaluated(evaluation), attempt, max_attempts) {
                Decision::Retry(_) => prop_assert!(attempt < max_attempts),
                Decision::Finalize { review_required } => {
                    prop_assert_eq!(review_required, evaluation.review_required);
                    break;
                }
                Decision::Fail => prop_assert!(false, "evaluated draft must not fail the run"),
            }
        }
        prop_assert!(attempts <= max_attempts);
    }

    /// Property: every retry reason produces directives
    #[test]
    fn prop_retry_has_directives(evaluation in arb_evaluation(), target in 50u32..5000) {
        let snapshot = builtin_snapshot();
        let (audience, _) = snapshot.audience("early_reader");
        let band = Band::new(target / 2, target);
        if let Decision::Retry(reason) = decide(AttemptOutcome::Evaluated(&evaluation), 1, 3) {
            let directives = retry_directives(&reason, &evaluation, &audience.thresholds, band, "courage");
            prop_assert!(!directives.is_empty());
            prop_assert!(directives.iter().all(|d| !d.trim().is_empty()));
        }
    }

    /// Property: split output never invents or repeats languages
    #[test]
    fn prop_split_uses_requested_languages(
        parts in prop::collection::vec("[a-zA-Z .\n]{0,80}", 0..5),
        languages in prop_oneof![
            Just(vec!["de".to_string()]),
            Just(vec!["de".to_string(), "en".to_string()]),
            Just(vec!["en".to_string(), "de".to_string(), "fr".to_string()]),
        ],
    ) {
        let raw = parts.join(&format!("\n{DEFAULT_LANGUAGE_DELIMITER}\n"));
        let delimiter = (languages.len() > 1).then_some(DEFAULT_LANGUAGE_DELIMITER);
        let outcome = split_output(&raw, &languages, delimiter);

        prop_assert!(outcome.sections.len() <= languages.len());
        let mut seen = HashSet::new();
        for section in &outcome.sections {
            prop_assert!(languages.contains(&section.language));
            prop_assert!(seen.insert(section.language.clone()));
            prop_assert!(!section.text.contains(DEFAULT_LANGUAGE_DELIMITER) || languages.len() == 1);
        }
    }
}
