//! Orchestrator Integration Tests
//!
//! Runs requests end to end against scripted primary and refinement
//! services, covering:
//! - first-attempt success and quality retries
//! - retry budget exhaustion and constraint violations
//! - bilingual split fallbacks
//! - transport failures, cancellation and input rejection
//! - prompt optimisation (A/B) and budget gating
//! - batches, artifacts and ratings

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::core::cancel::CancelToken;
use crate::core::composition::RETRY_HEADING;
use crate::core::cost::{CallCost, CostBudgetConfig, CostTracker, ServiceRole};
use crate::core::feedback::{
    AttemptDisposition, Branch, FeedbackKind, FeedbackLog, FeedbackRecord, InMemoryFeedbackLog,
    Rating,
};
use crate::core::generation::{GenerationError, SplitFallback, TransportConfig};
use crate::core::orchestrator::{
    Orchestrator, OrchestratorBuilder, OrchestratorConfig, RunError, RunState,
};
use crate::core::request::RequestError;
use crate::tests::common::*;

// =============================================================================
// Helpers
// =============================================================================

fn builder(primary: &Arc<ScriptedService>, log: &Arc<InMemoryFeedbackLog>) -> OrchestratorBuilder {
    Orchestrator::builder(primary.clone())
        .with_evaluator(marker_evaluator())
        .with_transport(fast_transport())
        .with_feedback_log(log.clone())
}

fn setup(primary: &Arc<ScriptedService>) -> (Orchestrator, Arc<InMemoryFeedbackLog>) {
    let log = Arc::new(InMemoryFeedbackLog::new());
    (builder(primary, &log).build(), log)
}

fn disposition(record: &FeedbackRecord) -> Option<AttemptDisposition> {
    match &record.kind {
        FeedbackKind::Attempt { disposition, .. } => Some(*disposition),
        FeedbackKind::Rating { .. } => None,
    }
}

fn branch(record: &FeedbackRecord) -> Option<Branch> {
    match &record.kind {
        FeedbackKind::Attempt { branch, .. } => Some(*branch),
        FeedbackKind::Rating { .. } => None,
    }
}

// =============================================================================
// Quality loop
// =============================================================================

#[tokio::test]
async fn test_good_draft_finalizes_on_first_attempt() {
    let primary = scripted(GOOD_EN);
    let (orchestrator, log) = setup(&primary);

    let outcome = orchestrator
        .run(&chapter_request("req-1", 1), &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.attempts, 1);
    assert!(!outcome.review_required);
    assert!(!outcome.critical);
    assert!((outcome.evaluation.combined_score - STRONG_SCORE).abs() < 1e-9);
    assert!(outcome.prompt.verify_hash());
    assert!(outcome.feedback_recorded);
    assert_eq!(primary.calls(), 1);

    assert_eq!(outcome.cost.calls.len(), 1);
    assert!((outcome.cost.total_usd() - CALL_COST_USD).abs() < 1e-12);
    assert_eq!(outcome.trace.count(RunState::Compose), 1);
    assert_eq!(outcome.trace.count(RunState::Retry), 0);
    assert_eq!(outcome.trace.states().first(), Some(&RunState::Init));
    assert_eq!(outcome.trace.states().last(), Some(&RunState::PromoteCheck));

    let records = log.records(outcome.template_version.id).await;
    assert_eq!(records.len(), 1);
    assert!(records[0].is_final_attempt());
    assert_eq!(records[0].prompt_hash, outcome.prompt.hash());
}

#[tokio::test]
async fn test_weak_draft_is_retried_with_directives() {
    let primary = Arc::new(ScriptedService::new(GOOD_EN).then_text(WEAK_EN));
    let (orchestrator, log) = setup(&primary);

    let outcome = orchestrator
        .run(&chapter_request("req-1", 1), &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.attempts, 2);
    assert!(!outcome.review_required);
    assert_eq!(outcome.trace.count(RunState::Retry), 1);

    let prompts = primary.prompts();
    assert_eq!(prompts.len(), 2);
    assert!(!prompts[0].contains(RETRY_HEADING));
    assert!(prompts[1].contains(RETRY_HEADING));
    assert_ne!(prompts[0], prompts[1]);

    let records = log.records(outcome.template_version.id).await;
    let dispositions: Vec<_> = records.iter().filter_map(disposition).collect();
    assert_eq!(
        dispositions,
        vec![AttemptDisposition::Superseded, AttemptDisposition::Final]
    );
}

#[tokio::test]
async fn test_exhausted_retries_keep_best_attempt_and_require_review() {
    let primary = scripted(WEAK_EN);
    let log = Arc::new(InMemoryFeedbackLog::new());
    let orchestrator = builder(&primary, &log).with_max_quality_retries(2).build();

    let outcome = orchestrator
        .run(&chapter_request("req-1", 1), &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.attempts, 3);
    assert_eq!(primary.calls(), 3);
    assert!(outcome.review_required);
    assert!((outcome.evaluation.combined_score - WEAK_SCORE).abs() < 1e-9);

    // Equal scores keep the earliest attempt.
    let records = log.records(outcome.template_version.id).await;
    assert_eq!(records.len(), 3);
    let finals: Vec<_> = records.iter().filter(|r| r.is_final_attempt()).collect();
    assert_eq!(finals.len(), 1);
    assert!(matches!(finals[0].kind, FeedbackKind::Attempt { attempt: 1, .. }));

    let stats = orchestrator.stats().await;
    assert_eq!(stats.finalized_runs, 1);
    assert_eq!(stats.review_required_runs, 1);
    assert!((stats.avg_attempts() - 3.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_zero_retries_finalizes_after_one_attempt() {
    let primary = scripted(WEAK_EN);
    let log = Arc::new(InMemoryFeedbackLog::new());
    let orchestrator = builder(&primary, &log).with_max_quality_retries(0).build();

    let outcome = orchestrator
        .run(&chapter_request("req-1", 1), &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.attempts, 1);
    assert!(outcome.review_required);
}

#[tokio::test]
async fn test_constraint_violation_retries_with_topic_directive() {
    let primary = Arc::new(
        ScriptedService::new(GOOD_EN).then_text("Tom saw blood on the stairs and ran home."),
    );
    let (orchestrator, _log) = setup(&primary);

    let outcome = orchestrator
        .run(&chapter_request("req-1", 1), &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.attempts, 2);
    assert!(!outcome.critical);
    assert!(outcome.evaluation.violations.is_empty());
    let prompts = primary.prompts();
    assert!(prompts[1].contains("not allowed for this audience"));
}

#[tokio::test]
async fn test_persistent_violation_is_critical() {
    let primary = scripted("Tom saw blood on the stairs.");
    let log = Arc::new(InMemoryFeedbackLog::new());
    let orchestrator = builder(&primary, &log).with_max_quality_retries(1).build();

    let outcome = orchestrator
        .run(&chapter_request("req-1", 1), &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.attempts, 2);
    assert!(outcome.critical);
    assert!(outcome.review_required);
    assert_eq!(outcome.evaluation.violations[0].topic, "violence");
    assert_eq!(orchestrator.stats().await.critical_runs, 1);
}

// =============================================================================
// Bilingual output
// =============================================================================

#[tokio::test]
async fn test_passing_retry_is_kept_over_higher_scoring_incomplete_draft() {
    let primary = Arc::new(
        ScriptedService::new(bilingual_text(FAIR_DE, FAIR_EN)).then_text(GOOD_DE),
    );
    let (orchestrator, log) = setup(&primary);

    let outcome = orchestrator
        .run(&bilingual_request("req-1", 1), &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.attempts, 2);
    assert!(!outcome.review_required);
    assert!(outcome.evaluation.missing_languages.is_empty());
    assert!(outcome.result.fallback.is_none());
    assert!((outcome.evaluation.combined_score - FAIR_SCORE).abs() < 1e-9);

    let records = log.records(outcome.template_version.id).await;
    let superseded = records
        .iter()
        .find(|r| !r.is_final_attempt())
        .and_then(FeedbackRecord::evaluation)
        .expect("superseded attempt");
    assert!(superseded.combined_score > outcome.evaluation.combined_score);
    assert_eq!(superseded.missing_languages, vec!["en".to_string()]);
}

#[tokio::test]
async fn test_missing_delimiter_falls_back_and_retries() {
    let primary = Arc::new(
        ScriptedService::new(bilingual_text(GOOD_DE, GOOD_EN)).then_text(GOOD_DE),
    );
    let (orchestrator, log) = setup(&primary);

    let outcome = orchestrator
        .run(&bilingual_request("req-1", 1), &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.attempts, 2);
    assert!(!outcome.review_required);
    assert!(outcome.result.fallback.is_none());
    assert_eq!(outcome.result.sections.len(), 2);
    assert!(outcome
        .trace
        .entries()
        .iter()
        .any(|e| e.state == RunState::Split && e.note.as_deref() == Some("bilingual_parsing")));

    let records = log.records(outcome.template_version.id).await;
    let first = records
        .iter()
        .find(|r| !r.is_final_attempt())
        .expect("superseded attempt");
    match &first.kind {
        FeedbackKind::Attempt {
            fallback,
            evaluation,
            ..
        } => {
            assert_eq!(fallback, &Some(SplitFallback::BilingualParsing));
            assert_eq!(evaluation.missing_languages, vec!["en".to_string()]);
        }
        FeedbackKind::Rating { .. } => panic!("expected an attempt record"),
    }
}

#[tokio::test]
async fn test_bilingual_prompt_carries_delimiter() {
    let primary = scripted(&bilingual_text(GOOD_DE, GOOD_EN));
    let (orchestrator, _log) = setup(&primary);

    let outcome = orchestrator
        .run(&bilingual_request("req-1", 1), &CancelToken::new())
        .await
        .unwrap();

    let delimiter = outcome.prompt.delimiter().expect("bilingual delimiter");
    assert!(outcome.prompt.is_bilingual());
    assert!(primary.prompts()[0].contains(delimiter));
    assert_eq!(outcome.result.section("de").map(|s| s.text.as_str()), Some(GOOD_DE));
    assert_eq!(outcome.result.section("en").map(|s| s.text.as_str()), Some(GOOD_EN));
    assert_eq!(outcome.evaluation.languages.len(), 2);
}

// =============================================================================
// Transport and cancellation
// =============================================================================

#[tokio::test]
async fn test_transport_failure_without_draft_fails_run() {
    let primary = Arc::new(ScriptedService::new(GOOD_EN).then_error(GenerationError::Api {
        status: 400,
        message: "bad request".to_string(),
    }));
    let (orchestrator, log) = setup(&primary);

    let err = orchestrator
        .run(&chapter_request("req-1", 1), &CancelToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RunError::Transport(GenerationError::Api { status: 400, .. })
    ));
    assert!(log.is_empty().await);
    assert_eq!(orchestrator.stats().await.failed_runs, 1);
}

#[tokio::test]
async fn test_transport_failure_after_draft_keeps_best_attempt() {
    let primary = Arc::new(
        ScriptedService::new(GOOD_EN)
            .then_text(WEAK_EN)
            .then_error(GenerationError::Unavailable("down".to_string())),
    );
    let (orchestrator, log) = setup(&primary);

    let outcome = orchestrator
        .run(&chapter_request("req-1", 1), &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.attempts, 2);
    assert!(outcome.review_required);
    assert!((outcome.evaluation.combined_score - WEAK_SCORE).abs() < 1e-9);
    assert_eq!(log.records(outcome.template_version.id).await.len(), 1);
}

#[tokio::test]
async fn test_transient_errors_are_retried_by_transport() {
    let primary = Arc::new(
        ScriptedService::new(GOOD_EN)
            .then_error(GenerationError::RateLimited {
                retry_after_secs: None,
            })
            .then_error(GenerationError::Timeout(Duration::from_millis(10))),
    );
    let log = Arc::new(InMemoryFeedbackLog::new());
    let orchestrator = builder(&primary, &log)
        .with_transport(TransportConfig {
            max_attempts: 3,
            ..fast_transport()
        })
        .build();

    let outcome = orchestrator
        .run(&chapter_request("req-1", 1), &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.attempts, 1);
    assert_eq!(outcome.result.transport_attempts, 3);
    assert_eq!(primary.calls(), 3);
}

#[tokio::test]
async fn test_cancelled_before_start_records_nothing() {
    let primary = scripted(GOOD_EN);
    let (orchestrator, log) = setup(&primary);
    let cancel = CancelToken::new();
    cancel.cancel();

    let err = orchestrator
        .run(&chapter_request("req-1", 1), &cancel)
        .await
        .unwrap_err();

    assert_eq!(err, RunError::Cancelled);
    assert_eq!(primary.calls(), 0);
    assert!(log.is_empty().await);
    assert_eq!(orchestrator.stats().await.cancelled_runs, 1);
}

#[tokio::test]
async fn test_cancel_interrupts_in_flight_call() {
    let primary = Arc::new(ScriptedService::new(GOOD_EN).with_delay(Duration::from_secs(10)));
    let (orchestrator, log) = setup(&primary);
    let cancel = CancelToken::new();
    let request = chapter_request("req-1", 1);

    let (result, _) = tokio::join!(orchestrator.run(&request, &cancel), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
    });

    assert_eq!(result.unwrap_err(), RunError::Cancelled);
    assert_eq!(primary.calls(), 1);
    assert!(log.is_empty().await);
}

#[tokio::test]
async fn test_invalid_request_is_rejected_before_generation() {
    let primary = scripted(GOOD_EN);
    let (orchestrator, _log) = setup(&primary);

    let err = orchestrator
        .run(&chapter_request("req-1", 0), &CancelToken::new())
        .await
        .unwrap_err();

    assert_eq!(err, RunError::Input(RequestError::InvalidChapterNumber));
    assert_eq!(primary.calls(), 0);
}

// =============================================================================
// Prompt optimisation
// =============================================================================

#[tokio::test]
async fn test_optimization_drafts_both_prompts_and_records_discarded_cost() {
    let primary = scripted(GOOD_EN);
    let refinement = Arc::new(
        ScriptedService::new("Write a warm chapter about Tom and a lantern.").with_id("refiner"),
    );
    let log = Arc::new(InMemoryFeedbackLog::new());
    let orchestrator = builder(&primary, &log)
        .with_refinement(refinement.clone())
        .with_optimization(true)
        .build();

    let outcome = orchestrator
        .run(&chapter_request("req-1", 1), &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(refinement.calls(), 1);
    assert_eq!(primary.calls(), 2);
    assert!(refinement.prompts()[0].contains("Improve the following prompt"));
    assert_eq!(outcome.trace.count(RunState::Optimize), 1);

    assert_eq!(outcome.cost.calls.len(), 3);
    assert!((outcome.cost.by_role(ServiceRole::Refinement) - CALL_COST_USD).abs() < 1e-12);
    assert!((outcome.cost.by_role(ServiceRole::Primary) - 2.0 * CALL_COST_USD).abs() < 1e-12);

    // Equal scores keep the original prompt.
    let records = log.records(outcome.template_version.id).await;
    assert_eq!(records.len(), 2);
    let kept = records.iter().find(|r| r.is_final_attempt()).unwrap();
    let lost = records.iter().find(|r| !r.is_final_attempt()).unwrap();
    assert_eq!(branch(kept), Some(Branch::Original));
    assert_eq!(branch(lost), Some(Branch::Refined));
    assert_eq!(disposition(lost), Some(AttemptDisposition::Discarded));
    assert_ne!(kept.prompt_hash, lost.prompt_hash);
}

#[tokio::test]
async fn test_refined_branch_wins_when_it_scores_higher() {
    // The original prompt is drafted first and gets the weak text.
    let primary = Arc::new(ScriptedService::new(GOOD_EN).then_text(WEAK_EN));
    let refinement = scripted("Write a warm chapter about Tom.");
    let log = Arc::new(InMemoryFeedbackLog::new());
    let orchestrator = builder(&primary, &log)
        .with_refinement(refinement.clone())
        .with_optimization(true)
        .build();

    let outcome = orchestrator
        .run(&chapter_request("req-1", 1), &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.attempts, 1);
    assert!(!outcome.review_required);
    let records = log.records(outcome.template_version.id).await;
    let kept = records.iter().find(|r| r.is_final_attempt()).unwrap();
    assert_eq!(kept.prompt_hash, outcome.prompt.hash());
    assert_eq!(outcome.result.prompt_hash, outcome.prompt.hash());
}

#[tokio::test]
async fn test_refinement_cost_kept_when_both_drafts_fail() {
    let rejected = || GenerationError::Api {
        status: 400,
        message: "bad request".to_string(),
    };
    let primary = Arc::new(
        ScriptedService::new(GOOD_EN)
            .then_text(WEAK_EN)
            .then_text(WEAK_EN)
            .then_error(rejected())
            .then_error(rejected()),
    );
    let refinement = scripted("Write a warm chapter about Tom.");
    let log = Arc::new(InMemoryFeedbackLog::new());
    let orchestrator = builder(&primary, &log)
        .with_refinement(refinement.clone())
        .with_config(OrchestratorConfig {
            enable_optimization: true,
            optimize_on_retries: true,
            ..Default::default()
        })
        .build();

    let outcome = orchestrator
        .run(&chapter_request("req-1", 1), &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.attempts, 2);
    assert!(outcome.review_required);
    assert_eq!(refinement.calls(), 2);
    assert_eq!(primary.calls(), 4);
    assert_eq!(outcome.cost.calls.len(), 5);
    assert!((outcome.cost.by_role(ServiceRole::Refinement) - 2.0 * CALL_COST_USD).abs() < 1e-12);

    let records = log.records(outcome.template_version.id).await;
    let recorded: f64 = records
        .iter()
        .map(|r| match &r.kind {
            FeedbackKind::Attempt { cost, .. } => cost.total_usd(),
            FeedbackKind::Rating { .. } => 0.0,
        })
        .sum();
    assert!((recorded - outcome.cost.total_usd()).abs() < 1e-12);
}

#[tokio::test]
async fn test_exceeded_budget_skips_optimization() {
    let primary = scripted(GOOD_EN);
    let refinement = scripted("unused");
    let mut tracker = CostTracker::new(CostBudgetConfig {
        daily_budget_usd: Some(0.001),
        ..Default::default()
    });
    tracker.record(&CallCost {
        role: ServiceRole::Primary,
        provider_id: "scripted".to_string(),
        model_id: "scripted-1".to_string(),
        usage: usage(),
        cost_usd: 0.01,
    });
    let log = Arc::new(InMemoryFeedbackLog::new());
    let orchestrator = builder(&primary, &log)
        .with_refinement(refinement.clone())
        .with_optimization(true)
        .with_cost_tracker(Arc::new(RwLock::new(tracker)))
        .build();

    let outcome = orchestrator
        .run(&chapter_request("req-1", 1), &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(refinement.calls(), 0);
    assert_eq!(primary.calls(), 1);
    assert_eq!(outcome.trace.count(RunState::Optimize), 0);
}

#[tokio::test]
async fn test_failed_refinement_falls_back_to_original_prompt() {
    let primary = scripted(GOOD_EN);
    let refinement = Arc::new(ScriptedService::new("unused").then_error(GenerationError::Api {
        status: 401,
        message: "unauthorized".to_string(),
    }));
    let log = Arc::new(InMemoryFeedbackLog::new());
    let orchestrator = builder(&primary, &log)
        .with_refinement(refinement.clone())
        .with_optimization(true)
        .build();

    let outcome = orchestrator
        .run(&chapter_request("req-1", 1), &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(primary.calls(), 1);
    assert_eq!(outcome.cost.calls.len(), 1);
    assert!(!outcome.review_required);
}

// =============================================================================
// Batches, artifacts, ratings
// =============================================================================

#[tokio::test]
async fn test_batch_runs_every_request() {
    let primary = Arc::new(ScriptedService::new(GOOD_EN).with_delay(Duration::from_millis(5)));
    let (orchestrator, _log) = setup(&primary);
    let requests: Vec<_> = (1..=4)
        .map(|n| chapter_request(&format!("req-{n}"), n))
        .collect();

    let items = orchestrator
        .run_batch(requests, Some(2), &CancelToken::new())
        .await;

    assert_eq!(items.len(), 4);
    let ids: HashSet<_> = items.iter().map(|i| i.request_id.clone()).collect();
    assert_eq!(ids.len(), 4);
    let versions: HashSet<_> = items
        .iter()
        .map(|i| i.result.as_ref().unwrap().template_version.id)
        .collect();
    assert_eq!(versions.len(), 1);
    assert_eq!(orchestrator.stats().await.finalized_runs, 4);
}

#[tokio::test]
async fn test_cancelled_batch_reports_every_request() {
    let primary = scripted(GOOD_EN);
    let (orchestrator, log) = setup(&primary);
    let cancel = CancelToken::new();
    cancel.cancel();
    let requests = vec![chapter_request("a", 1), chapter_request("b", 2)];

    let items = orchestrator.run_batch(requests, None, &cancel).await;

    assert_eq!(items.len(), 2);
    assert!(items
        .iter()
        .all(|i| matches!(i.result, Err(RunError::Cancelled))));
    assert!(log.is_empty().await);
}

#[tokio::test]
async fn test_second_run_diffs_against_previous_prompt() {
    let primary = scripted(GOOD_EN);
    let (orchestrator, _log) = setup(&primary);
    let cancel = CancelToken::new();

    let first = orchestrator.run(&chapter_request("req-1", 1), &cancel).await.unwrap();
    let second = orchestrator.run(&chapter_request("req-2", 2), &cancel).await.unwrap();

    assert!(first.diff.is_none());
    let diff = second.diff.expect("diff against the first prompt");
    assert!(diff.similarity > 0.5);
    assert_eq!(first.template_version.id, second.template_version.id);
}

#[tokio::test]
async fn test_artifacts_for_bilingual_run() {
    let primary = scripted(&bilingual_text(GOOD_DE, GOOD_EN));
    let (orchestrator, _log) = setup(&primary);

    let outcome = orchestrator
        .run(&bilingual_request("req-7", 3), &CancelToken::new())
        .await
        .unwrap();
    let artifacts = outcome.artifacts().unwrap();

    let names: Vec<_> = artifacts.files.iter().map(|f| f.file_name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "chapter_03_de.txt",
            "chapter_03_en.txt",
            "chapter_03_bilingual.txt",
            "chapter_03_meta.json"
        ]
    );
    assert_eq!(artifacts.file("chapter_03_de.txt").unwrap().contents, GOOD_DE);
    let combined = &artifacts.file("chapter_03_bilingual.txt").unwrap().contents;
    assert!(combined.starts_with("## DE"));
    assert!(combined.contains("## EN"));
    assert!(combined.contains("---"));

    let meta: serde_json::Value =
        serde_json::from_str(&artifacts.file("chapter_03_meta.json").unwrap().contents).unwrap();
    assert_eq!(meta["prompt_hash"], outcome.prompt.hash());
    assert_eq!(meta["request_id"], "req-7");
    assert_eq!(meta["attempts"], 1);

    let dir = tempfile::tempdir().unwrap();
    let written = artifacts.write_to(dir.path()).await.unwrap();
    assert_eq!(written.len(), 4);
    assert!(written.iter().all(|p| p.exists()));
}

#[tokio::test]
async fn test_rating_feeds_aggregated_feedback() {
    let primary = scripted(GOOD_EN);
    let (orchestrator, log) = setup(&primary);

    let outcome = orchestrator
        .run(&chapter_request("req-1", 1), &CancelToken::new())
        .await
        .unwrap();
    let version = outcome.template_version.id;
    assert_eq!(log.aggregated_feedback(version).await, None);

    orchestrator
        .rate(&outcome, Rating::new(5).unwrap(), Some("lovely".to_string()))
        .await
        .unwrap();
    orchestrator
        .rate(&outcome, Rating::new(3).unwrap(), None)
        .await
        .unwrap();

    let aggregated = log.aggregated_feedback(version).await.unwrap();
    assert!((aggregated - 0.75).abs() < 1e-9);
    assert_eq!(log.records(version).await.len(), 3);
}
