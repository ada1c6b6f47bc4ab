//! Template lifecycle across runs: eligibility, guarded promotion, drift
//! alerts and demotion.

use std::sync::Arc;

use chrono::Utc;

use crate::core::cancel::CancelToken;
use crate::core::feedback::InMemoryFeedbackLog;
use crate::core::lifecycle::{
    DriftConfig, DriftKind, DriftSeverity, GovernorConfig, GuardrailConfig, LifecycleEventSink,
    LifecycleState, MemoryEventSink, PromotionDecision, RejectionReason, TemplateGovernor,
    TransitionReason,
};
use crate::core::orchestrator::Orchestrator;
use crate::tests::common::*;

fn orchestrator_with(primary: &Arc<ScriptedService>, governor: Arc<TemplateGovernor>) -> Orchestrator {
    Orchestrator::builder(primary.clone())
        .with_evaluator(marker_evaluator())
        .with_transport(fast_transport())
        .with_feedback_log(Arc::new(InMemoryFeedbackLog::new()))
        .with_max_quality_retries(0)
        .with_governor(governor)
        .build()
}

/// Drift windows of a single sample so a change shows up on the next run.
fn eager_drift() -> DriftConfig {
    DriftConfig {
        window_size: 1,
        baseline_windows: 1,
        min_consecutive_windows: 1,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_fifth_good_run_promotes_template() {
    let sink = Arc::new(MemoryEventSink::new());
    let primary = scripted(GOOD_EN);
    let log = Arc::new(InMemoryFeedbackLog::new());
    let orchestrator = Orchestrator::builder(primary.clone())
        .with_evaluator(marker_evaluator())
        .with_transport(fast_transport())
        .with_feedback_log(log)
        .with_event_sink(sink.clone())
        .build();
    let cancel = CancelToken::new();

    let mut outcomes = Vec::new();
    for n in 1..=5 {
        outcomes.push(
            orchestrator
                .run(&chapter_request(&format!("req-{n}"), n), &cancel)
                .await
                .unwrap(),
        );
    }

    for outcome in &outcomes[..4] {
        assert!(outcome.promotion.is_none());
        assert_eq!(outcome.template_version.state(), LifecycleState::Candidate);
    }
    let last = &outcomes[4];
    assert!(last.promotion.as_ref().is_some_and(PromotionDecision::is_approved));
    assert_eq!(last.template_version.state(), LifecycleState::Promoted);
    assert_eq!(last.template_version.sample_count, 5);
    assert!(last.template_version.promoted_at.is_some());

    let key = last.template_version.key.clone();
    let active = orchestrator.governor().active_version(&key).await.unwrap();
    assert_eq!(active.id, last.template_version.id);

    let transitions: Vec<_> = sink.events().iter().map(|e| (e.from, e.to)).collect();
    assert_eq!(
        transitions,
        vec![
            (None, LifecycleState::Candidate),
            (Some(LifecycleState::Candidate), LifecycleState::Eligible),
            (Some(LifecycleState::Eligible), LifecycleState::Promoted),
        ]
    );
}

#[tokio::test]
async fn test_low_scores_keep_template_eligible() {
    let governor = Arc::new(TemplateGovernor::new(
        GovernorConfig {
            min_samples_for_eligibility: 2,
            ..Default::default()
        },
        GuardrailConfig::default(),
        DriftConfig::default(),
        Arc::new(MemoryEventSink::new()) as Arc<dyn LifecycleEventSink>,
    ));
    let primary = scripted(WEAK_EN);
    let orchestrator = orchestrator_with(&primary, governor.clone());
    let cancel = CancelToken::new();

    orchestrator.run(&chapter_request("req-1", 1), &cancel).await.unwrap();
    let outcome = orchestrator.run(&chapter_request("req-2", 2), &cancel).await.unwrap();

    assert_eq!(outcome.template_version.state(), LifecycleState::Eligible);
    match outcome.promotion {
        Some(PromotionDecision::Rejected {
            reason: RejectionReason::InsufficientScore { combined_score, minimum },
        }) => {
            assert!(combined_score < minimum);
            assert!((combined_score - WEAK_SCORE).abs() < 1e-9);
        }
        other => panic!("expected insufficient score, got {other:?}"),
    }
    let history = governor.promotion_history(&outcome.template_version.key).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].decision.rejection_code(), Some("insufficient_score"));
}

#[tokio::test]
async fn test_score_drop_raises_alert_and_demotion_is_applied_on_request() {
    let sink = Arc::new(MemoryEventSink::new());
    let governor = Arc::new(TemplateGovernor::new(
        GovernorConfig {
            min_samples_for_eligibility: 1,
            ..Default::default()
        },
        GuardrailConfig::default(),
        eager_drift(),
        sink.clone() as Arc<dyn LifecycleEventSink>,
    ));
    let primary = Arc::new(ScriptedService::new(WEAK_EN).then_text(GOOD_EN));
    let orchestrator = orchestrator_with(&primary, governor.clone());
    let cancel = CancelToken::new();

    let first = orchestrator.run(&chapter_request("req-1", 1), &cancel).await.unwrap();
    assert_eq!(first.template_version.state(), LifecycleState::Promoted);
    assert!(first.drift_alerts.is_empty());

    let second = orchestrator.run(&chapter_request("req-2", 2), &cancel).await.unwrap();
    assert_eq!(second.drift_alerts.len(), 1);
    let alert = &second.drift_alerts[0];
    assert_eq!(alert.kind, DriftKind::ScoreDecline);
    assert_eq!(alert.severity, DriftSeverity::Critical);
    assert_eq!(alert.version_id, Some(first.template_version.id));
    assert!(alert.proposes_demotion);
    assert_eq!(alert.segment.language, "en");

    // Demotion is advisory until applied.
    assert_eq!(second.template_version.state(), LifecycleState::Promoted);
    let demoted = governor
        .apply_drift_alert(alert, Utc::now())
        .await
        .unwrap()
        .expect("promoted version demoted");
    assert_eq!(demoted.state(), LifecycleState::Deprecated);
    assert!(demoted.deprecated_at.is_some());
    assert!(governor.active_version(&demoted.key).await.is_none());

    let last = sink.events().pop().unwrap();
    assert_eq!(last.to, LifecycleState::Deprecated);
    assert!(matches!(last.reason, TransitionReason::Drift { alert_id, .. } if alert_id == alert.id));

    let summary = governor.drift_summary().await;
    assert_eq!(summary.total_alerts, 1);
    assert_eq!(summary.demotion_proposals, 1);

    let restored = governor
        .rollback(&demoted.key, demoted.version, "scores recovered", Utc::now())
        .await
        .unwrap();
    assert_eq!(restored.state(), LifecycleState::Promoted);
    assert_eq!(
        governor.active_version(&demoted.key).await.map(|v| v.id),
        Some(demoted.id)
    );
    assert!(matches!(
        sink.events().pop().unwrap().reason,
        TransitionReason::Rollback { .. }
    ));
}

#[tokio::test]
async fn test_auto_deprecation_on_drift() {
    let governor = Arc::new(TemplateGovernor::new(
        GovernorConfig {
            min_samples_for_eligibility: 1,
            auto_deprecate_on_drift: true,
            ..Default::default()
        },
        GuardrailConfig::default(),
        eager_drift(),
        Arc::new(MemoryEventSink::new()) as Arc<dyn LifecycleEventSink>,
    ));
    let primary = Arc::new(ScriptedService::new(WEAK_EN).then_text(GOOD_EN));
    let orchestrator = orchestrator_with(&primary, governor);
    let cancel = CancelToken::new();

    orchestrator.run(&chapter_request("req-1", 1), &cancel).await.unwrap();
    let second = orchestrator.run(&chapter_request("req-2", 2), &cancel).await.unwrap();

    assert_eq!(second.template_version.state(), LifecycleState::Deprecated);
    assert!(second.promotion.is_none());
}

#[tokio::test]
async fn test_governor_shared_between_orchestrators() {
    let governor = Arc::new(TemplateGovernor::new(
        GovernorConfig::default(),
        GuardrailConfig::default(),
        DriftConfig::default(),
        Arc::new(MemoryEventSink::new()) as Arc<dyn LifecycleEventSink>,
    ));
    let a = orchestrator_with(&scripted(GOOD_EN), governor.clone());
    let b = orchestrator_with(&scripted(GOOD_EN), governor.clone());
    let cancel = CancelToken::new();

    let (request_a, request_b) = (chapter_request("a", 1), chapter_request("b", 2));
    let (ra, rb) = tokio::join!(a.run(&request_a, &cancel), b.run(&request_b, &cancel));
    let (ra, rb) = (ra.unwrap(), rb.unwrap());

    assert_eq!(ra.template_version.id, rb.template_version.id);
    let version = governor.version(ra.template_version.id).await.unwrap();
    assert_eq!(version.sample_count, 2);
    assert_eq!(governor.versions(&version.key).await.len(), 1);
}
