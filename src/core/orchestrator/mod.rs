//! Generation & Evaluation Orchestrator
//!
//! Drives one run per request through
//! `INIT → COMPOSE → (OPTIMIZE?) → GENERATE → SPLIT → EVALUATE → DECIDE`
//! and then either back to `COMPOSE` with retry directives, on to
//! `PROMOTE_CHECK`, or to `FAIL`. Every request that gets at least one
//! evaluated draft yields a result; exhausted retries only mark it for
//! review.
//!
//! Runs share the profile store, the feedback log, the governor and the
//! cost tracker. Nothing else is shared between runs.

mod artifacts;
mod builder;
mod config;
mod state;
mod stats;

pub use artifacts::{ArtifactError, ArtifactFile, CostSummary, RunArtifacts, RunMetadata};
pub use builder::OrchestratorBuilder;
pub use config::{OrchestratorConfig, MAX_QUALITY_RETRIES};
pub use state::{
    decide, retry_directives, AttemptOutcome, Decision, RetryReason, RunState, RunTrace,
    TraceEntry,
};
pub use stats::RunStats;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::core::cancel::CancelToken;
use crate::core::composition::{
    CompiledPrompt, CompositionEngine, CompositionOverrides, LayerOutcome, PromptDiff,
};
use crate::core::cost::{CallCost, CostTracker, RunCost, ServiceRole, TokenUsage};
use crate::core::evaluation::{EvaluationContext, EvaluationResult, Evaluator};
use crate::core::feedback::{
    AttemptDisposition, Branch, FeedbackError, FeedbackKind, FeedbackLog, FeedbackRecord, Rating,
};
use crate::core::generation::{
    split_output, GenerationError, GenerationResult, ResilientService, ServiceRequest,
    TextGenerationService,
};
use crate::core::lifecycle::{
    DriftAlert, LifecycleState, PromotionDecision, SegmentKey, TemplateGovernor, TemplateKey,
    TemplateVersion, TemplateVersionId,
};
use crate::core::profiles::ProfileStore;
use crate::core::request::{GenerationRequest, RequestError};

/// Terminal run failures. Quality problems are never errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RunError {
    #[error("Invalid request: {0}")]
    Input(#[from] RequestError),

    #[error("Generation failed: {0}")]
    Transport(GenerationError),

    #[error("Run cancelled")]
    Cancelled,
}

/// The finalised result of a run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub request_id: String,
    pub project_id: String,
    pub chapter_number: u32,
    pub template_version: TemplateVersion,
    /// Prompt of the kept attempt.
    pub prompt: CompiledPrompt,
    pub result: GenerationResult,
    pub evaluation: EvaluationResult,
    pub review_required: bool,
    pub critical: bool,
    /// Attempts made, A/B branches counted once.
    pub attempts: u32,
    /// Every call of the run, discarded branches included.
    pub cost: RunCost,
    pub trace: RunTrace,
    /// How each layer was resolved for the first prompt.
    pub layers: Vec<LayerOutcome>,
    /// Line diff against the last prompt kept for the same template version.
    pub diff: Option<PromptDiff>,
    pub promotion: Option<PromotionDecision>,
    pub drift_alerts: Vec<DriftAlert>,
    pub feedback_recorded: bool,
    pub duration_ms: u64,
}

impl RunOutcome {
    pub fn artifacts(&self) -> Result<RunArtifacts, ArtifactError> {
        RunArtifacts::from_outcome(self)
    }
}

/// One entry of a batch, in completion order.
#[derive(Debug)]
pub struct BatchItem {
    pub request_id: String,
    pub result: Result<RunOutcome, RunError>,
}

/// A draft that has been split and evaluated.
#[derive(Debug, Clone)]
struct Attempt {
    number: u32,
    branch: Branch,
    prompt: CompiledPrompt,
    result: GenerationResult,
    evaluation: EvaluationResult,
    cost: RunCost,
    discarded: bool,
}

struct Draft {
    result: GenerationResult,
    call: CallCost,
}

const REFINEMENT_INSTRUCTIONS: &str = "Improve the following prompt for a chapter-writing model. \
Keep every requirement, audience constraint and language instruction. Make the instructions \
clearer and more concrete. Return only the improved prompt.";

pub struct Orchestrator {
    config: OrchestratorConfig,
    composer: CompositionEngine,
    evaluator: Evaluator,
    profiles: Arc<ProfileStore>,
    primary: ResilientService,
    refinement: Option<ResilientService>,
    feedback: Arc<dyn FeedbackLog>,
    governor: Arc<TemplateGovernor>,
    costs: Arc<RwLock<CostTracker>>,
    stats: RwLock<RunStats>,
    history: RwLock<HashMap<TemplateVersionId, CompiledPrompt>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("primary", &self.primary)
            .field("refinement", &self.refinement)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn builder(primary: Arc<dyn TextGenerationService>) -> OrchestratorBuilder {
        OrchestratorBuilder::new(primary)
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn profiles(&self) -> &Arc<ProfileStore> {
        &self.profiles
    }

    pub fn governor(&self) -> &Arc<TemplateGovernor> {
        &self.governor
    }

    pub fn feedback_log(&self) -> &Arc<dyn FeedbackLog> {
        &self.feedback
    }

    pub fn cost_tracker(&self) -> Arc<RwLock<CostTracker>> {
        Arc::clone(&self.costs)
    }

    pub async fn stats(&self) -> RunStats {
        self.stats.read().await.clone()
    }

    // ========================================================================
    // Runs
    // ========================================================================

    /// Run one request to completion.
    #[instrument(skip_all, fields(request_id = %request.request_id, chapter = request.chapter_number))]
    pub async fn run(
        &self,
        request: &GenerationRequest,
        cancel: &CancelToken,
    ) -> Result<RunOutcome, RunError> {
        let started = Instant::now();
        let mut spent = RunCost::default();
        let outcome = self.execute(request, cancel, &mut spent, started).await;

        let mut stats = self.stats.write().await;
        match &outcome {
            Ok(o) => {
                stats.record_finalized(
                    o.attempts,
                    o.duration_ms,
                    o.cost.total_usd(),
                    o.review_required,
                    o.critical,
                )
            }
            Err(RunError::Cancelled) => {
                info!("Run cancelled");
                stats.record_cancelled(spent.total_usd());
            }
            Err(e) => {
                warn!(error = %e, "Run failed");
                stats.record_failure(spent.total_usd());
            }
        }
        outcome
    }

    /// Run requests concurrently, at most `concurrency` at a time (the
    /// configured default when `None`). Results arrive in completion order.
    pub async fn run_batch(
        &self,
        requests: Vec<GenerationRequest>,
        concurrency: Option<usize>,
        cancel: &CancelToken,
    ) -> Vec<BatchItem> {
        let limit = concurrency.unwrap_or(self.config.batch_concurrency).max(1);
        info!(requests = requests.len(), concurrency = limit, "Starting batch");
        stream::iter(requests)
            .map(|request| async move {
                let result = self.run(&request, cancel).await;
                BatchItem {
                    request_id: request.request_id,
                    result,
                }
            })
            .buffer_unordered(limit)
            .collect()
            .await
    }

    /// Append a user rating for a finished run.
    pub async fn rate(
        &self,
        outcome: &RunOutcome,
        rating: Rating,
        comment: Option<String>,
    ) -> Result<(), FeedbackError> {
        let record = FeedbackRecord::rating(
            outcome.template_version.id,
            outcome.prompt.hash(),
            outcome.request_id.as_str(),
            rating,
            comment,
        );
        self.feedback
            .append_batch(outcome.template_version.id, vec![record])
            .await
    }

    async fn execute(
        &self,
        request: &GenerationRequest,
        cancel: &CancelToken,
        spent: &mut RunCost,
        started: Instant,
    ) -> Result<RunOutcome, RunError> {
        let mut trace = RunTrace::new();
        trace.enter(0, RunState::Init);
        if let Err(e) = request.validate() {
            trace.note(0, RunState::Fail, e.to_string());
            return Err(RunError::Input(e));
        }

        let snapshot = self.profiles.snapshot();
        let (audience, audience_fell_back) = snapshot.audience(&request.audience);
        if audience_fell_back {
            debug!(audience = %request.audience, "Unknown audience, using default profile");
        }
        let languages = request.effective_languages(&self.composer.config().default_language);
        let key = TemplateKey::new(&request.audience, &request.genre, &request.emotion, &languages);
        let ctx = EvaluationContext {
            snapshot: &snapshot,
            audience,
            emotion: &request.emotion,
            target_words: request.target_words,
            forbidden_topics: &request.forbidden_topics,
            expected_languages: &languages,
        };
        let word_band = self.evaluator.word_band(audience, request.target_words);
        let max_attempts = self.config.max_attempts();

        let mut attempts: Vec<Attempt> = Vec::new();
        let mut overrides = CompositionOverrides::default();
        let mut previous: Option<CompiledPrompt> = None;
        let mut version: Option<TemplateVersion> = None;
        let mut layers = Vec::new();
        let mut history_diff = None;
        let mut forced_review = false;
        let mut unattributed: Vec<CallCost> = Vec::new();
        let mut made = 0;

        for number in 1..=max_attempts {
            if cancel.is_cancelled() {
                return Err(RunError::Cancelled);
            }
            made = number;

            trace.enter(number, RunState::Compose);
            let composition = self
                .composer
                .compose(&snapshot, request, &overrides, previous.as_ref())?;
            if let Some(diff) = &composition.diff {
                trace.note(
                    number,
                    RunState::Compose,
                    format!("+{} -{} lines", diff.added, diff.removed),
                );
            }
            if version.is_none() {
                let registered = self
                    .governor
                    .register_bundle(&key, &composition.bundle_hashes, Utc::now())
                    .await;
                history_diff = self.history_diff(registered.id, &composition.prompt).await;
                layers = composition.layers.clone();
                version = Some(registered);
            }
            let prompt = composition.prompt;
            previous = Some(prompt.clone());

            let step = self
                .attempt(number, &prompt, &ctx, cancel, &mut trace, spent, &mut unattributed)
                .await;
            trace.enter(number, RunState::Decide);
            let decision = match step {
                Ok((kept, discarded)) => {
                    let decision = decide(AttemptOutcome::Evaluated(&kept.evaluation), number, max_attempts);
                    attempts.push(kept);
                    attempts.extend(discarded);
                    decision
                }
                Err(GenerationError::Cancelled) => return Err(RunError::Cancelled),
                Err(e) => {
                    let has_prior_result = attempts.iter().any(|a| !a.discarded);
                    let decision = decide(
                        AttemptOutcome::TransportFailed {
                            error: &e,
                            has_prior_result,
                        },
                        number,
                        max_attempts,
                    );
                    if decision == Decision::Fail {
                        trace.note(number, RunState::Fail, e.to_string());
                        return Err(RunError::Transport(e));
                    }
                    warn!(attempt = number, error = %e, "Generation failed, keeping best earlier attempt");
                    decision
                }
            };

            match decision {
                Decision::Retry(reason) => {
                    let Some(last) = attempts.iter().rev().find(|a| !a.discarded) else {
                        break;
                    };
                    let directives = retry_directives(
                        &reason,
                        &last.evaluation,
                        &audience.thresholds,
                        word_band,
                        &request.emotion,
                    );
                    info!(
                        attempt = number,
                        score = last.evaluation.combined_score,
                        reason = ?reason,
                        "Retrying generation"
                    );
                    trace.note(number, RunState::Retry, format!("{reason:?}"));
                    overrides = CompositionOverrides::retry(directives);
                }
                Decision::Finalize { review_required } => {
                    forced_review = review_required;
                    break;
                }
                Decision::Fail => break,
            }
        }

        if cancel.is_cancelled() {
            return Err(RunError::Cancelled);
        }

        let (Some(best_index), Some(version)) = (best_attempt(&attempts), version) else {
            trace.note(made, RunState::Fail, "no evaluated attempt");
            return Err(RunError::Transport(GenerationError::MalformedResponse(
                "run produced no evaluated attempt".to_string(),
            )));
        };

        trace.enter(made, RunState::PromoteCheck);
        // Calls from attempts that produced no draft are charged to the final one.
        attempts[best_index].cost.calls.extend(unattributed);
        let run_cost = attempts.iter().fold(RunCost::default(), |mut acc, a| {
            acc.calls.extend(a.cost.calls.iter().cloned());
            acc
        });
        let feedback_recorded = self
            .record_feedback(request, version.id, &attempts, best_index)
            .await;

        let best = attempts.swap_remove(best_index);
        let (template_version, promotion, drift_alerts) =
            self.promote_check(request, version, &best.evaluation).await;
        self.history
            .write()
            .await
            .insert(template_version.id, best.prompt.clone());

        let review_required = forced_review || best.evaluation.review_required || best.evaluation.critical;
        let duration_ms = started.elapsed().as_millis() as u64;
        info!(
            attempts = made,
            score = best.evaluation.combined_score,
            review_required,
            critical = best.evaluation.critical,
            prompt_hash = %best.prompt.short_hash(),
            template_version = template_version.version,
            cost_usd = run_cost.total_usd(),
            duration_ms,
            "Run finalized"
        );

        Ok(RunOutcome {
            request_id: request.request_id.clone(),
            project_id: request.project_id.clone(),
            chapter_number: request.chapter_number,
            template_version,
            critical: best.evaluation.critical,
            review_required,
            prompt: best.prompt,
            result: best.result,
            evaluation: best.evaluation,
            attempts: made,
            cost: run_cost,
            trace,
            layers,
            diff: history_diff,
            promotion,
            drift_alerts,
            feedback_recorded,
            duration_ms,
        })
    }

    // ========================================================================
    // Attempt steps
    // ========================================================================

    /// Generate and evaluate one attempt. With optimisation on, both the
    /// original and the refined prompt are drafted and the better one kept;
    /// the other comes back as a discarded attempt.
    async fn attempt(
        &self,
        number: u32,
        prompt: &CompiledPrompt,
        ctx: &EvaluationContext<'_>,
        cancel: &CancelToken,
        trace: &mut RunTrace,
        spent: &mut RunCost,
        unattributed: &mut Vec<CallCost>,
    ) -> Result<(Attempt, Option<Attempt>), GenerationError> {
        let refined = if self.should_optimize(number).await {
            trace.enter(number, RunState::Optimize);
            self.refine(prompt, cancel).await?
        } else {
            None
        };
        if let Some((_, call)) = &refined {
            spent.push(call.clone());
        }

        trace.enter(number, RunState::Generate);
        let Some((refined_prompt, refine_call)) = refined else {
            let draft = self.draft(prompt, cancel).await?;
            spent.push(draft.call.clone());
            note_split(trace, number, &draft.result);
            trace.enter(number, RunState::Evaluate);
            let attempt = self.evaluate(number, Branch::Original, prompt.clone(), draft, ctx, Vec::new());
            return Ok((attempt, None));
        };

        let (original, improved) = tokio::join!(
            self.draft(prompt, cancel),
            self.draft(&refined_prompt, cancel)
        );
        if matches!(original, Err(GenerationError::Cancelled))
            || matches!(improved, Err(GenerationError::Cancelled))
        {
            return Err(GenerationError::Cancelled);
        }
        for draft in [&original, &improved].into_iter().flatten() {
            spent.push(draft.call.clone());
        }

        match (original, improved) {
            (Ok(o), Ok(r)) => {
                note_split(trace, number, &o.result);
                note_split(trace, number, &r.result);
                trace.enter(number, RunState::Evaluate);
                let original = self.evaluate(number, Branch::Original, prompt.clone(), o, ctx, Vec::new());
                let refined = self.evaluate(number, Branch::Refined, refined_prompt, r, ctx, vec![refine_call]);
                let (kept, mut lost) = if refined.evaluation.ranks_above(&original.evaluation) {
                    (refined, original)
                } else {
                    (original, refined)
                };
                lost.discarded = true;
                debug!(
                    attempt = number,
                    kept = ?kept.branch,
                    kept_score = kept.evaluation.combined_score,
                    discarded_score = lost.evaluation.combined_score,
                    "A/B comparison"
                );
                Ok((kept, Some(lost)))
            }
            (Ok(o), Err(e)) => {
                warn!(error = %e, "Refined branch failed, using original prompt");
                note_split(trace, number, &o.result);
                trace.enter(number, RunState::Evaluate);
                Ok((self.evaluate(number, Branch::Original, prompt.clone(), o, ctx, vec![refine_call]), None))
            }
            (Err(e), Ok(r)) => {
                warn!(error = %e, "Original branch failed, using refined prompt");
                note_split(trace, number, &r.result);
                trace.enter(number, RunState::Evaluate);
                Ok((self.evaluate(number, Branch::Refined, refined_prompt, r, ctx, vec![refine_call]), None))
            }
            (Err(e), Err(_)) => {
                unattributed.push(refine_call);
                Err(e)
            }
        }
    }

    async fn should_optimize(&self, number: u32) -> bool {
        if self.refinement.is_none() || !self.config.enable_optimization {
            return false;
        }
        if number > 1 && !self.config.optimize_on_retries {
            return false;
        }
        let within_budget = self.costs.read().await.is_within_budget();
        if !within_budget {
            warn!("Cost budget exceeded, skipping prompt optimization");
        }
        within_budget
    }

    /// Ask the refinement service for a better prompt. Failures other than
    /// cancellation fall back to the original prompt.
    async fn refine(
        &self,
        prompt: &CompiledPrompt,
        cancel: &CancelToken,
    ) -> Result<Option<(CompiledPrompt, CallCost)>, GenerationError> {
        let Some(service) = &self.refinement else {
            return Ok(None);
        };
        let mut instructions = REFINEMENT_INSTRUCTIONS.to_string();
        if let Some(delimiter) = prompt.delimiter() {
            instructions.push_str(&format!(" Keep the line {delimiter} exactly as written."));
        }
        let request = ServiceRequest::new(format!("{instructions}\n\n---\n\n{}", prompt.text()))
            .with_params(self.config.refinement_params.clone());

        match service.call(&request, cancel).await {
            Ok(call) => {
                let usage = call.response.usage;
                let cost = self.record_call(service, ServiceRole::Refinement, usage).await;
                let refined = prompt.refined(&call.response.text);
                debug!(
                    original = %prompt.short_hash(),
                    refined = %refined.short_hash(),
                    "Prompt refined"
                );
                Ok(Some((refined, cost)))
            }
            Err(GenerationError::Cancelled) => Err(GenerationError::Cancelled),
            Err(e) => {
                warn!(error = %e, "Refinement failed, continuing with the original prompt");
                Ok(None)
            }
        }
    }

    /// One primary call, split into language sections.
    async fn draft(&self, prompt: &CompiledPrompt, cancel: &CancelToken) -> Result<Draft, GenerationError> {
        let request = ServiceRequest::new(prompt.text()).with_params(self.config.primary_params.clone());
        let call = self.primary.call(&request, cancel).await?;
        let usage = call.response.usage;
        let cost = self.record_call(&self.primary, ServiceRole::Primary, usage).await;

        let split = split_output(&call.response.text, prompt.languages(), prompt.delimiter());
        if let Some(fallback) = &split.fallback {
            warn!(fallback = fallback.as_str(), prompt_hash = %prompt.short_hash(), "Output split fell back");
        }
        let mut result = GenerationResult::new(prompt.hash(), split.sections, usage, cost.cost_usd);
        result.provider_id = cost.provider_id.clone();
        result.model_id = cost.model_id.clone();
        result.fallback = split.fallback;
        result.transport_attempts = call.attempts;
        result.latency_ms = call.latency.as_millis() as u64;
        Ok(Draft { result, call: cost })
    }

    async fn record_call(&self, service: &ResilientService, role: ServiceRole, usage: TokenUsage) -> CallCost {
        let mut tracker = self.costs.write().await;
        let cost_usd = match service.pricing() {
            Some(pricing) => pricing.calculate_cost(&usage),
            None => tracker.price(service.id(), service.model(), &usage),
        };
        let call = CallCost {
            role,
            provider_id: service.id().to_string(),
            model_id: service.model().to_string(),
            usage,
            cost_usd,
        };
        tracker.record(&call);
        call
    }

    fn evaluate(
        &self,
        number: u32,
        branch: Branch,
        prompt: CompiledPrompt,
        draft: Draft,
        ctx: &EvaluationContext<'_>,
        extra: Vec<CallCost>,
    ) -> Attempt {
        let evaluation = self.evaluator.evaluate(&draft.result, ctx);
        debug!(
            attempt = number,
            branch = ?branch,
            score = evaluation.combined_score,
            review_required = evaluation.review_required,
            critical = evaluation.critical,
            "Draft evaluated"
        );
        let mut cost = RunCost::default();
        for call in extra {
            cost.push(call);
        }
        cost.push(draft.call);
        Attempt {
            number,
            branch,
            prompt,
            result: draft.result,
            evaluation,
            cost,
            discarded: false,
        }
    }

    // ========================================================================
    // Feedback and lifecycle
    // ========================================================================

    async fn history_diff(&self, version: TemplateVersionId, prompt: &CompiledPrompt) -> Option<PromptDiff> {
        self.history
            .read()
            .await
            .get(&version)
            .map(|prior| PromptDiff::between(prior.text(), prompt.text()))
    }

    /// Append every attempt of the run as one batch.
    async fn record_feedback(
        &self,
        request: &GenerationRequest,
        version: TemplateVersionId,
        attempts: &[Attempt],
        best_index: usize,
    ) -> bool {
        let recorded_at = Utc::now();
        let records: Vec<FeedbackRecord> = attempts
            .iter()
            .enumerate()
            .map(|(i, a)| {
                let disposition = if i == best_index {
                    AttemptDisposition::Final
                } else if a.discarded {
                    AttemptDisposition::Discarded
                } else {
                    AttemptDisposition::Superseded
                };
                FeedbackRecord {
                    id: Uuid::new_v4(),
                    template_version: version,
                    prompt_hash: a.prompt.hash().to_string(),
                    request_id: request.request_id.clone(),
                    recorded_at,
                    kind: FeedbackKind::Attempt {
                        attempt: a.number,
                        branch: a.branch,
                        disposition,
                        evaluation: a.evaluation.clone(),
                        cost: a.cost.clone(),
                        fallback: a.result.fallback.clone(),
                    },
                }
            })
            .collect();

        match self.feedback.append_batch(version, records).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, template_version = %version, "Failed to append run feedback");
                false
            }
        }
    }

    async fn promote_check(
        &self,
        request: &GenerationRequest,
        version: TemplateVersion,
        evaluation: &EvaluationResult,
    ) -> (TemplateVersion, Option<PromotionDecision>, Vec<DriftAlert>) {
        let now = Utc::now();
        let segments: Vec<(SegmentKey, f64)> = evaluation
            .languages
            .iter()
            .map(|(language, l)| (SegmentKey::new(&request.audience, &request.genre, language), l.score))
            .collect();

        let (mut current, drift_alerts) = match self
            .governor
            .record_outcome(version.id, evaluation.combined_score, &segments, now)
            .await
        {
            Ok(report) => (report.version, report.drift_alerts),
            Err(e) => {
                warn!(error = %e, "Failed to record outcome");
                (version, Vec::new())
            }
        };

        let mut promotion = None;
        if self.config.auto_promote && current.state() == LifecycleState::Eligible {
            let feedback = self.feedback.aggregated_feedback(current.id).await;
            match self.governor.try_promote(current.id, feedback, now).await {
                Ok(decision) => {
                    if decision.is_approved() {
                        if let Some(updated) = self.governor.version(current.id).await {
                            current = updated;
                        }
                    }
                    promotion = Some(decision);
                }
                Err(e) => warn!(error = %e, "Promotion check failed"),
            }
        }
        (current, promotion, drift_alerts)
    }
}

fn note_split(trace: &mut RunTrace, number: u32, result: &GenerationResult) {
    match &result.fallback {
        Some(fallback) => trace.note(number, RunState::Split, fallback.as_str()),
        None => trace.enter(number, RunState::Split),
    }
}

/// Index of the best kept attempt: non-critical first, then score. Ties
/// keep the earlier attempt.
fn best_attempt(attempts: &[Attempt]) -> Option<usize> {
    attempts
        .iter()
        .enumerate()
        .filter(|(_, a)| !a.discarded)
        .fold(None, |best: Option<(usize, &Attempt)>, (i, a)| match best {
            Some((_, b)) if !a.evaluation.ranks_above(&b.evaluation) => best,
            _ => Some((i, a)),
        })
        .map(|(i, _)| i)
}
