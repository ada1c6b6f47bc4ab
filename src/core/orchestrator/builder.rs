//! Orchestrator Builder
//!
//! Only the primary service is required; everything else falls back to
//! in-memory defaults.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::{Orchestrator, OrchestratorConfig, RunStats};
use crate::config::EngineConfig;
use crate::core::composition::{CompositionConfig, CompositionEngine};
use crate::core::cost::CostTracker;
use crate::core::evaluation::{EvaluationConfig, Evaluator};
use crate::core::feedback::{FeedbackLog, InMemoryFeedbackLog};
use crate::core::generation::{ResilientService, TextGenerationService, TransportConfig};
use crate::core::lifecycle::{
    DriftConfig, GovernorConfig, GuardrailConfig, LifecycleEventSink, NoopEventSink,
    TemplateGovernor,
};
use crate::core::profiles::ProfileStore;

pub struct OrchestratorBuilder {
    primary: Arc<dyn TextGenerationService>,
    refinement: Option<Arc<dyn TextGenerationService>>,
    config: OrchestratorConfig,
    composition: CompositionConfig,
    evaluation: EvaluationConfig,
    transport: TransportConfig,
    guardrails: GuardrailConfig,
    governor_config: GovernorConfig,
    drift: DriftConfig,
    evaluator: Option<Evaluator>,
    profiles: Option<Arc<ProfileStore>>,
    feedback: Option<Arc<dyn FeedbackLog>>,
    governor: Option<Arc<TemplateGovernor>>,
    event_sink: Option<Arc<dyn LifecycleEventSink>>,
    costs: Option<Arc<RwLock<CostTracker>>>,
}

impl OrchestratorBuilder {
    pub fn new(primary: Arc<dyn TextGenerationService>) -> Self {
        Self {
            primary,
            refinement: None,
            config: OrchestratorConfig::default(),
            composition: CompositionConfig::default(),
            evaluation: EvaluationConfig::default(),
            transport: TransportConfig::default(),
            guardrails: GuardrailConfig::default(),
            governor_config: GovernorConfig::default(),
            drift: DriftConfig::default(),
            evaluator: None,
            profiles: None,
            feedback: None,
            governor: None,
            event_sink: None,
            costs: None,
        }
    }

    /// Take every section of a loaded engine configuration.
    pub fn with_engine_config(mut self, config: &EngineConfig) -> Self {
        self.config = config.orchestrator.clone();
        self.composition = config.composition.clone();
        self.evaluation = config.evaluation.clone();
        self.transport = config.transport.clone();
        self.guardrails = config.guardrails.clone();
        self.governor_config = config.governor.clone();
        self.drift = config.drift.clone();
        self
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_refinement(mut self, service: Arc<dyn TextGenerationService>) -> Self {
        self.refinement = Some(service);
        self
    }

    pub fn with_optimization(mut self, enabled: bool) -> Self {
        self.config.enable_optimization = enabled;
        self
    }

    pub fn with_max_quality_retries(mut self, retries: u32) -> Self {
        self.config.max_quality_retries = retries;
        self
    }

    pub fn with_composition(mut self, config: CompositionConfig) -> Self {
        self.composition = config;
        self
    }

    pub fn with_transport(mut self, config: TransportConfig) -> Self {
        self.transport = config;
        self
    }

    pub fn with_guardrails(mut self, config: GuardrailConfig) -> Self {
        self.guardrails = config;
        self
    }

    pub fn with_evaluator(mut self, evaluator: Evaluator) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn with_profiles(mut self, profiles: Arc<ProfileStore>) -> Self {
        self.profiles = Some(profiles);
        self
    }

    pub fn with_feedback_log(mut self, log: Arc<dyn FeedbackLog>) -> Self {
        self.feedback = Some(log);
        self
    }

    /// Share a governor between orchestrators. Governor, guardrail and
    /// drift settings of this builder are then ignored.
    pub fn with_governor(mut self, governor: Arc<TemplateGovernor>) -> Self {
        self.governor = Some(governor);
        self
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn LifecycleEventSink>) -> Self {
        self.event_sink = Some(sink);
        self
    }

    pub fn with_cost_tracker(mut self, tracker: Arc<RwLock<CostTracker>>) -> Self {
        self.costs = Some(tracker);
        self
    }

    pub fn build(self) -> Orchestrator {
        let governor = self.governor.unwrap_or_else(|| {
            let sink = self
                .event_sink
                .unwrap_or_else(|| Arc::new(NoopEventSink) as Arc<dyn LifecycleEventSink>);
            Arc::new(TemplateGovernor::new(
                self.governor_config,
                self.guardrails,
                self.drift,
                sink,
            ))
        });
        let costs = self
            .costs
            .unwrap_or_else(|| Arc::new(RwLock::new(CostTracker::new(self.config.budget.clone()))));

        Orchestrator {
            composer: CompositionEngine::new(self.composition),
            evaluator: self
                .evaluator
                .unwrap_or_else(|| Evaluator::new(self.evaluation)),
            profiles: self.profiles.unwrap_or_default(),
            primary: ResilientService::new(self.primary, self.transport.clone()),
            refinement: self
                .refinement
                .map(|service| ResilientService::new(service, self.transport)),
            feedback: self
                .feedback
                .unwrap_or_else(|| Arc::new(InMemoryFeedbackLog::new()) as Arc<dyn FeedbackLog>),
            governor,
            costs,
            stats: RwLock::new(RunStats::default()),
            history: RwLock::new(HashMap::new()),
            config: self.config,
        }
    }
}
