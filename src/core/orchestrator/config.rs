//! Orchestrator configuration.

use serde::{Deserialize, Serialize};

use crate::core::cost::CostBudgetConfig;
use crate::core::generation::GenerationParams;

/// Hard ceiling on quality retries, whatever the configuration says.
pub const MAX_QUALITY_RETRIES: u32 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Quality-driven retries after the first attempt.
    pub max_quality_retries: u32,
    /// Run the refinement service and compare both prompts.
    pub enable_optimization: bool,
    /// Also optimise retry prompts, not only the first one.
    pub optimize_on_retries: bool,
    /// Try to promote an eligible template version after each run.
    pub auto_promote: bool,
    /// Default concurrency limit for batches.
    pub batch_concurrency: usize,
    pub primary_params: GenerationParams,
    pub refinement_params: GenerationParams,
    pub budget: CostBudgetConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_quality_retries: 3,
            enable_optimization: false,
            optimize_on_retries: false,
            auto_promote: true,
            batch_concurrency: 4,
            primary_params: GenerationParams::default(),
            refinement_params: GenerationParams {
                temperature: 0.3,
                max_tokens: 2048,
            },
            budget: CostBudgetConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Total attempts per run, the first one included.
    pub fn max_attempts(&self) -> u32 {
        self.max_quality_retries.min(MAX_QUALITY_RETRIES) + 1
    }
}
