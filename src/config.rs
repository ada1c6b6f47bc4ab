use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::composition::CompositionConfig;
use crate::core::evaluation::EvaluationConfig;
use crate::core::generation::TransportConfig;
use crate::core::lifecycle::{DriftConfig, GovernorConfig, GuardrailConfig};
use crate::core::orchestrator::OrchestratorConfig;
use crate::logging::LoggingConfig;

/// Prefix of environment overrides; nested keys are split on `__`,
/// e.g. `STORYLOOM_ORCHESTRATOR__MAX_QUALITY_RETRIES=2`.
pub const ENV_PREFIX: &str = "STORYLOOM_";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] figment::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level engine configuration. Service credentials are not part of it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub composition: CompositionConfig,
    pub evaluation: EvaluationConfig,
    pub orchestrator: OrchestratorConfig,
    pub transport: TransportConfig,
    pub guardrails: GuardrailConfig,
    pub governor: GovernorConfig,
    pub drift: DriftConfig,
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Defaults, then the TOML file at `path` (if it exists), then
    /// `STORYLOOM_*` environment variables.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults and environment");
        }
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.validate()?;
        tracing::info!(path = %path.display(), "Loaded engine configuration");
        Ok(config)
    }

    /// Load from the default location (`<config dir>/storyloom/config.toml`).
    pub fn load_default() -> Result<Self, ConfigError> {
        Self::load(Self::default_path())
    }

    /// Defaults overlaid with an embedded TOML document. The environment is
    /// not consulted.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::string(toml))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("storyloom").join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("storyloom.toml"))
    }

    /// Reject values no component can work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.composition;
        if !(0.0..=1.0).contains(&c.inclusion_threshold) {
            return Err(ConfigError::Invalid(format!(
                "composition.inclusion_threshold must be within [0, 1], got {}",
                c.inclusion_threshold
            )));
        }
        if c.language_delimiter.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "composition.language_delimiter must not be empty".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.evaluation.review_threshold) {
            return Err(ConfigError::Invalid(format!(
                "evaluation.review_threshold must be within [0, 1], got {}",
                self.evaluation.review_threshold
            )));
        }
        let g = &self.guardrails;
        if g.quality_weight < 0.0 || g.feedback_weight < 0.0 {
            return Err(ConfigError::Invalid(
                "guardrails weights must not be negative".to_string(),
            ));
        }
        if g.stability_window < 2 {
            return Err(ConfigError::Invalid(
                "guardrails.stability_window must be at least 2".to_string(),
            ));
        }
        if self.drift.window_size == 0 || self.drift.baseline_windows == 0 {
            return Err(ConfigError::Invalid(
                "drift window sizes must be at least 1".to_string(),
            ));
        }
        if self.orchestrator.batch_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "orchestrator.batch_concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
