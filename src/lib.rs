/// Storyloom - prompt orchestration for multi-language book chapters
///
/// Composes layered prompts from audience, genre and emotion profiles,
/// drives a text-generation service through evaluation and bounded
/// retries, and governs which prompt template versions are promoted.

pub mod config;
pub mod core;
pub mod logging;

#[cfg(test)]
mod tests;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");

pub use crate::config::{ConfigError, EngineConfig};
pub use crate::core::cancel::CancelToken;
pub use crate::core::generation::{
    GenerationError, GenerationParams, GenerationResult, ServiceRequest, ServiceResponse,
    TextGenerationService,
};
pub use crate::core::orchestrator::{
    BatchItem, Orchestrator, OrchestratorBuilder, OrchestratorConfig, RunError, RunOutcome,
};
pub use crate::core::request::{GenerationRequest, NarrativeContext, RequestError};
