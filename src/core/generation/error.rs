//! Generation Error Types
//!
//! Typed failure conditions of the text-generation boundary.

use std::time::Duration;

/// Errors a generation or refinement service call can end in.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GenerationError {
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Rate limited (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Generation cancelled")]
    Cancelled,
}

impl GenerationError {
    /// Whether the transport layer should try again.
    pub fn is_transient(&self) -> bool {
        match self {
            GenerationError::Timeout(_)
            | GenerationError::RateLimited { .. }
            | GenerationError::MalformedResponse(_)
            | GenerationError::Unavailable(_) => true,
            GenerationError::Api { status, .. } => *status >= 500 || *status == 408,
            GenerationError::Cancelled => false,
        }
    }

    /// Short machine-readable kind for logs and metadata.
    pub fn kind(&self) -> &'static str {
        match self {
            GenerationError::Timeout(_) => "timeout",
            GenerationError::RateLimited { .. } => "rate_limited",
            GenerationError::MalformedResponse(_) => "malformed_response",
            GenerationError::Api { .. } => "api",
            GenerationError::Unavailable(_) => "unavailable",
            GenerationError::Cancelled => "cancelled",
        }
    }
}

/// Result type for generation calls
pub type Result<T> = std::result::Result<T, GenerationError>;
