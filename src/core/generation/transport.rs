//! Timeouts and bounded retry-with-backoff around a generation service.
//!
//! This retry is about the transport only (timeouts, rate limits, 5xx).
//! Quality-driven retries live in the orchestrator.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::time::{sleep, timeout};
use tracing::{debug, instrument, warn};

use super::{GenerationError, Result, ServiceRequest, ServiceResponse, TextGenerationService};
use crate::core::cancel::CancelToken;
use crate::core::cost::ProviderPricing;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Per-call timeout.
    pub request_timeout_secs: u64,
    /// Total attempts per call, first one included.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 120,
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

impl TransportConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// Delay before attempt `failed_attempts + 1`, doubling from the base and
    /// capped. Rate limits wait at least the advertised time (still capped).
    pub fn backoff(&self, failed_attempts: u32, error: &GenerationError) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(16);
        let mut delay_ms = self.base_delay_ms.saturating_mul(2_u64.pow(exponent));
        if let GenerationError::RateLimited {
            retry_after_secs: Some(secs),
        } = error
        {
            delay_ms = delay_ms.max(secs.saturating_mul(1000));
        }
        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }
}

/// A successful call and what it took.
#[derive(Debug, Clone)]
pub struct ServiceCall {
    pub response: ServiceResponse,
    pub attempts: u32,
    pub latency: Duration,
}

/// Wraps a service with timeouts, transient-error retry and cancellation.
#[derive(Clone)]
pub struct ResilientService {
    inner: Arc<dyn TextGenerationService>,
    config: TransportConfig,
}

impl std::fmt::Debug for ResilientService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientService")
            .field("id", &self.inner.id())
            .field("model", &self.inner.model())
            .field("config", &self.config)
            .finish()
    }
}

impl ResilientService {
    pub fn new(inner: Arc<dyn TextGenerationService>, config: TransportConfig) -> Self {
        Self { inner, config }
    }

    pub fn id(&self) -> &str {
        self.inner.id()
    }

    pub fn model(&self) -> &str {
        self.inner.model()
    }

    pub fn pricing(&self) -> Option<ProviderPricing> {
        self.inner.pricing()
    }

    /// Call the service, retrying transient failures with backoff.
    ///
    /// Cancellation interrupts both an in-flight call and a backoff sleep.
    /// Empty responses count as malformed.
    #[instrument(skip_all, fields(service = %self.inner.id(), model = %self.inner.model()))]
    pub async fn call(&self, request: &ServiceRequest, cancel: &CancelToken) -> Result<ServiceCall> {
        let started = Instant::now();
        let max_attempts = self.config.max_attempts.max(1);
        let request_timeout = self.config.request_timeout();
        let mut attempt = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(GenerationError::Cancelled);
            }
            attempt += 1;

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
                result = timeout(request_timeout, self.inner.generate(request.clone())) => {
                    match result {
                        Ok(inner) => inner,
                        Err(_) => Err(GenerationError::Timeout(request_timeout)),
                    }
                }
            };
            let outcome = outcome.and_then(|response| {
                if response.text.trim().is_empty() {
                    Err(GenerationError::MalformedResponse("empty response text".to_string()))
                } else {
                    Ok(response)
                }
            });

            match outcome {
                Ok(response) => {
                    debug!(attempt, latency_ms = started.elapsed().as_millis() as u64, "Service call succeeded");
                    return Ok(ServiceCall {
                        response,
                        attempts: attempt,
                        latency: started.elapsed(),
                    });
                }
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.config.backoff(attempt, &e);
                    warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Service call failed, retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
                        _ = sleep(delay) => {}
                    }
                }
                Err(e) => {
                    warn!(attempt, error = %e, kind = e.kind(), "Service call failed");
                    return Err(e);
                }
            }
        }
    }
}
