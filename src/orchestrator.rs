//! The completion request lifecycle: validate (upstream) -> dedupe -> failover -> respond.

use crate::backoff::Backoff;
use crate::error::{ErrorKind, HapaxError, ProviderErrorKind};
use crate::fingerprint::{fingerprint, Fingerprint};
use crate::jitter::Jitter;
use crate::metrics::Metrics;
use crate::model::{CompletionRequest, CompletionResponse};
use crate::provider::{Provider, ProviderError, ProviderRegistry};
use crate::single_flight::SingleFlightRegistry;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Per-provider retry-before-failover configuration (`llm.retry` in the
/// configuration surface).
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub retryable_errors: Vec<ProviderErrorKind>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            retryable_errors: vec![
                ProviderErrorKind::RateLimit,
                ProviderErrorKind::Timeout,
                ProviderErrorKind::ServerError,
                ProviderErrorKind::CircuitOpen,
            ],
        }
    }
}

impl RetryConfig {
    fn allows(&self, kind: ProviderErrorKind) -> bool {
        self.retryable_errors.contains(&kind)
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Overall per-request deadline, bounding every attempt against every
    /// candidate provider.
    pub request_timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self { request_timeout: Duration::from_secs(30), retry: RetryConfig::default() }
    }
}

struct Attempt {
    provider: String,
    kind: ProviderErrorKind,
}

pub struct Orchestrator {
    registry: ProviderRegistry,
    single_flight: SingleFlightRegistry<Fingerprint, Result<CompletionResponse, HapaxError>>,
    config: OrchestratorConfig,
    metrics: Arc<Metrics>,
}

impl Orchestrator {
    pub fn new(registry: ProviderRegistry, config: OrchestratorConfig, metrics: Arc<Metrics>) -> Self {
        Self { registry, single_flight: SingleFlightRegistry::new(), config, metrics }
    }

    /// Runs the full request lifecycle and returns the shared result. The
    /// `Arc` is shared with every other caller that deduplicated onto the
    /// same fingerprint.
    pub async fn complete(
        &self,
        request: CompletionRequest,
        request_id: String,
    ) -> Arc<Result<CompletionResponse, HapaxError>> {
        let key = fingerprint(&request);
        let registry = self.registry.clone();
        let config = self.config.clone();
        let metrics = self.metrics.clone();

        let (result, was_follower) = self
            .single_flight
            .call_shared(key, move || async move {
                run_with_failover(&registry, &request, &config, &metrics, &request_id).await
            })
            .await;

        if was_follower {
            self.metrics.deduplicated_requests_total.inc();
        }

        result
    }
}

async fn run_with_failover(
    registry: &ProviderRegistry,
    request: &CompletionRequest,
    config: &OrchestratorConfig,
    metrics: &Metrics,
    request_id: &str,
) -> Result<CompletionResponse, HapaxError> {
    let mut attempts: Vec<Attempt> = Vec::new();
    let candidates: Vec<Arc<dyn Provider>> = registry.next_available().collect();

    if candidates.is_empty() {
        return Err(no_providers_error(request_id, &attempts));
    }

    // One deadline for the whole request (spec §5): every attempt against
    // every candidate shares it, so retries and failover cannot extend the
    // total time a caller waits beyond `request_timeout`.
    let deadline = Instant::now() + config.request_timeout;

    for provider in candidates {
        match try_provider(registry, provider.as_ref(), request, config, metrics, deadline).await {
            Ok(response) => return Ok(response),
            Err((kind, message, retryable)) => {
                attempts.push(Attempt { provider: provider.name().to_string(), kind });
                if !retryable {
                    return Err(provider_error(request_id, &message, &attempts));
                }
            }
        }
    }

    Err(no_providers_error(request_id, &attempts))
}

/// Retries a single provider up to `max_retries` times with backoff and full
/// jitter before giving up on it. Returns `Ok` on success, or the final
/// `(kind, message, retryable)` to decide whether the orchestrator should
/// advance to the next candidate.
async fn try_provider(
    registry: &ProviderRegistry,
    provider: &dyn Provider,
    request: &CompletionRequest,
    config: &OrchestratorConfig,
    metrics: &Metrics,
    deadline: Instant,
) -> Result<CompletionResponse, (ProviderErrorKind, String, bool)> {
    let backoff = Backoff::exponential_with_multiplier(config.retry.initial_delay, config.retry.multiplier)
        .with_max(config.retry.max_delay);
    let jitter = Jitter::Full;

    let breaker = registry.breaker_for(provider.name());

    for attempt in 0..=config.retry.max_retries {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err((ProviderErrorKind::Timeout, "request deadline exceeded".to_string(), true));
        }
        let attempt_timeout = remaining.min(config.request_timeout);

        let permit = match &breaker {
            Some(breaker) => match breaker.try_acquire() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    return Err((
                        ProviderErrorKind::CircuitOpen,
                        "circuit open".to_string(),
                        true,
                    ));
                }
            },
            None => None,
        };

        let call = provider.call(request, attempt_timeout);
        let outcome = tokio::time::timeout(attempt_timeout, call).await;

        let classified = match outcome {
            Ok(Ok(response)) => {
                if let Some(permit) = permit {
                    permit.success();
                }
                metrics.record_provider_success(provider.name());
                return Ok(response);
            }
            Ok(Err(err)) => err,
            Err(_) => ProviderError { kind: ProviderErrorKind::Timeout, message: "deadline exceeded".to_string() },
        };

        if let Some(permit) = permit {
            permit.failure();
        }
        metrics.record_provider_failure(provider.name());

        let retryable_here = config.retry.allows(classified.kind);
        let is_last_attempt = attempt == config.retry.max_retries;

        if !retryable_here || is_last_attempt {
            return Err((classified.kind, classified.message, classified.kind.is_retryable()));
        }

        let remaining_before_sleep = deadline.saturating_duration_since(Instant::now());
        if remaining_before_sleep.is_zero() {
            return Err((classified.kind, classified.message, classified.kind.is_retryable()));
        }
        let delay = jitter.apply(backoff.delay(attempt + 1)).min(remaining_before_sleep);
        tokio::time::sleep(delay).await;
    }

    unreachable!("retry loop always returns before exhausting its range")
}

fn provider_error(request_id: &str, message: &str, attempts: &[Attempt]) -> HapaxError {
    HapaxError::provider(request_id, message).with_details(attempts_details(attempts))
}

fn no_providers_error(request_id: &str, attempts: &[Attempt]) -> HapaxError {
    HapaxError::new(
        ErrorKind::Provider,
        "no healthy provider available",
        request_id,
    )
    .with_details(attempts_details(attempts))
}

fn attempts_details(attempts: &[Attempt]) -> Value {
    let list: Vec<Value> =
        attempts.iter().map(|a| json!({ "provider": a.provider, "kind": a.kind.as_str() })).collect();
    json!({ "attempts": list })
}
