//! Process entry point: load configuration, build the provider registry and
//! every supporting subsystem, then serve the HTTP API with graceful
//! shutdown on SIGTERM (spec §6 exit codes, §8 scenario 6).

use hapax::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use hapax::circuit_breaker_registry::CircuitBreakerRegistry;
use hapax::config::Config;
use hapax::health::{run_probe_loop, HealthRegistry};
use hapax::http_provider::HttpProvider;
use hapax::metrics::Metrics;
use hapax::orchestrator::{Orchestrator, OrchestratorConfig, RetryConfig as OrchestratorRetryConfig};
use hapax::provider::{Provider, ProviderRegistry};
use hapax::rate_limit::{RateLimitConfig, RateLimiter};
use hapax::router::{build_router, AppState};
use hapax::validation::{resolve_tokenizer, Validator};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "fatal startup error");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), hapax::error::HapaxError> {
    let config = Config::load()?;
    tracing::info!(?config, "configuration loaded");

    let metrics = Arc::new(Metrics::new());
    let health = HealthRegistry::new(config.health_check.failure_threshold).with_metrics(metrics.clone());
    let breakers = CircuitBreakerRegistry::new();

    let mut providers: Vec<Arc<dyn Provider>> = Vec::new();
    for name in config.effective_preference() {
        let Some(provider_config) = config.providers.get(&name) else {
            tracing::warn!(provider = %name, "skipping unconfigured provider in preference list");
            continue;
        };
        let provider = HttpProvider::new(name.clone(), provider_config)
            .map_err(|e| hapax::error::HapaxError::internal("startup", format!("building provider {name}: {e}")))?;
        health.register(&name);
        breakers.register(
            name.clone(),
            CircuitBreaker::new(CircuitBreakerConfig {
                failure_threshold: config.circuit_breaker.failure_threshold,
                interval: config.circuit_breaker.interval,
                timeout: config.circuit_breaker.timeout,
                max_requests: config.circuit_breaker.max_requests,
            })
            .with_metrics(name.clone(), metrics.clone()),
        );
        providers.push(Arc::new(provider));
    }

    if providers.is_empty() {
        return Err(hapax::error::HapaxError::internal("startup", "no providers could be constructed"));
    }

    if config.health_check.enabled {
        for provider in &providers {
            tokio::spawn(run_probe_loop(
                provider.clone(),
                health.clone(),
                breakers.clone(),
                config.health_check.interval,
                config.health_check.timeout,
            ));
        }
    }

    let registry = ProviderRegistry::new(providers, health.clone(), breakers.clone());

    let max_context_tokens =
        config.llm.as_ref().map(|l| l.max_context_tokens).unwrap_or(8192);
    let model_name = config.llm.as_ref().map(|l| l.model.as_str()).unwrap_or("default");
    let tokenizer = resolve_tokenizer(model_name)?;
    let validator = Validator::new(tokenizer, max_context_tokens);

    let retry = config.llm.as_ref().map(|l| l.retry.clone()).unwrap_or_default();
    let orchestrator_config = OrchestratorConfig {
        request_timeout: config.server.read_timeout,
        retry: OrchestratorRetryConfig {
            max_retries: retry.max_retries,
            initial_delay: retry.initial_delay,
            max_delay: retry.max_delay,
            multiplier: retry.multiplier,
            retryable_errors: retry
                .retryable_errors
                .iter()
                .filter_map(|s| parse_provider_error_kind(s))
                .collect(),
        },
    };
    let orchestrator = Orchestrator::new(registry, orchestrator_config, metrics.clone());

    let rate_limiter = RateLimiter::new(RateLimitConfig::default());

    let state = Arc::new(AppState { orchestrator, validator, metrics, health, breakers, rate_limiter });
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.server.port))
        .await
        .map_err(|e| hapax::error::HapaxError::internal("startup", format!("binding port {}: {e}", config.server.port)))?;
    tracing::info!(port = config.server.port, "hapax listening");

    serve_with_bounded_drain(listener, app, config.server.shutdown_timeout)
        .await
        .map_err(|e| hapax::error::HapaxError::internal("runtime", format!("server error: {e}")))?;

    Ok(())
}

/// Runs the server until SIGTERM/Ctrl-C, then stops accepting new
/// connections and gives in-flight requests up to `shutdown_timeout` to
/// finish before returning regardless of whether they did (§8 scenario 6).
async fn serve_with_bounded_drain(
    listener: tokio::net::TcpListener,
    app: axum::Router,
    shutdown_timeout: Duration,
) -> std::io::Result<()> {
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, app).with_graceful_shutdown(async {
        let _ = rx.await;
    });
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => return result,
        _ = wait_for_termination() => {
            tracing::info!("shutdown signal received, draining in-flight requests");
            let _ = tx.send(());
        }
    }

    match tokio::time::timeout(shutdown_timeout, server).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!("shutdown_timeout elapsed before every connection drained");
            Ok(())
        }
    }
}

#[cfg(unix)]
async fn wait_for_termination() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("installing SIGTERM handler");
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = ctrl_c => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() {
    let _ = tokio::signal::ctrl_c().await;
}

fn parse_provider_error_kind(name: &str) -> Option<hapax::error::ProviderErrorKind> {
    use hapax::error::ProviderErrorKind::*;
    match name {
        "rate_limit" => Some(RateLimit),
        "timeout" => Some(Timeout),
        "server_error" => Some(ServerError),
        "circuit_open" => Some(CircuitOpen),
        "auth" => Some(Auth),
        "other" => Some(Other),
        _ => None,
    }
}
