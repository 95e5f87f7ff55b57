//! Axum wiring of the HTTP API (spec §4.8, §6): fixed endpoints, the ordered
//! middleware pipeline of [`crate::middleware`], and the shared application
//! state every handler closes over.

use crate::circuit_breaker_registry::CircuitBreakerRegistry;
use crate::error::HapaxError;
use crate::health::HealthRegistry;
use crate::metrics::Metrics;
use crate::middleware::{
    auth_middleware, panic_recovery_middleware, rate_limit_middleware, request_id_middleware, RequestId,
};
use crate::model::CompletionRequest;
use crate::orchestrator::Orchestrator;
use crate::rate_limit::RateLimiter;
use crate::validation::Validator;
use axum::extract::{Extension, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Everything a handler needs, shared behind an `Arc` across every request.
pub struct AppState {
    pub orchestrator: Orchestrator,
    pub validator: Validator,
    pub metrics: Arc<Metrics>,
    pub health: HealthRegistry,
    pub breakers: CircuitBreakerRegistry,
    pub rate_limiter: RateLimiter,
}

/// Builds the router with the ordered middleware pipeline of §4.8:
/// request-ID -> panic-recovery -> auth -> rate-limit -> (route handler).
/// `request_id_middleware` sits outermost so every layer nested inside it,
/// including panic recovery, can read the `RequestId` it stamps onto the
/// request extensions; panic recovery sits just inside it so a panic
/// anywhere further in, including in the auth/rate-limit layers, still
/// yields an `internal_error` envelope carrying that request ID.
pub fn build_router(state: Arc<AppState>) -> Router {
    let completions = Router::new()
        .route("/v1/completions", post(completions_handler))
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn(auth_middleware))
                .layer(axum::middleware::from_fn_with_state(state.clone(), rate_limit_middleware)),
        );

    Router::new()
        .merge(completions)
        .route("/health", get(health_handler))
        .route("/v1/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn(request_id_middleware))
                .layer(axum::middleware::from_fn(panic_recovery_middleware))
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn completions_handler(
    State(state): State<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
    Json(body): Json<CompletionRequest>,
) -> Response {
    let endpoint = "/v1/completions";
    let started = Instant::now();
    let _active = state.metrics.request_started(endpoint);

    let response = match state.validator.validate(&body, request_id.as_str()) {
        Ok(()) => {
            let outcome = state.orchestrator.complete(body, request_id.0.clone()).await;
            match outcome.as_ref() {
                Ok(completion) => {
                    (StatusCode::OK, Json(json!({ "completion": completion.completion }))).into_response()
                }
                Err(err) => error_response(&state.metrics, err),
            }
        }
        Err(err) => error_response(&state.metrics, &err),
    };

    let status = response.status().as_u16();
    state.metrics.observe_request(endpoint, status, started.elapsed());
    response
}

fn error_response(metrics: &Metrics, err: &HapaxError) -> Response {
    metrics.record_error(err.kind.wire_type());
    (err.http_status(), Json(err.envelope())).into_response()
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    let providers = state.health.detailed_snapshot();
    let healthy = providers.iter().filter(|p| p.state == crate::health::HealthState::Healthy).count();

    let body = json!({
        "status": if healthy > 0 { "ok" } else { "degraded" },
        "providers": providers.iter().map(|p| json!({
            "name": p.provider_name,
            "healthy": p.state == crate::health::HealthState::Healthy,
            "consecutive_failures": p.consecutive_failures,
            "last_check_ts": p.last_check_ts,
        })).collect::<Vec<_>>(),
    });

    if healthy > 0 {
        (StatusCode::OK, Json(body)).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
    }
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    (StatusCode::OK, state.metrics.render()).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
    use crate::orchestrator::OrchestratorConfig;
    use crate::provider::test_support::ScriptedProvider;
    use crate::provider::{Provider, ProviderRegistry};
    use crate::rate_limit::RateLimitConfig;
    use crate::validation::ApproximateTokenizer;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_state() -> Arc<AppState> {
        let health = HealthRegistry::new(3);
        let breakers = CircuitBreakerRegistry::new();
        let provider: Arc<dyn Provider> = Arc::new(ScriptedProvider::always_ok("anthropic", "pong"));
        health.register("anthropic");
        breakers.register("anthropic".to_string(), CircuitBreaker::new(CircuitBreakerConfig::disabled()));
        let registry = ProviderRegistry::new(vec![provider], health.clone(), breakers.clone());
        let metrics = Arc::new(Metrics::new());
        let orchestrator = Orchestrator::new(registry, OrchestratorConfig::default(), metrics.clone());
        Arc::new(AppState {
            orchestrator,
            validator: Validator::new(Box::new(ApproximateTokenizer), 8192),
            metrics,
            health,
            breakers,
            rate_limiter: RateLimiter::new(RateLimitConfig::default()),
        })
    }

    #[tokio::test]
    async fn completions_round_trip_succeeds() {
        let app = build_router(test_state());
        let body = r#"{"messages":[{"role":"user","content":"ping"}]}"#;
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/completions")
                    .header("authorization", "Bearer x")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn completions_without_auth_is_rejected_before_orchestrator() {
        let app = build_router(test_state());
        let body = r#"{"messages":[{"role":"user","content":"ping"}]}"#;
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/completions")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn health_reports_ok_when_a_provider_is_healthy() {
        let app = build_router(test_state());
        let response = app.oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn health_reports_degraded_when_no_provider_is_healthy() {
        let state = test_state();
        state.health.mark_unhealthy("anthropic");
        let app = build_router(state);
        let response = app.oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn metrics_endpoint_renders_prometheus_text() {
        let app = build_router(test_state());
        let response = app.oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
