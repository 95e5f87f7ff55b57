//! The ordered middleware pipeline of §4.8: request-ID, panic-recovery,
//! auth-stub, rate-limit. Composed in [`crate::router::build_router`] via
//! `tower::ServiceBuilder` and `axum::middleware::from_fn`, in the order the
//! spec's data-flow line names them.

use crate::router::AppState;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderValue, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::any::Any;
use std::sync::Arc;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Reads `X-Request-ID` from the client, generating a UUID when absent, and
/// stamps it on both the request extensions (so handlers can read it) and
/// the response headers (so clients can correlate).
pub async fn request_id_middleware(mut request: Request<Body>, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    request.extensions_mut().insert(RequestId(request_id.clone()));

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

#[derive(Debug, Clone)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Gateway-boundary auth. The concrete credential scheme is an external
/// collaborator per spec §1; this stub enforces only the ordered-middleware
/// contract (an `Authorization` header must be present) so the pipeline
/// position is real even though credential validation is out of scope.
pub async fn auth_middleware(request: Request<Body>, next: Next) -> Response {
    if request.headers().contains_key(axum::http::header::AUTHORIZATION) {
        return next.run(request).await;
    }

    let request_id = request
        .extensions()
        .get::<RequestId>()
        .map(|r| r.0.clone())
        .unwrap_or_else(|| "unknown".to_string());

    let error = crate::error::HapaxError::auth(request_id, "missing Authorization header");
    (error.http_status(), Json(error.envelope())).into_response()
}

/// Per-client rate limiting, keyed by `X-Api-Key` (falling back to
/// `anonymous` when absent, since the auth stub does not mint client
/// identities of its own).
pub async fn rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let client = request
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("anonymous")
        .to_string();

    match state.rate_limiter.check_and_record(&client) {
        crate::rate_limit::Decision::Allowed { .. } => next.run(request).await,
        crate::rate_limit::Decision::Denied { wait } => {
            state.metrics.record_rate_limit_hit(&client);
            let request_id = request
                .extensions()
                .get::<RequestId>()
                .map(|r| r.0.clone())
                .unwrap_or_else(|| "unknown".to_string());
            let error = crate::error::HapaxError::rate_limit(request_id, "rate limit exceeded");
            let mut response = (error.http_status(), Json(error.envelope())).into_response();
            if let Ok(value) = HeaderValue::from_str(&wait.as_secs().to_string()) {
                response.headers_mut().insert("retry-after", value);
            }
            response
        }
    }
}

/// Converts an uncaught panic in a handler (or in any middleware nested
/// inside this one) into an `internal_error` envelope carrying the request's
/// real ID, instead of tearing down the process. Runs the rest of the
/// pipeline on a detached task so a panic there surfaces as a `JoinError`
/// here rather than unwinding through this frame. The panic payload (which
/// may contain a stack trace) is logged, never echoed to the client.
pub async fn panic_recovery_middleware(request: Request<Body>, next: Next) -> Response {
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .map(|r| r.0.clone())
        .unwrap_or_else(|| "unknown".to_string());

    match tokio::spawn(next.run(request)).await {
        Ok(response) => response,
        Err(join_err) => {
            let detail = panic_detail(join_err);
            tracing::error!(panic = %detail, request_id = %request_id, "handler panicked");
            let error = crate::error::HapaxError::internal(request_id, "internal server error");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(error.envelope())).into_response()
        }
    }
}

fn panic_detail(join_err: tokio::task::JoinError) -> String {
    if !join_err.is_panic() {
        return "handler task was cancelled".to_string();
    }
    let payload: Box<dyn Any + Send + 'static> = join_err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    #[tokio::test]
    async fn request_id_is_generated_when_absent() {
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(axum::middleware::from_fn(request_id_middleware));
        let response = app.oneshot(Request::builder().uri("/").body(Body::empty()).unwrap()).await.unwrap();
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
    }

    #[tokio::test]
    async fn request_id_is_echoed_when_supplied() {
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(axum::middleware::from_fn(request_id_middleware));
        let response = app
            .oneshot(
                Request::builder().uri("/").header(REQUEST_ID_HEADER, "client-supplied").body(Body::empty()).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.headers().get(REQUEST_ID_HEADER).unwrap(), "client-supplied");
    }

    #[tokio::test]
    async fn auth_middleware_rejects_missing_authorization() {
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(axum::middleware::from_fn(auth_middleware));
        let response = app.oneshot(Request::builder().uri("/").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn auth_middleware_allows_bearer_token() {
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(axum::middleware::from_fn(auth_middleware));
        let response = app
            .oneshot(Request::builder().uri("/").header("authorization", "Bearer x").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
