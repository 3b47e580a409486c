use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{DefaultBodyLimit, MatchedPath, Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::middleware::gate;
use crate::AppState;

pub mod handlers;
pub mod masking;

/// Build the full HTTP surface.
///
/// The IP-scoped bucket wraps every API route; the masking routes are
/// additionally behind the credential gate. Probes and `/metrics` sit
/// outside the bucket so a store outage reads as 503 on `/readyz` and
/// scrapes never spend a caller's budget.
pub fn router(state: Arc<AppState>) -> Router {
    let gated = Router::new()
        .route("/mask", post(masking::mask))
        .route("/bulk", post(masking::bulk))
        .route("/validate", post(masking::validate))
        .route("/detect", post(masking::detect))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            gate::require_credential,
        ));

    let limited = Router::new()
        .route(
            "/generate-key",
            get(handlers::issue_key).post(handlers::issue_key),
        )
        .route("/rotate-key", post(handlers::rotate_key))
        .route("/revoke-key", post(handlers::revoke_key))
        .route("/usage", get(handlers::usage))
        .route("/metadata", get(handlers::metadata))
        .merge(gated)
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            gate::ip_rate_limit,
        ));

    let probes = Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(readiness_check))
        .route("/metrics", get(metrics));

    Router::new()
        .merge(limited)
        .merge(probes)
        .fallback(fallback_404)
        .layer(middleware::from_fn_with_state(state.clone(), track_latency))
        .with_state(state.clone())
        .layer(DefaultBodyLimit::max(state.config.max_body_bytes))
        .layer(TimeoutLayer::new(state.config.request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_id_middleware))
        .layer(middleware::from_fn(security_headers_middleware))
}

async fn fallback_404() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "not found" }))).into_response()
}

async fn readiness_check(State(state): State<Arc<AppState>>) -> Response {
    match state.store.ping().await {
        Ok(()) => "ok".into_response(),
        Err(e) => {
            tracing::warn!("readiness: store unreachable: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": "store unavailable" })),
            )
                .into_response()
        }
    }
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.encode(),
    )
}

/// Middleware: request latency histogram by matched route and status.
async fn track_latency(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let start = Instant::now();
    let resp = next.run(req).await;
    state
        .metrics
        .request(&route, resp.status().as_u16(), start.elapsed());
    resp
}

/// Middleware: injects a unique X-Request-Id into every response.
async fn request_id_middleware(req: Request, next: Next) -> Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}

/// Middleware: hardening headers. Responses carry masked PII and
/// credentials, so nothing may be cached or framed.
async fn security_headers_middleware(req: Request, next: Next) -> Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("no-referrer"),
    );
    headers.remove(header::SERVER);
    resp
}
