//! HTTP routes served by the [`ServerRunner`](super::server::ServerRunner).
//!
//! | route | handler |
//! |---|---|
//! | `GET /metrics` | Prometheus exposition |
//! | `GET /-/healthy` | liveness |
//! | `GET /-/ready` | 200 while the server is listening, 503 otherwise |
//! | `POST /api/metrics/v1/write` | proxied to the write endpoint |
//! | `ANY /api/metrics/v1/{*path}` | proxied to the query endpoint |
//! | `GET /debug/runtime`, `GET /debug/config` | only with `PROFILE` set |

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{MatchedPath, Path, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{any, get, post},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{json, Value};
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::Options;
use crate::http::proxy::{Proxy, Upstream};
use crate::http::request::{request_id, UuidRequestId, X_REQUEST_ID};
use crate::http::server::Readiness;
use crate::observability::metrics;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub options: Arc<Options>,
    pub proxy: Arc<Proxy>,
    /// Absent when the global recorder could not be installed.
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(options: Options, metrics: Option<PrometheusHandle>) -> Self {
        let proxy = Arc::new(Proxy::new(&options.proxy));
        Self {
            options: Arc::new(options),
            proxy,
            metrics,
        }
    }
}

/// Build the router with all middleware layers.
pub fn build_router(state: AppState, readiness: Readiness) -> Router {
    let mut router = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/-/healthy", get(healthy))
        .route("/-/ready", get(move || ready(readiness.clone())))
        .route("/api/metrics/v1/write", post(write))
        .route("/api/metrics/v1/{*path}", any(query));

    if state.options.profile {
        router = router
            .route("/debug/runtime", get(runtime_stats))
            .route("/debug/config", get(show_config));
    }

    router
        .with_state(state)
        .layer(middleware::from_fn(record_metrics))
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
            tracing::info_span!(
                "request",
                method = %request.method(),
                path = %request.uri().path(),
                request_id = request_id(request).unwrap_or(""),
            )
        }))
        .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
        .layer(SetRequestIdLayer::new(X_REQUEST_ID, UuidRequestId))
}

fn handler_label(path: &str) -> &'static str {
    match path {
        "/metrics" => "metrics",
        "/-/healthy" => "healthy",
        "/-/ready" => "ready",
        "/api/metrics/v1/write" => "write",
        "/api/metrics/v1/{*path}" => "query",
        path if path.starts_with("/debug/") => "debug",
        _ => "other",
    }
}

async fn record_metrics(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let handler = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| handler_label(path.as_str()))
        .unwrap_or("other");
    let method = request.method().clone();

    let response = next.run(request).await;
    metrics::record_request(handler, method.as_str(), response.status().as_u16(), start);
    response
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

async fn healthy() -> &'static str {
    "OK"
}

pub(crate) async fn ready(readiness: Readiness) -> (StatusCode, &'static str) {
    if readiness.is_ready() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

async fn write(State(state): State<AppState>, request: Request) -> Response {
    state.proxy.forward(Upstream::Write, "", request).await
}

async fn query(State(state): State<AppState>, Path(path): Path<String>, request: Request) -> Response {
    state.proxy.forward(Upstream::Query, &path, request).await
}

async fn runtime_stats() -> Json<Value> {
    let metrics = tokio::runtime::Handle::current().metrics();
    Json(json!({
        "workers": metrics.num_workers(),
        "alive_tasks": metrics.num_alive_tasks(),
        "global_queue_depth": metrics.global_queue_depth(),
    }))
}

async fn show_config(State(state): State<AppState>) -> Json<Options> {
    Json(state.options.as_ref().clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{load, EnvToggles, Flags};
    use crate::http::ServerState;
    use clap::Parser;
    use tokio::sync::watch;
    use tower::ServiceExt;

    fn options(profile: bool) -> Options {
        let flags = Flags::try_parse_from([
            "observatorium",
            "--metrics.query.endpoint=http://127.0.0.1:1/",
            "--metrics.write.endpoint=http://127.0.0.1:1/receive",
        ])
        .unwrap();
        load(flags, EnvToggles { debug: false, profile }).unwrap()
    }

    fn router(profile: bool) -> Router {
        routed(profile, ServerState::Idle)
    }

    fn routed(profile: bool, state: ServerState) -> Router {
        let (_, readiness) = watch::channel(state);
        build_router(AppState::new(options(profile), None), Readiness::new(readiness))
    }

    #[tokio::test]
    async fn healthy_sets_request_id() {
        let app = router(false);
        let response = app
            .oneshot(Request::builder().uri("/-/healthy").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn ready_runs_behind_the_middleware() {
        let app = routed(false, ServerState::Listening("127.0.0.1:8080".parse().unwrap()));
        let response = app
            .oneshot(Request::builder().uri("/-/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));

        let response = router(false)
            .oneshot(Request::builder().uri("/-/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn client_request_id_is_echoed() {
        let app = router(false);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/-/healthy")
                    .header("x-request-id", "from-client")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.headers().get("x-request-id").unwrap(), "from-client");
    }

    #[tokio::test]
    async fn debug_routes_require_profile() {
        let app = router(false);
        let response = app
            .oneshot(Request::builder().uri("/debug/config").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let app = router(true);
        let response = app
            .oneshot(Request::builder().uri("/debug/config").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let config: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(config["server"]["listen"], "0.0.0.0:8080");
        assert_eq!(config["profile"], true);
    }

    #[tokio::test]
    async fn runtime_stats_report_workers() {
        let app = router(true);
        let response = app
            .oneshot(Request::builder().uri("/debug/runtime").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let stats: Value = serde_json::from_slice(&body).unwrap();
        assert!(stats["workers"].as_u64().is_some());
    }

    #[tokio::test]
    async fn metrics_without_recorder_is_not_found() {
        let app = router(false);
        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn handler_labels() {
        assert_eq!(handler_label("/api/metrics/v1/{*path}"), "query");
        assert_eq!(handler_label("/api/metrics/v1/write"), "write");
        assert_eq!(handler_label("/debug/config"), "debug");
        assert_eq!(handler_label("/-/ready"), "ready");
        assert_eq!(handler_label("/unknown"), "other");
    }
}
