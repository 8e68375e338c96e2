//! HTTP gateway for the CMP runtime.
//!
//! Endpoints:
//!
//! - `POST /api/v1/chat`: run the request pipeline, answer `{rendered}`
//! - `GET  /healthz`: liveness
//! - `GET  /readyz`: readiness once services are built
//! - `GET  /version`: `{version}`
//! - `GET  /metrics`: Prometheus exposition
//!
//! Built on Axum.

pub mod error;
pub mod orchestrator;

use axum::body::Body;
use axum::extract::{ConnectInfo, DefaultBodyLimit, Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::{
    Router,
    routing::{get, post},
};
use serde::Serialize;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{Instrument, error, info, info_span};

use cmp_config::AppConfig;
use cmp_context::ContextResolver;
use cmp_core::{Error, GenerationParams, ModelProvider};
use cmp_prompt::PromptEngine;
use cmp_security::crypto::EPISODIC_KEY_ENV;
use cmp_security::{
    ApiKeyStore, AuditLogger, AuditSink, CitationPolicy, EnvKeyProvider, HeuristicRiskClassifier,
    JsonlFileSink, KeyProvider, PiiDetector, Policy, RateLimiter, RegexPiiDetector, RiskClassifier,
    TracingSink, extract_client_ip,
};
use cmp_telemetry::{CONTENT_TYPE, Metrics};

pub use error::{ApiError, status_for};
pub use orchestrator::{CallerInfo, ChatRequest, ChatResponse, handle_chat};

pub const CHAT_ROUTE: &str = "/api/v1/chat";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Services shared by every request.
pub struct GatewayState {
    pub config: AppConfig,
    pub resolver: ContextResolver,
    pub prompts: Arc<PromptEngine>,
    pub keys: ApiKeyStore,
    pub limiter: RateLimiter,
    pub classifier: Box<dyn RiskClassifier>,
    pub pii: Box<dyn PiiDetector>,
    pub policy: Policy,
    pub citations: CitationPolicy,
    /// Sinks may block; the pipeline logs through the blocking pool.
    pub audit: Arc<AuditLogger>,
    pub metrics: Metrics,
    /// Key source for encrypted episodic memory.
    pub episodic_keys: Arc<dyn KeyProvider>,
    /// When set, the rendered prompt is sent here and the generation is the
    /// response.
    pub model: Option<Arc<dyn ModelProvider>>,
    pub generation: GenerationParams,
    ready: AtomicBool,
}

pub type SharedState = Arc<GatewayState>;

impl GatewayState {
    /// Build every service, reading security settings from the process
    /// environment.
    pub fn new(config: AppConfig) -> Result<Self, Error> {
        Self::with_env(config, |key| std::env::var(key).ok())
    }

    /// Build every service, reading `CMP_API_KEYS`, `CMP_API_TOKENS`,
    /// `CMP_OOB_REQUIRED_ACTIONS`, `CMP_PII_MODE`, `CMP_EPISODIC_KEY` and
    /// `HF_TOKEN` through `lookup`.
    pub fn with_env<F>(config: AppConfig, lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let root = config.project_root.clone();

        let mut sinks: Vec<Box<dyn AuditSink>> = vec![Box::new(TracingSink)];
        if let Some(path) = config.audit_log_path() {
            sinks.push(Box::new(JsonlFileSink::new(path)));
        }

        let model = cmp_model::from_config(&config, &lookup)?;
        let metrics = Metrics::new().map_err(|e| Error::Internal(e.to_string()))?;
        let episodic_key = lookup(EPISODIC_KEY_ENV);
        let episodic_keys = EnvKeyProvider::with_lookup(move |name| {
            (name == EPISODIC_KEY_ENV).then(|| episodic_key.clone()).flatten()
        });

        let state = Self {
            resolver: ContextResolver::new(&root),
            prompts: Arc::new(PromptEngine::new(&root)),
            keys: ApiKeyStore::from_env(&lookup),
            limiter: RateLimiter::new(
                config.security.rate_limit.requests_per_second,
                config.security.rate_limit.burst,
            ),
            classifier: Box::new(HeuristicRiskClassifier),
            pii: Box::new(RegexPiiDetector),
            policy: Policy::default().merge_env(&lookup),
            citations: CitationPolicy::new(&config.security.citation_markers),
            audit: Arc::new(AuditLogger::with_sinks(sinks)),
            metrics,
            episodic_keys: Arc::new(episodic_keys),
            model,
            generation: cmp_model::params_from_config(&config),
            ready: AtomicBool::new(false),
            config,
        };

        info!(
            root = %root.display(),
            auth = !state.keys.is_empty(),
            pi_enforcement = state.config.security.pi_enforcement,
            require_citation = state.config.security.require_citation,
            pii_mode = ?state.policy.pii_mode,
            model = state.model.as_ref().map(|m| m.name()).unwrap_or("none"),
            "Gateway services ready"
        );
        state.ready.store(true, Ordering::Release);
        Ok(state)
    }

    /// Replace the generation backend.
    pub fn with_model(mut self, provider: Arc<dyn ModelProvider>) -> Self {
        self.model = Some(provider);
        self
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState) -> Router {
    let body_limit = state.config.server.body_limit_bytes;
    Router::new()
        .route(CHAT_ROUTE, post(chat_handler))
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .route("/version", get(version_handler))
        .route("/metrics", get(metrics_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the gateway HTTP server.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = Arc::new(GatewayState::new(config)?);
    let app = build_router(state);

    info!(addr = %addr, "Gateway listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

// --- Handlers ---

async fn chat_handler(State(state): State<SharedState>, request: Request) -> Response {
    let started = Instant::now();
    let _in_flight = state.metrics.track_in_flight();
    let request_id = uuid::Uuid::new_v4().to_string();

    let (parts, body) = request.into_parts();
    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let caller = caller_info(&parts.headers, peer, request_id.clone());

    let mut response = match read_chat_request(body, state.config.server.body_limit_bytes).await {
        Err(e) => ApiError(e).into_response(),
        Ok(chat) => {
            let span = info_span!(
                "chat",
                request_id = %request_id,
                tenant_id = %chat.tenant_id,
                component = %chat.component,
            );
            match handle_chat(&state, chat, &caller).instrument(span).await {
                Ok(reply) => (StatusCode::OK, Json(reply)).into_response(),
                Err(e) => {
                    let status = status_for(&e);
                    if status.is_server_error() {
                        error!(request_id = %request_id, error = %e, "Chat request failed");
                    }
                    ApiError(e).into_response()
                }
            }
        }
    };

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    state
        .metrics
        .observe_request(CHAT_ROUTE, response.status().as_u16(), started.elapsed());
    response
}

async fn read_chat_request(body: Body, limit: usize) -> Result<ChatRequest, Error> {
    let bytes = axum::body::to_bytes(body, limit)
        .await
        .map_err(|e| Error::Validation(format!("unreadable request body: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| Error::Validation(format!("invalid request body: {e}")))
}

fn caller_info(headers: &HeaderMap, peer: Option<IpAddr>, request_id: String) -> CallerInfo {
    CallerInfo {
        request_id,
        authorization: header_str(headers, header::AUTHORIZATION.as_str()).map(String::from),
        client_ip: extract_client_ip(header_str(headers, "x-forwarded-for"), peer),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

#[derive(Serialize)]
struct StatusBody {
    status: &'static str,
}

#[derive(Serialize)]
struct VersionBody {
    version: &'static str,
}

async fn healthz_handler() -> Json<StatusBody> {
    Json(StatusBody { status: "ok" })
}

async fn readyz_handler(State(state): State<SharedState>) -> (StatusCode, Json<StatusBody>) {
    if state.is_ready() {
        (StatusCode::OK, Json(StatusBody { status: "ready" }))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(StatusBody { status: "starting" }),
        )
    }
}

async fn version_handler() -> Json<VersionBody> {
    Json(VersionBody {
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn metrics_handler(State(state): State<SharedState>) -> Response {
    match state.metrics.encode() {
        Ok(text) => ([(header::CONTENT_TYPE, CONTENT_TYPE)], text).into_response(),
        Err(e) => {
            error!(error = %e, "Metrics encoding failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_state(root: &std::path::Path) -> SharedState {
        let config = AppConfig::with_root(root);
        Arc::new(GatewayState::with_env(config, |_| None).unwrap())
    }

    async fn fetch(app: Router, uri: &str) -> Response {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        app.oneshot(req).await.unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_and_ready() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        assert!(state.is_ready());

        let response = fetch(build_router(state.clone()), "/healthz").await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = fetch(build_router(state), "/readyz").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ready");
    }

    #[tokio::test]
    async fn version_reports_package_version() {
        let dir = tempfile::tempdir().unwrap();
        let response = fetch(build_router(test_state(dir.path())), "/version").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn metrics_exposition() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        state.metrics.inc_rate_limited();

        let response = fetch(build_router(state), "/metrics").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], CONTENT_TYPE);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("cmp_security_rate_limited_total 1"));
    }

    #[tokio::test]
    async fn chat_responses_carry_request_id() {
        let dir = tempfile::tempdir().unwrap();
        let req = Request::builder()
            .method("POST")
            .uri(CHAT_ROUTE)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = build_router(test_state(dir.path())).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
    }

    #[test]
    fn caller_info_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9, 10.0.0.1"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer tok"));
        let peer = Some("127.0.0.1".parse().unwrap());

        let caller = caller_info(&headers, peer, "r1".into());
        assert_eq!(caller.client_ip, "203.0.113.9");
        assert_eq!(caller.authorization.as_deref(), Some("Bearer tok"));

        let caller = caller_info(&HeaderMap::new(), peer, "r2".into());
        assert_eq!(caller.client_ip, "127.0.0.1");
        assert!(caller.authorization.is_none());
    }
}
