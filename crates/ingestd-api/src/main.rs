//! ingestd HTTP API server.
//!
//! Exposes job submission, status reads, live status streaming (SSE),
//! cancellation, and webhook notification over a small versioned REST
//! surface. All job operations require a bearer token and enforce the
//! owner-or-admin rule.

mod identity;

use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{header, request::Parts, Method, StatusCode},
    response::{
        sse::{Event, KeepAlive},
        IntoResponse, Sse,
    },
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use governor::{Quota, RateLimiter};
use serde::Deserialize;
use tokio_stream::StreamExt as _;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use uuid::Uuid;

use ingestd_broker::{MemoryBroker, RedisBroker};
use ingestd_core::auth::{IdentityProvider, Principal};
use ingestd_core::defaults::{self, LIST_DEFAULT_LIMIT};
use ingestd_core::metrics::MetricsRecorder;
use ingestd_core::models::{BatchSubmitRequest, JobView, SubmitRequest};
use ingestd_core::traits::{Broker, JobStore, RecentJobsIndex};
use ingestd_jobs::{
    JobWorker, NoOpHandler, StatusStreamer, StatusTracker, SubmissionService, WorkerConfig,
};

use identity::StaticTokenProvider;

#[derive(Clone)]
struct MakeRequestUuid;

impl MakeRequestId for MakeRequestUuid {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = Uuid::new_v4().to_string().parse().ok()?;
        Some(RequestId::new(id))
    }
}

/// Global rate limiter type (direct quota, no keyed bucketing).
type GlobalRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    submissions: Arc<SubmissionService>,
    tracker: Arc<StatusTracker>,
    streamer: Arc<StatusStreamer>,
    identity: Arc<dyn IdentityProvider>,
    metrics: Arc<MetricsRecorder>,
    notifier: WebhookNotifier,
    /// Global rate limiter (None if rate limiting is disabled).
    rate_limiter: Option<Arc<GlobalRateLimiter>>,
    started_at: DateTime<Utc>,
}

// =============================================================================
// ERROR HANDLING
// =============================================================================

#[derive(Debug)]
enum ApiError {
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl From<ingestd_core::Error> for ApiError {
    fn from(err: ingestd_core::Error) -> Self {
        use ingestd_core::Error;
        match err {
            Error::Validation(msg) => ApiError::BadRequest(msg),
            Error::Unauthorized(msg) => ApiError::Unauthorized(msg),
            Error::Forbidden(msg) => ApiError::Forbidden(msg),
            Error::JobNotFound(_) | Error::NotFound(_) => ApiError::NotFound(err.to_string()),
            Error::CancelFailed(_) | Error::InvalidTransition { .. } => {
                ApiError::BadRequest(err.to_string())
            }
            Error::Broker(msg) => {
                error!(error = %msg, "broker failure");
                ApiError::Internal("queue transport failure".to_string())
            }
            other => {
                error!(error = %other, "internal error");
                ApiError::Internal("internal error".to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(serde_json::json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}

// =============================================================================
// AUTHENTICATION MIDDLEWARE
// =============================================================================

/// Extractor that requires a valid bearer token.
#[derive(Debug, Clone)]
struct RequireAuth {
    principal: Principal,
}

#[axum::async_trait]
impl FromRequestParts<AppState> for RequireAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());

        let token = match auth_header {
            Some(header) if header.starts_with("Bearer ") => {
                header.trim_start_matches("Bearer ").trim()
            }
            _ => {
                return Err(ApiError::Unauthorized(
                    "Authentication required".to_string(),
                ))
            }
        };

        match state.identity.verify(token).await? {
            Some(principal) => Ok(RequireAuth { principal }),
            None => Err(ApiError::Unauthorized("Invalid token".to_string())),
        }
    }
}

/// Extractor that requires an admin bearer token.
#[derive(Debug, Clone)]
struct RequireAdmin {
    #[allow(dead_code)]
    principal: Principal,
}

#[axum::async_trait]
impl FromRequestParts<AppState> for RequireAdmin {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth = RequireAuth::from_request_parts(parts, state).await?;
        if !auth.principal.is_admin {
            return Err(ApiError::Forbidden("Admin access required".to_string()));
        }
        Ok(RequireAdmin {
            principal: auth.principal,
        })
    }
}

async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    if let Some(limiter) = &state.rate_limiter {
        if limiter.check().is_err() {
            warn!("Rate limit exceeded");
            return Err((
                StatusCode::TOO_MANY_REQUESTS,
                Json(serde_json::json!({
                    "error": "rate_limit_exceeded",
                    "error_description": "Too many requests. Please wait before retrying."
                })),
            ));
        }
    }
    Ok(next.run(request).await)
}

// =============================================================================
// WEBHOOK NOTIFICATION
// =============================================================================

/// Delivers job views to a configured webhook endpoint.
#[derive(Clone)]
struct WebhookNotifier {
    client: reqwest::Client,
    url: Option<String>,
}

impl WebhookNotifier {
    fn new(url: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { client, url }
    }

    async fn notify(&self, view: &JobView) -> Result<(), ApiError> {
        let url = self.url.as_deref().ok_or_else(|| {
            ApiError::BadRequest("no webhook url configured".to_string())
        })?;
        let response = self
            .client
            .post(url)
            .json(view)
            .send()
            .await
            .map_err(ingestd_core::Error::from)?;
        if !response.status().is_success() {
            return Err(ApiError::Internal(format!(
                "webhook endpoint returned {}",
                response.status()
            )));
        }
        info!(job_id = %view.job_id, %url, "webhook delivered");
        Ok(())
    }
}

// =============================================================================
// HANDLERS
// =============================================================================

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = (Utc::now() - state.started_at).num_seconds();
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": uptime,
    }))
}

async fn metrics_snapshot(State(state): State<AppState>, _admin: RequireAdmin) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}

async fn auth_me(auth: RequireAuth) -> impl IntoResponse {
    Json(serde_json::json!({
        "name": auth.principal.name,
        "is_admin": auth.principal.is_admin,
    }))
}

async fn submit_job(
    State(state): State<AppState>,
    auth: RequireAuth,
    Json(request): Json<SubmitRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let receipt = state.submissions.submit(&auth.principal, request).await?;
    Ok((StatusCode::ACCEPTED, Json(receipt)))
}

async fn submit_batch(
    State(state): State<AppState>,
    auth: RequireAuth,
    Json(request): Json<BatchSubmitRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let receipt = state
        .submissions
        .submit_batch(&auth.principal, request)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(receipt)))
}

#[derive(Debug, Deserialize)]
struct GetJobQuery {
    #[serde(default)]
    refresh: bool,
}

async fn get_job(
    State(state): State<AppState>,
    auth: RequireAuth,
    Path(id): Path<Uuid>,
    Query(query): Query<GetJobQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let view = state
        .tracker
        .status(&auth.principal, id, query.refresh)
        .await?;
    Ok(Json(view))
}

#[derive(Debug, Deserialize)]
struct ListJobsQuery {
    limit: Option<usize>,
}

async fn list_jobs(
    State(state): State<AppState>,
    auth: RequireAuth,
    Query(query): Query<ListJobsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query.limit.unwrap_or(LIST_DEFAULT_LIMIT);
    let jobs = state.tracker.list(&auth.principal, limit).await?;
    let count = jobs.len();
    Ok(Json(serde_json::json!({
        "jobs": jobs,
        "count": count,
    })))
}

/// SSE stream of job status changes. One `snapshot` event per status change;
/// the stream closes after a terminal snapshot, a `denied` event, or an
/// `error` event.
async fn stream_job(
    State(state): State<AppState>,
    auth: RequireAuth,
    Path(id): Path<Uuid>,
) -> Sse<impl futures::Stream<Item = Result<Event, std::convert::Infallible>>> {
    let stream = state
        .streamer
        .stream(auth.principal, id)
        .filter_map(|event| match serde_json::to_string(&event) {
            Ok(json) => Some(Ok(Event::default().event(event.name()).data(json))),
            Err(_) => None,
        });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    )
}

async fn cancel_job(
    State(state): State<AppState>,
    auth: RequireAuth,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let view = state.tracker.cancel(&auth.principal, id).await?;
    Ok(Json(view))
}

/// Push the current job view to the configured webhook endpoint.
async fn notify_job(
    State(state): State<AppState>,
    auth: RequireAuth,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let view = state.tracker.status(&auth.principal, id, true).await?;
    state.notifier.notify(&view).await?;
    Ok(Json(serde_json::json!({
        "delivered": true,
        "job_id": id,
    })))
}

// =============================================================================
// ROUTER
// =============================================================================

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_snapshot))
        .route("/auth/me", get(auth_me))
        .route("/api/v1/jobs", post(submit_job).get(list_jobs))
        .route("/api/v1/jobs/batch", post(submit_batch))
        .route("/api/v1/jobs/:id", get(get_job))
        .route("/api/v1/jobs/:id/stream", get(stream_job))
        .route("/api/v1/jobs/:id/cancel", post(cancel_job))
        .route("/api/v1/jobs/:id/notify", post(notify_job))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT]),
        )
        .layer(RequestBodyLimitLayer::new(1024 * 1024)) // 1 MB
        .with_state(state)
}

// =============================================================================
// STARTUP
// =============================================================================

fn build_rate_limiter() -> anyhow::Result<Option<Arc<GlobalRateLimiter>>> {
    let enabled = std::env::var("RATE_LIMIT_ENABLED")
        .map(|v| v != "false" && v != "0")
        .unwrap_or(true);
    if !enabled {
        return Ok(None);
    }
    let requests = std::env::var("RATE_LIMIT_REQUESTS")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(120);
    let period_secs = std::env::var("RATE_LIMIT_PERIOD_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(60);

    let burst = NonZeroU32::new(requests)
        .ok_or_else(|| anyhow::anyhow!("RATE_LIMIT_REQUESTS must be non-zero"))?;
    let quota = Quota::with_period(Duration::from_secs(period_secs))
        .ok_or_else(|| anyhow::anyhow!("RATE_LIMIT_PERIOD_SECS must be non-zero"))?
        .allow_burst(burst);
    Ok(Some(Arc::new(RateLimiter::direct(quota))))
}

fn build_state(
    broker: Arc<dyn Broker>,
    recent: Arc<dyn RecentJobsIndex>,
    identity: Arc<dyn IdentityProvider>,
    rate_limiter: Option<Arc<GlobalRateLimiter>>,
    require_rights_confirm: bool,
    timeout_minutes: u32,
    webhook_url: Option<String>,
) -> AppState {
    let metrics = Arc::new(MetricsRecorder::new());
    let submissions = Arc::new(
        SubmissionService::new(broker.clone(), recent.clone(), metrics.clone())
            .with_require_rights_confirm(require_rights_confirm)
            .with_timeout_minutes(timeout_minutes),
    );
    let tracker = Arc::new(StatusTracker::new(
        broker.clone(),
        recent,
        metrics.clone(),
    ));
    let streamer = Arc::new(StatusStreamer::new(broker));

    AppState {
        submissions,
        tracker,
        streamer,
        identity,
        metrics,
        notifier: WebhookNotifier::new(webhook_url),
        rate_limiter,
        started_at: Utc::now(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with configurable output
    //
    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   RUST_LOG    - standard env filter (default: "ingestd_api=debug,tower_http=debug")
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "ingestd_api=debug,ingestd_jobs=debug,tower_http=debug".into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if log_format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse::<u16>().ok())
        .unwrap_or(8000);
    let require_rights_confirm = std::env::var("REQUIRE_RIGHTS_CONFIRM")
        .map(|v| v != "false" && v != "0")
        .unwrap_or(true);
    let timeout_minutes = std::env::var("JOB_TIMEOUT_MINUTES")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .map(defaults::clamp_timeout_minutes)
        .unwrap_or(defaults::DEFAULT_JOB_TIMEOUT_MINUTES);
    let webhook_url = std::env::var("WEBHOOK_URL").ok();

    let identity = Arc::new(StaticTokenProvider::from_env()?);
    if identity.is_empty() {
        warn!("API_TOKENS is empty; every request will be rejected");
    }

    // Queue transport: Redis in production, in-memory for single-process
    // deployments (BROKER=memory).
    let broker_kind = std::env::var("BROKER").unwrap_or_else(|_| "redis".to_string());
    let (broker, recent, store): (
        Arc<dyn Broker>,
        Arc<dyn RecentJobsIndex>,
        Arc<dyn JobStore>,
    ) = match broker_kind.as_str() {
        "memory" => {
            let memory = Arc::new(MemoryBroker::new());
            (memory.clone(), memory.clone(), memory)
        }
        "redis" => {
            let url = std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379/0".to_string());
            let redis = Arc::new(RedisBroker::connect(&url).await?);
            (redis.clone(), redis.clone(), redis)
        }
        other => anyhow::bail!("unknown BROKER {other:?} (expected \"redis\" or \"memory\")"),
    };

    let rate_limiter = build_rate_limiter()?;
    let state = build_state(
        broker,
        recent,
        identity,
        rate_limiter,
        require_rights_confirm,
        timeout_minutes,
        webhook_url,
    );

    // In-process worker (disable with WORKER_ENABLED=false when a dedicated
    // worker deployment claims from the same queue).
    let worker_config = WorkerConfig::from_env();
    let _worker_handle = if worker_config.enabled {
        let worker = JobWorker::new(
            store,
            Arc::new(NoOpHandler),
            worker_config,
            state.metrics.clone(),
        );
        Some(worker.start())
    } else {
        info!("In-process worker disabled");
        None
    };

    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use ingestd_core::models::JobStatus;
    use serde_json::{json, Value};

    const ALICE_TOKEN: &str = "alice-token";
    const BOB_TOKEN: &str = "bob-token";
    const ADMIN_TOKEN: &str = "admin-token";

    struct TestServer {
        base: String,
        broker: Arc<MemoryBroker>,
        client: reqwest::Client,
    }

    impl TestServer {
        async fn spawn() -> Self {
            let broker = Arc::new(MemoryBroker::new());
            let identity = Arc::new(
                StaticTokenProvider::new()
                    .with_token(ALICE_TOKEN, Principal::new("alice"))
                    .with_token(BOB_TOKEN, Principal::new("bob"))
                    .with_token(ADMIN_TOKEN, Principal::admin("ops")),
            );
            let state = build_state(
                broker.clone(),
                broker.clone(),
                identity,
                None,
                false,
                60,
                None,
            );
            let app = build_router(state);

            let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
                .await
                .unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });

            Self {
                base: format!("http://{addr}"),
                broker,
                client: reqwest::Client::new(),
            }
        }

        async fn submit(&self, token: &str, url: &str) -> Uuid {
            let response = self
                .client
                .post(format!("{}/api/v1/jobs", self.base))
                .bearer_auth(token)
                .json(&json!({ "url": url }))
                .send()
                .await
                .unwrap();
            assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);
            let body: Value = response.json().await.unwrap();
            body["job_id"].as_str().unwrap().parse().unwrap()
        }
    }

    #[tokio::test]
    async fn test_requests_without_token_are_rejected() {
        let server = TestServer::spawn().await;

        let response = server
            .client
            .post(format!("{}/api/v1/jobs", server.base))
            .json(&json!({ "url": "https://example.com/v" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);

        let response = server
            .client
            .get(format!("{}/api/v1/jobs", server.base))
            .bearer_auth("bogus")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_health_needs_no_token() {
        let server = TestServer::spawn().await;

        let response = server
            .client
            .get(format!("{}/health", server.base))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_submit_then_status_then_cancel() {
        let server = TestServer::spawn().await;
        let id = server.submit(ALICE_TOKEN, "https://example.com/v.mp4").await;

        let response = server
            .client
            .get(format!("{}/api/v1/jobs/{id}", server.base))
            .bearer_auth(ALICE_TOKEN)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["status"], "queued");
        assert_eq!(body["owner"], "alice");

        let response = server
            .client
            .post(format!("{}/api/v1/jobs/{id}/cancel", server.base))
            .bearer_auth(ALICE_TOKEN)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["status"], "stopped");
    }

    #[tokio::test]
    async fn test_cross_user_access_forbidden() {
        let server = TestServer::spawn().await;
        let id = server.submit(ALICE_TOKEN, "https://example.com/v").await;

        let response = server
            .client
            .get(format!("{}/api/v1/jobs/{id}", server.base))
            .bearer_auth(BOB_TOKEN)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::FORBIDDEN);

        let response = server
            .client
            .post(format!("{}/api/v1/jobs/{id}/cancel", server.base))
            .bearer_auth(BOB_TOKEN)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::FORBIDDEN);

        // Admin is allowed.
        let response = server
            .client
            .get(format!("{}/api/v1/jobs/{id}", server.base))
            .bearer_auth(ADMIN_TOKEN)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
    }

    #[tokio::test]
    async fn test_cancel_terminal_job_returns_400() {
        let server = TestServer::spawn().await;
        let id = server.submit(ALICE_TOKEN, "https://example.com/v").await;
        server.broker.claim_next().await.unwrap();
        server.broker.complete(id, json!({"ok": true})).await.unwrap();

        let response = server
            .client
            .post(format!("{}/api/v1/jobs/{id}/cancel", server.base))
            .bearer_auth(ALICE_TOKEN)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
        let body: Value = response.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().contains("terminal"));
    }

    #[tokio::test]
    async fn test_unknown_job_returns_404() {
        let server = TestServer::spawn().await;

        let response = server
            .client
            .get(format!("{}/api/v1/jobs/{}", server.base, Uuid::new_v4()))
            .bearer_auth(ALICE_TOKEN)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_invalid_submission_returns_400() {
        let server = TestServer::spawn().await;

        let response = server
            .client
            .post(format!("{}/api/v1/jobs", server.base))
            .bearer_auth(ALICE_TOKEN)
            .json(&json!({ "url": "not-a-url" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_batch_submission() {
        let server = TestServer::spawn().await;

        let response = server
            .client
            .post(format!("{}/api/v1/jobs/batch", server.base))
            .bearer_auth(ALICE_TOKEN)
            .json(&json!({
                "urls": ["https://example.com/a", "bad", "https://example.com/b"],
                "confirm_rights": true,
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["job_ids"].as_array().unwrap().len(), 2);
        assert_eq!(body["failures"].as_array().unwrap().len(), 1);
        assert_eq!(body["failures"][0]["index"], 1);
        assert!(body["batch_id"].is_string());
    }

    #[tokio::test]
    async fn test_list_jobs_filters_by_owner() {
        let server = TestServer::spawn().await;
        server.submit(ALICE_TOKEN, "https://example.com/a").await;
        server.submit(BOB_TOKEN, "https://example.com/b").await;

        let response = server
            .client
            .get(format!("{}/api/v1/jobs", server.base))
            .bearer_auth(ALICE_TOKEN)
            .send()
            .await
            .unwrap();
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["count"], 1);
        assert_eq!(body["jobs"][0]["owner"], "alice");

        let response = server
            .client
            .get(format!("{}/api/v1/jobs", server.base))
            .bearer_auth(ADMIN_TOKEN)
            .send()
            .await
            .unwrap();
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["count"], 2);
    }

    #[tokio::test]
    async fn test_metrics_admin_only() {
        let server = TestServer::spawn().await;

        let response = server
            .client
            .get(format!("{}/metrics", server.base))
            .bearer_auth(ALICE_TOKEN)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::FORBIDDEN);

        server.submit(ALICE_TOKEN, "https://example.com/v").await;
        let response = server
            .client
            .get(format!("{}/metrics", server.base))
            .bearer_auth(ADMIN_TOKEN)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["jobs_submitted"], 1);
    }

    #[tokio::test]
    async fn test_auth_me() {
        let server = TestServer::spawn().await;

        let response = server
            .client
            .get(format!("{}/auth/me", server.base))
            .bearer_auth(ADMIN_TOKEN)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["name"], "ops");
        assert_eq!(body["is_admin"], true);
    }

    #[tokio::test]
    async fn test_notify_without_webhook_url_returns_400() {
        let server = TestServer::spawn().await;
        let id = server.submit(ALICE_TOKEN, "https://example.com/v").await;

        let response = server
            .client
            .post(format!("{}/api/v1/jobs/{id}/notify", server.base))
            .bearer_auth(ALICE_TOKEN)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_stream_closes_after_terminal_snapshot() {
        let server = TestServer::spawn().await;
        let id = server.submit(ALICE_TOKEN, "https://example.com/v").await;
        server.broker.claim_next().await.unwrap();
        server
            .broker
            .complete(id, json!({"frames": 10}))
            .await
            .unwrap();

        let response = server
            .client
            .get(format!("{}/api/v1/jobs/{id}/stream", server.base))
            .bearer_auth(ALICE_TOKEN)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);

        // The job is already terminal, so one snapshot arrives and the
        // stream ends.
        let body = tokio::time::timeout(Duration::from_secs(5), response.text())
            .await
            .expect("stream did not close")
            .unwrap();
        assert!(body.contains("event: snapshot"));
        assert!(body.contains(&JobStatus::Finished.to_string()));
    }

    #[test]
    fn test_api_error_mapping() {
        use ingestd_core::Error;

        let err: ApiError = Error::Validation("bad".into()).into();
        assert!(matches!(err, ApiError::BadRequest(_)));

        let err: ApiError = Error::Forbidden("no".into()).into();
        assert!(matches!(err, ApiError::Forbidden(_)));

        let err: ApiError = Error::JobNotFound(Uuid::nil()).into();
        assert!(matches!(err, ApiError::NotFound(_)));

        let err: ApiError = Error::CancelFailed(Uuid::nil()).into();
        assert!(matches!(err, ApiError::BadRequest(_)));

        let err: ApiError = Error::Broker("down".into()).into();
        assert!(matches!(err, ApiError::Internal(_)));
    }
}
