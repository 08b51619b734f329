#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo,
        clippy::indexing_slicing
    )
)]
#![forbid(unsafe_code)]

//! C7 command API (§6): the 11 commands exposed as HTTP/JSON over axum, using
//! the same `IntoResponse`/`ServiceBuilder` shape throughout, with requests
//! attributed to a per-user caller rather than any transport-level identity.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    error_handling::HandleErrorLayer,
    extract::{ConnectInfo, MatchedPath, Path, Query, State},
    http::{HeaderMap, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tower::{limit::ConcurrencyLimitLayer, load_shed::LoadShedLayer, timeout::TimeoutLayer, BoxError, ServiceBuilder};
use tower_http::{catch_panic::CatchPanicLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};

use m3d_pipeline::{AnalysisPatch, PipelineEngine};
use m3d_poller::{PollOutcome, StatusPoller};
use m3d_telemetry::Metrics;
use m3d_types::error::{ApiError, ApiErrorCode, PipelineError};
use m3d_types::pipeline::{Angle, MeshProviderId, PipelineStatus, PipelineView, ResetTarget, Style};

// --- Error handling ---

/// Wraps the §6 envelope so it can be returned directly from a handler.
struct AppError(ApiError);

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        AppError(ApiError::from(err))
    }
}

impl From<ApiError> for AppError {
    fn from(err: ApiError) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self.0.code {
            ApiErrorCode::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiErrorCode::PermissionDenied => StatusCode::FORBIDDEN,
            ApiErrorCode::NotFound => StatusCode::NOT_FOUND,
            ApiErrorCode::InvalidArgument => StatusCode::BAD_REQUEST,
            ApiErrorCode::FailedPrecondition => StatusCode::CONFLICT,
            ApiErrorCode::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
            ApiErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(code = ?self.0.code, message = %self.0.message, "command API internal error");
        }
        (status, Json(serde_json::json!({ "error": self.0 }))).into_response()
    }
}

async fn map_middleware_error(err: BoxError) -> impl IntoResponse {
    if err.is::<tower::timeout::error::Elapsed>() {
        (
            StatusCode::REQUEST_TIMEOUT,
            Json(serde_json::json!({
                "error": { "code": "FailedPrecondition", "message": "request timed out" }
            })),
        )
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({
                "error": { "code": "Internal", "message": err.to_string() }
            })),
        )
    }
}

fn caller_from_headers(headers: &HeaderMap) -> Result<String, AppError> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .ok_or_else(|| AppError(ApiError::new(ApiErrorCode::Unauthenticated, "missing X-User-Id header")))
}

fn parse_status(s: &str) -> Option<PipelineStatus> {
    match s {
        "draft" => Some(PipelineStatus::Draft),
        "generating-images" => Some(PipelineStatus::GeneratingImages),
        "batch-queued" => Some(PipelineStatus::BatchQueued),
        "batch-processing" => Some(PipelineStatus::BatchProcessing),
        "images-ready" => Some(PipelineStatus::ImagesReady),
        "generating-mesh" => Some(PipelineStatus::GeneratingMesh),
        "mesh-ready" => Some(PipelineStatus::MeshReady),
        "generating-texture" => Some(PipelineStatus::GeneratingTexture),
        "completed" => Some(PipelineStatus::Completed),
        "failed" => Some(PipelineStatus::Failed),
        _ => None,
    }
}

fn parse_angle(s: &str) -> Option<Angle> {
    Angle::ALL.iter().copied().find(|a| a.as_str() == s)
}

fn parse_provider(s: &str) -> Option<MeshProviderId> {
    MeshProviderId::ALL.iter().copied().find(|p| p.as_str() == s)
}

fn parse_reset_target(s: &str) -> Option<ResetTarget> {
    match s {
        "draft" => Some(ResetTarget::Draft),
        "images-ready" => Some(ResetTarget::ImagesReady),
        "mesh-ready" => Some(ResetTarget::MeshReady),
        _ => None,
    }
}

// --- Rate limiting: a simple per-IP token bucket, no trusted-proxy CIDR
// rewriting since this deployment has no use for it. ---

#[derive(Clone)]
struct Bucket {
    tokens: f64,
    last: Instant,
}

#[derive(Clone)]
struct IpLimiter {
    buckets: Arc<DashMap<IpAddr, Bucket>>,
    rps: f64,
    burst: f64,
}

impl IpLimiter {
    fn new(rps: u32, burst: u32) -> Self {
        Self {
            buckets: Arc::new(DashMap::new()),
            rps: rps as f64,
            burst: burst as f64,
        }
    }

    fn client_ip<B>(req: &Request<B>) -> IpAddr {
        req.extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|c| c.0.ip())
            .unwrap_or(IpAddr::from([127, 0, 0, 1]))
    }

    fn allow<B>(&self, req: &Request<B>) -> bool {
        let ip = Self::client_ip(req);
        let now = Instant::now();
        let mut entry = self.buckets.entry(ip).or_insert_with(|| Bucket {
            tokens: self.burst,
            last: now,
        });
        let elapsed = now.duration_since(entry.last).as_secs_f64();
        entry.tokens = (entry.tokens + elapsed * self.rps).min(self.burst);
        entry.last = now;
        if entry.tokens >= 1.0 {
            entry.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

async fn rate_limit_middleware(State(limiter): State<IpLimiter>, req: Request<axum::body::Body>, next: Next) -> Response {
    if limiter.allow(&req) {
        next.run(req).await
    } else {
        AppError(ApiError::new(ApiErrorCode::ResourceExhausted, "too many requests")).into_response()
    }
}

// --- State ---

struct AppState {
    engine: Arc<PipelineEngine>,
    poller: Arc<StatusPoller>,
    metrics: Metrics,
}

/// Records one §6 RPC's outcome under its route template, the way the
/// kernel's gateway records every handler's result against `chain_id`/`route`.
async fn metrics_middleware(State(state): State<Arc<AppState>>, req: Request<axum::body::Body>, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let started = Instant::now();
    let response = next.run(req).await;
    state.metrics.inc_request(&route, response.status().as_u16());
    state.metrics.observe_request_duration(&route, started.elapsed().as_secs_f64());
    response
}

// --- Request/response bodies ---

#[derive(Deserialize)]
struct CreatePipelineRequest {
    input_images: Vec<String>,
    settings: m3d_types::pipeline::PipelineSettings,
    processing_mode: m3d_types::pipeline::ProcessingMode,
    #[serde(default)]
    user_description: Option<String>,
}

#[derive(Deserialize)]
struct ListQuery {
    status: Option<String>,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    20
}

#[derive(Serialize)]
struct ListPipelinesResponse {
    pipelines: Vec<PipelineView>,
}

#[derive(Deserialize)]
struct AnalyzeImageRequest {
    #[serde(default = "default_locale")]
    locale: String,
}

fn default_locale() -> String {
    "en-US".to_string()
}

#[derive(Deserialize)]
struct UpdateAnalysisRequest {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    color_palette: Option<Vec<String>>,
    #[serde(default)]
    selected_style: Option<Style>,
}

#[derive(Deserialize)]
struct RegenerateViewRequest {
    #[serde(default)]
    hint: Option<String>,
}

#[derive(Deserialize)]
struct StartMeshRequest {
    provider: String,
    #[serde(default = "default_provider_options")]
    provider_options: serde_json::Value,
}

fn default_provider_options() -> serde_json::Value {
    serde_json::json!({})
}

#[derive(Deserialize)]
struct StartTextureRequest {
    #[serde(default)]
    text_prompt: Option<String>,
    #[serde(default)]
    enable_pbr: bool,
}

#[derive(Deserialize)]
struct ResetStepRequest {
    target: String,
    #[serde(default)]
    keep_results: bool,
}

// --- Handlers ---

async fn create_pipeline(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreatePipelineRequest>,
) -> Result<Json<PipelineView>, AppError> {
    let caller = caller_from_headers(&headers)?;
    let p = state
        .engine
        .create(&caller, body.input_images, body.settings, body.processing_mode, body.user_description)
        .await?;
    Ok(Json(PipelineView::from(&p)))
}

async fn get_pipeline(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<PipelineView>, AppError> {
    let caller = caller_from_headers(&headers)?;
    let p = state.engine.get_pipeline(&id, &caller).await?;
    Ok(Json(PipelineView::from(&p)))
}

async fn list_pipelines(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListPipelinesResponse>, AppError> {
    let caller = caller_from_headers(&headers)?;
    let status = match &query.status {
        Some(s) => Some(
            parse_status(s)
                .ok_or_else(|| AppError(ApiError::new(ApiErrorCode::InvalidArgument, format!("unknown status {s}"))))?,
        ),
        None => None,
    };
    let pipelines = state.engine.list_pipelines(&caller, status, query.limit).await?;
    Ok(Json(ListPipelinesResponse {
        pipelines: pipelines.iter().map(PipelineView::from).collect(),
    }))
}

async fn analyze_image(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<AnalyzeImageRequest>,
) -> Result<Json<PipelineView>, AppError> {
    let caller = caller_from_headers(&headers)?;
    let p = state.engine.analyze(&id, &caller, &body.locale).await?;
    Ok(Json(PipelineView::from(&p)))
}

async fn update_pipeline_analysis(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<UpdateAnalysisRequest>,
) -> Result<Json<PipelineView>, AppError> {
    let caller = caller_from_headers(&headers)?;
    let patch = AnalysisPatch {
        description: body.description,
        color_palette: body.color_palette,
        selected_style: body.selected_style,
    };
    let p = state.engine.update_pipeline_analysis(&id, &caller, patch).await?;
    Ok(Json(PipelineView::from(&p)))
}

async fn generate_views(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<PipelineView>, AppError> {
    let caller = caller_from_headers(&headers)?;
    let p = state.engine.generate_views(&id, &caller).await?;
    Ok(Json(PipelineView::from(&p)))
}

async fn regenerate_view(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((id, angle)): Path<(String, String)>,
    Json(body): Json<RegenerateViewRequest>,
) -> Result<Json<PipelineView>, AppError> {
    let caller = caller_from_headers(&headers)?;
    let angle = parse_angle(&angle)
        .ok_or_else(|| AppError(ApiError::new(ApiErrorCode::InvalidArgument, format!("unknown angle {angle}"))))?;
    let p = state.engine.regenerate_view(&id, &caller, angle, body.hint).await?;
    Ok(Json(PipelineView::from(&p)))
}

async fn start_mesh(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<StartMeshRequest>,
) -> Result<Json<PipelineView>, AppError> {
    let caller = caller_from_headers(&headers)?;
    let provider = parse_provider(&body.provider)
        .ok_or_else(|| AppError(ApiError::new(ApiErrorCode::InvalidArgument, format!("unknown provider {}", body.provider))))?;
    let p = state.engine.start_mesh(&id, &caller, provider, body.provider_options).await?;
    Ok(Json(PipelineView::from(&p)))
}

async fn check_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<PipelineView>, AppError> {
    let caller = caller_from_headers(&headers)?;
    let outcome = state.poller.poll(&id, &caller).await?;
    let p = match outcome {
        PollOutcome::Throttled(p) | PollOutcome::Polled(p) => p,
    };
    Ok(Json(PipelineView::from(&p)))
}

async fn start_texture(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<StartTextureRequest>,
) -> Result<Json<PipelineView>, AppError> {
    let caller = caller_from_headers(&headers)?;
    let p = state
        .engine
        .start_texture(&id, &caller, body.text_prompt, body.enable_pbr)
        .await?;
    Ok(Json(PipelineView::from(&p)))
}

async fn reset_step(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<ResetStepRequest>,
) -> Result<Json<PipelineView>, AppError> {
    let caller = caller_from_headers(&headers)?;
    let target = parse_reset_target(&body.target)
        .ok_or_else(|| AppError(ApiError::new(ApiErrorCode::InvalidArgument, format!("unknown reset target {}", body.target))))?;
    let p = state.engine.reset_step(&id, &caller, target, body.keep_results).await?;
    if p.status == PipelineStatus::MeshReady || p.status == PipelineStatus::Completed {
        state.poller.forget(&id);
    }
    Ok(Json(PipelineView::from(&p)))
}

async fn metrics_handler() -> ([(axum::http::HeaderName, String); 1], axum::body::Bytes) {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buf = Vec::with_capacity(1 << 16);
    if let Err(e) = prometheus::Encoder::encode(&encoder, &metric_families, &mut buf) {
        tracing::error!(error = %e, "failed to encode prometheus metrics");
    }
    (
        [(axum::http::header::CONTENT_TYPE, prometheus::Encoder::format_type(&encoder).to_string())],
        buf.into(),
    )
}

// --- Server wiring ---

pub struct GatewayConfig {
    pub listen_addr: String,
    pub rps: u32,
    pub burst: u32,
    pub body_limit_kb: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            rps: 20,
            burst: 40,
            body_limit_kb: 512,
        }
    }
}

pub async fn run_server(
    config: GatewayConfig,
    engine: Arc<PipelineEngine>,
    metrics: Metrics,
    mut shutdown_rx: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let poller = Arc::new(StatusPoller::new(engine.clone()).with_metrics(metrics.clone()));
    let state = Arc::new(AppState { engine, poller, metrics });
    let limiter = IpLimiter::new(config.rps, config.burst);

    let app = Router::new()
        .route("/v1/pipelines", post(create_pipeline).get(list_pipelines))
        .route("/v1/pipelines/:id", get(get_pipeline))
        .route("/v1/pipelines/:id/analyze", post(analyze_image))
        .route("/v1/pipelines/:id/analysis", post(update_pipeline_analysis))
        .route("/v1/pipelines/:id/views", post(generate_views))
        .route("/v1/pipelines/:id/views/:angle/regenerate", post(regenerate_view))
        .route("/v1/pipelines/:id/mesh", post(start_mesh))
        .route("/v1/pipelines/:id/status", post(check_status))
        .route("/v1/pipelines/:id/texture", post(start_texture))
        .route("/v1/pipelines/:id/reset", post(reset_step))
        .route("/metrics", get(metrics_handler))
        .route_layer(middleware::from_fn_with_state(limiter.clone(), rate_limit_middleware))
        .route_layer(middleware::from_fn_with_state(state.clone(), metrics_middleware))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(map_middleware_error))
                .layer(LoadShedLayer::new())
                .layer(ConcurrencyLimitLayer::new(128))
                .layer(TimeoutLayer::new(Duration::from_secs(30))),
        )
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(config.body_limit_kb * 1024));

    let addr: SocketAddr = config.listen_addr.parse()?;
    tracing::info!(target: "m3d-gateway", "command API listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let server = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).with_graceful_shutdown(
        async move {
            shutdown_rx.changed().await.ok();
            tracing::info!(target: "m3d-gateway", "shutting down gracefully");
        },
    );

    if let Err(e) = server.await {
        tracing::error!(target: "m3d-gateway", error = %e, "server error");
    }

    Ok(())
}
