//! HTTP API: health checks, Prometheus metrics and admission queries

use admission_lib::{
    AdmissionError, ComponentStatus, HealthRegistry, ResourceMonitor, StructuredLogger,
    TaskResourceEstimator, TaskResourceRequirements,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub monitor: Arc<ResourceMonitor>,
    pub estimator: Arc<TaskResourceEstimator>,
    pub logger: StructuredLogger,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        monitor: Arc<ResourceMonitor>,
        estimator: Arc<TaskResourceEstimator>,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            health_registry,
            monitor,
            estimator,
            logger,
        }
    }
}

/// Error body returned for rejected requests
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

enum ApiError {
    Invalid(AdmissionError),
    Internal(String),
}

impl From<AdmissionError> for ApiError {
    fn from(err: AdmissionError) -> Self {
        ApiError::Invalid(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Invalid(e) => (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

/// Health check response - returns 200 if operational, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Result<impl IntoResponse, ApiError> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&prometheus::gather(), &mut buffer)
        .map_err(|e| {
            error!(error = %e, "Failed to encode metrics");
            ApiError::Internal("failed to encode metrics".to_string())
        })?;

    Ok((
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        buffer,
    ))
}

/// Live, uncached host snapshot
async fn current_usage(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.monitor.get_current_usage().await)
}

#[derive(Debug, Deserialize)]
struct StatsQuery {
    #[serde(default = "default_window_secs")]
    window_secs: u64,
}

fn default_window_secs() -> u64 {
    60
}

async fn usage_stats(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatsQuery>,
) -> impl IntoResponse {
    Json(
        state
            .monitor
            .get_usage_stats(Duration::from_secs(query.window_secs))
            .await,
    )
}

/// Per-task size for a concurrency query: explicit figures, or the
/// estimator's profile for a task type
#[derive(Debug, Deserialize)]
struct ConcurrencyQuery {
    cpu: Option<f64>,
    memory_mb: Option<f64>,
    task_type: Option<String>,
}

#[derive(Debug, Serialize)]
struct ConcurrencyResponse {
    recommended: usize,
    task_cpu_estimate: f64,
    task_memory_estimate_mb: f64,
}

async fn recommended_concurrency(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ConcurrencyQuery>,
) -> impl IntoResponse {
    let profile = state.estimator.estimate_requirements(
        query.task_type.as_deref().unwrap_or_default(),
        "concurrency-query",
        TaskResourceRequirements::MIN_PRIORITY,
    );
    let cpu = query.cpu.unwrap_or(profile.estimated_cpu_percent);
    let memory_mb = query.memory_mb.unwrap_or(profile.estimated_memory_mb);

    let recommended = state.monitor.get_recommended_concurrency(cpu, memory_mb).await;
    state
        .logger
        .log_concurrency_recommendation(cpu, memory_mb, recommended);

    Json(ConcurrencyResponse {
        recommended,
        task_cpu_estimate: cpu,
        task_memory_estimate_mb: memory_mb,
    })
}

/// Evaluate a task for admission. Invalid requirements get 422.
async fn admission(
    State(state): State<Arc<AppState>>,
    Json(requirements): Json<TaskResourceRequirements>,
) -> Result<impl IntoResponse, ApiError> {
    let decision = state.monitor.can_schedule_task(&requirements).await?;
    state
        .logger
        .log_admission_decision(&requirements.task_id, requirements.priority, &decision);
    Ok(Json(decision))
}

#[derive(Debug, Deserialize)]
struct EstimateQuery {
    task_id: Option<String>,
    priority: Option<u8>,
}

async fn estimate(
    State(state): State<Arc<AppState>>,
    Path(task_type): Path<String>,
    Query(query): Query<EstimateQuery>,
) -> impl IntoResponse {
    let task_id = query.task_id.unwrap_or_else(|| task_type.clone());
    let priority = query.priority.unwrap_or(5);
    Json(
        state
            .estimator
            .estimate_requirements(&task_type, &task_id, priority),
    )
}

#[derive(Debug, Deserialize)]
struct SampleBody {
    cpu_percent: f64,
    memory_mb: f64,
    duration_seconds: f64,
}

/// Record what a finished task used
async fn record_sample(
    State(state): State<Arc<AppState>>,
    Path(task_type): Path<String>,
    Json(sample): Json<SampleBody>,
) -> Result<impl IntoResponse, ApiError> {
    state.estimator.record_task_resources(
        &task_type,
        sample.cpu_percent,
        sample.memory_mb,
        sample.duration_seconds,
    )?;
    Ok(StatusCode::NO_CONTENT)
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/v1/usage", get(current_usage))
        .route("/v1/usage/stats", get(usage_stats))
        .route("/v1/concurrency", get(recommended_concurrency))
        .route("/v1/admission", post(admission))
        .route("/v1/estimates/:task_type", get(estimate))
        .route("/v1/estimates/:task_type/samples", post(record_sample))
        .with_state(state)
}

/// Serve the API until `shutdown` resolves
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
