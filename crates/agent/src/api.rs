//! HTTP API for health checks, Prometheus metrics and savings reports

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use cost_lib::{
    health::ComponentStatus, pipeline::PipelineHandles, store::AuditEntry, CostObservation,
    RemediationResult, SavingsSummary,
};
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info};

/// Observations returned when no limit is given
const DEFAULT_OBSERVATION_LIMIT: usize = 100;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub handles: PipelineHandles,
}

impl AppState {
    pub fn new(handles: PipelineHandles) -> Self {
        Self { handles }
    }
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.handles.health.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.handles.health.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            Vec::new(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

async fn summary(State(state): State<Arc<AppState>>) -> Json<SavingsSummary> {
    Json(state.handles.results.summary())
}

#[derive(Debug, Deserialize)]
pub struct RemediationsQuery {
    pub service: Option<String>,
}

async fn remediations(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RemediationsQuery>,
) -> Json<Vec<RemediationResult>> {
    let results = match query.service {
        Some(service) => state.handles.results.for_service(&service),
        None => state.handles.results.results(),
    };
    Json(results)
}

async fn audit(State(state): State<Arc<AppState>>) -> Json<Vec<AuditEntry>> {
    Json(state.handles.audit.entries())
}

#[derive(Debug, Deserialize)]
pub struct ObservationsQuery {
    pub limit: Option<usize>,
}

/// Most recent observations, oldest first
async fn observations(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ObservationsQuery>,
) -> Json<Vec<CostObservation>> {
    let limit = query.limit.unwrap_or(DEFAULT_OBSERVATION_LIMIT);
    Json(state.handles.observations.recent_window(limit))
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/v1/summary", get(summary))
        .route("/api/v1/remediations", get(remediations))
        .route("/api/v1/audit", get(audit))
        .route("/api/v1/observations", get(observations))
        .with_state(state)
}

/// Start the API server
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    Ok(())
}
