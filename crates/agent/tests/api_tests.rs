//! Integration tests for the agent API endpoints

#[path = "../src/api.rs"]
#[allow(dead_code)]
mod api;

use api::{create_router, AppState};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use cost_lib::{
    health::Component, source::StaticSource, CostObservation, Pipeline, PipelineConfig,
    Provider,
};
use std::sync::Arc;
use tower::ServiceExt;

fn test_config() -> PipelineConfig {
    PipelineConfig::without_baselines()
        .with_baseline(Provider::Aws, "compute", 100.0)
        .with_baseline(Provider::Azure, "storage", 200.0)
}

/// Router over a pipeline that has run one cycle: one remediation, one
/// policy denial and one observation within threshold
async fn setup_test_app() -> (Router, Arc<AppState>) {
    let source = StaticSource::new(vec![vec![
        CostObservation::new(Provider::Aws, "compute", 135.0),
        CostObservation::new(Provider::Azure, "storage", 500.0),
        CostObservation::new(Provider::Aws, "compute", 110.0),
    ]]);
    let mut pipeline = Pipeline::builder(test_config())
        .source(Arc::new(source))
        .build()
        .await
        .unwrap();
    pipeline.tick().await.unwrap();

    let state = Arc::new(AppState::new(pipeline.handles().clone()));
    let router = create_router(state.clone());

    (router, state)
}

async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let (app, _state) = setup_test_app().await;

    let (status, health) = get_json(app, "/healthz").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");
}

#[tokio::test]
async fn test_healthz_returns_ok_when_degraded() {
    let (app, state) = setup_test_app().await;

    state
        .handles
        .health
        .set_degraded(Component::Collector, "Metric source unavailable")
        .await;

    let (status, health) = get_json(app, "/healthz").await;

    // Degraded still returns 200 (operational)
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "degraded");
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let (app, state) = setup_test_app().await;

    state
        .handles
        .health
        .set_unhealthy(Component::Remediator, "Remediation task failed")
        .await;

    let (status, health) = get_json(app, "/healthz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(health["status"], "unhealthy");
}

#[tokio::test]
async fn test_healthz_includes_component_details() {
    let (app, _state) = setup_test_app().await;

    let (_, health) = get_json(app, "/healthz").await;

    assert!(health["components"]["collector"].is_object());
    assert!(health["components"]["remediator"].is_object());
    assert!(health["components"]["event_bus"].is_object());
}

#[tokio::test]
async fn test_readyz_returns_503_when_not_ready() {
    let (app, _state) = setup_test_app().await;

    // Readiness is only set once the pipeline tasks are running
    let (status, readiness) = get_json(app, "/readyz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(readiness["ready"], false);
}

#[tokio::test]
async fn test_readyz_returns_ok_when_ready() {
    let (app, state) = setup_test_app().await;
    state.handles.health.set_running(true).await;

    let (status, readiness) = get_json(app, "/readyz").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(readiness["ready"], true);
}

#[tokio::test]
async fn test_readyz_returns_503_when_ready_but_unhealthy() {
    let (app, state) = setup_test_app().await;
    state.handles.health.set_running(true).await;
    state
        .handles
        .health
        .set_unhealthy(Component::Collector, "Failed")
        .await;

    let (status, _) = get_json(app, "/readyz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_metrics_endpoint_returns_prometheus_format() {
    let (app, _state) = setup_test_app().await;

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().contains("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let metrics_text = String::from_utf8(body.to_vec()).unwrap();

    assert!(metrics_text.contains("cost_pipeline_collection_latency_seconds_bucket"));
    assert!(metrics_text.contains("cost_pipeline_anomalies_detected_total"));
    assert!(metrics_text.contains("cost_pipeline_remediations_applied_total"));
    assert!(metrics_text.contains("cost_pipeline_total_savings"));
}

#[tokio::test]
async fn test_summary_reports_savings() {
    let (app, _state) = setup_test_app().await;

    let (status, summary) = get_json(app, "/api/v1/summary").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["count"], 1);
    let total = summary["total_savings"].as_f64().unwrap();
    assert!((total - 27.0).abs() < 1e-9);
    assert_eq!(summary["per_service"][0]["provider"], "aws");
    assert_eq!(summary["per_service"][0]["service"], "compute");
}

#[tokio::test]
async fn test_remediations_filter_by_service() {
    let (app, _state) = setup_test_app().await;

    let (status, all) = get_json(app.clone(), "/api/v1/remediations").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(all.as_array().unwrap().len(), 1);
    assert_eq!(all[0]["workflow"], "compute-optimization");

    let (_, storage) = get_json(app, "/api/v1/remediations?service=storage").await;
    assert!(storage.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_audit_lists_denials() {
    let (app, _state) = setup_test_app().await;

    let (status, audit) = get_json(app, "/api/v1/audit").await;

    assert_eq!(status, StatusCode::OK);
    let entries = audit.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["kind"], "policy_denied");
    assert_eq!(entries[0]["provider"], "azure");
}

#[tokio::test]
async fn test_observations_respects_limit() {
    let (app, _state) = setup_test_app().await;

    let (_, all) = get_json(app.clone(), "/api/v1/observations").await;
    assert_eq!(all.as_array().unwrap().len(), 3);

    let (status, recent) = get_json(app, "/api/v1/observations?limit=1").await;
    assert_eq!(status, StatusCode::OK);
    let recent = recent.as_array().unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0]["cost"].as_f64().unwrap(), 110.0);
}
