//! Integration tests for muxbot-monitor API endpoints
//!
//! Tests cover:
//! - Health endpoint
//! - Session status before and after the monitor publishes
//! - Remote row lookup through the sheet client

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use muxbot_common::EventBus;
use muxbot_monitor::gateway::MemorySheet;
use muxbot_monitor::{build_router, AppState, MonitoredSession, SharedStatus, SheetClient};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::RwLock;
use tower::util::ServiceExt; // for `oneshot` method

const WEBHOOK: &str = "https://sheet.example/exec";

struct TestApp {
    router: axum::Router,
    status: SharedStatus,
    sheet: Arc<MemorySheet>,
}

/// Test helper: Create app with an empty status slot and in-memory sheet
fn setup_app() -> TestApp {
    let status: SharedStatus = Arc::new(RwLock::new(None));
    let sheet = Arc::new(MemorySheet::new());
    let state = AppState::new(
        status.clone(),
        EventBus::new(16),
        SheetClient::new(sheet.clone(), WEBHOOK),
    );
    TestApp {
        router: build_router(state),
        status,
        sheet,
    }
}

/// Test helper: Create request
fn test_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

/// Test helper: Extract JSON body from response
async fn extract_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Should read body");
    serde_json::from_slice(&bytes).expect("Should parse JSON")
}

async fn publish(app: &TestApp, session: &MonitoredSession) {
    *app.status.write().await = Some(session.snapshot());
}

// =============================================================================
// Health Endpoint
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let app = setup_app();

    let response = app.router.oneshot(test_request("GET", "/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "muxbot-monitor");
    assert!(body["version"].is_string());
    assert!(body["uptime_seconds"].is_u64());
}

// =============================================================================
// Status Endpoints
// =============================================================================

#[tokio::test]
async fn test_status_before_start_is_not_found() {
    let app = setup_app();

    let response = app.router.oneshot(test_request("GET", "/status")).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_status_reports_session_snapshot() {
    let app = setup_app();
    let mut session = MonitoredSession::new(vec!["evt-2".to_string(), "evt-1".to_string()]);
    session.observed_peak = 1200;
    session.remote_peak = 900;
    session.display_name = "Final".to_string();
    publish(&app, &session).await;

    let response = app.router.oneshot(test_request("GET", "/status")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["session_key"], "evt-1, evt-2");
    assert_eq!(body["event_ids"], json!(["evt-2", "evt-1"]));
    assert_eq!(body["observed_peak"], 1200);
    assert_eq!(body["enrichment"], "not_sent");
    assert_eq!(body["enrichment_sent_at"], Value::Null);
    assert_eq!(body["title"], "PEAK: 1200 | Final");
}

#[tokio::test]
async fn test_remote_row_is_fetched_for_session() {
    let app = setup_app();
    app.sheet.set_peak("evt-1", 75).await;
    app.sheet.set_cell("evt-1", "H", json!("Football")).await;
    publish(&app, &MonitoredSession::new(vec!["evt-1".to_string()])).await;

    let response = app
        .router
        .oneshot(test_request("GET", "/status/row"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["session_key"], "evt-1");
    assert_eq!(body["row"]["peak"], 75);
    assert_eq!(body["row"]["H"], "Football");
}

#[tokio::test]
async fn test_remote_row_missing_is_bad_gateway() {
    let app = setup_app();
    publish(&app, &MonitoredSession::new(vec!["evt-9".to_string()])).await;

    let response = app
        .router
        .oneshot(test_request("GET", "/status/row"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["error"]["code"], "UPSTREAM_ERROR");
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let app = setup_app();

    let response = app
        .router
        .oneshot(test_request("GET", "/api/table/settings"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
