//! HTTP API handlers exercised through the router

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::Utc;
use engine_api::models::{
    CancelResponse, DeploymentResponse, ErrorResponse, HealthResponse, LogsResponse,
    QueueDeploymentResponse,
};
use launchpad::server::serve::router;
use launchpad::server::state::ServerState;
use launchpad::store::DeploymentStore;
use platform_models::{DeploymentStatus, LogEntry, LogStream};
use serde::de::DeserializeOwned;
use tower::ServiceExt;

use crate::common::{application, Harness};

fn app_router(harness: &Harness) -> Router {
    router(Arc::new(ServerState::new(
        harness.store.clone(),
        harness.queue.clone(),
        harness.status.clone(),
        harness.canary.clone(),
    )))
}

async fn call<T: DeserializeOwned>(
    router: &Router,
    method: &str,
    uri: &str,
    body: Option<&str>,
) -> (StatusCode, T) {
    let mut request = Request::builder().method(method).uri(uri);
    if body.is_some() {
        request = request.header("content-type", "application/json");
    }
    let request = request
        .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn queue(router: &Router) -> String {
    let (status, body): (_, QueueDeploymentResponse) = call(
        router,
        "POST",
        "/applications/a1/deployments",
        Some(r#"{"commit": "abc123"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body.status, DeploymentStatus::Queued);
    body.deployment_uuid
}

fn entry(order: u64, output: &str, hidden: bool) -> LogEntry {
    LogEntry {
        order,
        timestamp: Utc::now(),
        output: output.to_string(),
        stream: LogStream::Stdout,
        hidden,
        batch: 1,
    }
}

#[tokio::test]
async fn test_health() {
    let harness = Harness::new(vec![]);
    let (status, body): (_, HealthResponse) =
        call(&app_router(&harness), "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.status, "healthy");
    assert_eq!(body.service, "launchpad");
}

#[tokio::test]
async fn test_queue_and_read_deployment() {
    let harness = Harness::new(vec![application("a1")]);
    let router = app_router(&harness);
    let uuid = queue(&router).await;

    let (status, body): (_, DeploymentResponse) =
        call(&router, "GET", &format!("/deployments/{uuid}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.application_id, "a1");
    assert_eq!(body.commit, "abc123");
    assert_eq!(body.status, DeploymentStatus::Queued);
}

#[tokio::test]
async fn test_unknown_records_are_not_found() {
    let harness = Harness::new(vec![]);
    let router = app_router(&harness);

    let (status, body): (_, ErrorResponse) =
        call(&router, "POST", "/applications/nope/deployments", Some("{}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body.error.contains("nope"));

    let (status, _): (_, ErrorResponse) =
        call(&router, "GET", "/deployments/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cancel_is_idempotent() {
    let harness = Harness::new(vec![application("a1")]);
    let router = app_router(&harness);
    let uuid = queue(&router).await;
    let uri = format!("/deployments/{uuid}/cancel");

    let (status, body): (_, CancelResponse) = call(&router, "POST", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.cancelled);
    assert_eq!(body.status, DeploymentStatus::CancelledByUser);

    let (_, body): (_, CancelResponse) = call(&router, "POST", &uri, None).await;
    assert!(!body.cancelled);
    assert_eq!(body.status, DeploymentStatus::CancelledByUser);

    // A cancelled deployment is never claimed
    assert!(harness.queue.claim_next("a1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_logs_skip_hidden_lines() {
    let harness = Harness::new(vec![application("a1")]);
    let router = app_router(&harness);
    let uuid = queue(&router).await;
    harness
        .store
        .append_logs(
            &uuid,
            &[
                entry(1, "Starting deployment", false),
                entry(2, "[CMD]: docker ps", true),
                entry(3, "Building", false),
                entry(4, "debug only", true),
            ],
        )
        .await
        .unwrap();

    let (status, body): (_, LogsResponse) =
        call(&router, "GET", &format!("/deployments/{uuid}/logs"), None).await;
    assert_eq!(status, StatusCode::OK);
    let outputs: Vec<_> = body.entries.iter().map(|e| e.output.as_str()).collect();
    assert_eq!(outputs, vec!["Starting deployment", "Building"]);
    assert_eq!(body.next_after, 4);
    assert!(!body.complete);

    let (_, body): (_, LogsResponse) = call(
        &router,
        "GET",
        &format!("/deployments/{uuid}/logs?after=4"),
        None,
    )
    .await;
    assert!(body.entries.is_empty());
    assert_eq!(body.next_after, 4);

    harness
        .status
        .transition_to(&uuid, DeploymentStatus::Failed)
        .await
        .unwrap();
    let (_, body): (_, LogsResponse) =
        call(&router, "GET", &format!("/deployments/{uuid}/logs?after=4"), None).await;
    assert!(body.complete);
    assert_eq!(body.status, DeploymentStatus::Failed);
}

#[tokio::test]
async fn test_canary_actions_need_a_canary() {
    let harness = Harness::new(vec![application("a1")]);
    let router = app_router(&harness);
    let uuid = queue(&router).await;

    let (status, _): (_, ErrorResponse) = call(
        &router,
        "POST",
        &format!("/deployments/{uuid}/canary/promote"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _): (_, ErrorResponse) = call(
        &router,
        "POST",
        &format!("/deployments/{uuid}/canary/rollback"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
