//! Tests for health, metrics, and webhook endpoints

#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::*;
use crate::admission::{DefaultStrategy, PodDefaulter};
use serde_json::{json, Value};
use std::time::Duration;

/// Wait for server to be ready with retry logic
///
/// Retries connection up to max_retries times with exponential backoff.
/// More reliable than fixed sleep for test environments.
async fn wait_for_server(port: u16, max_retries: u32) -> reqwest::Client {
    let client = reqwest::Client::new();
    let mut delay = Duration::from_millis(10);

    for attempt in 1..=max_retries {
        match client
            .get(format!("http://127.0.0.1:{}/healthz", port))
            .timeout(Duration::from_millis(100))
            .send()
            .await
        {
            Ok(_) => return client,
            Err(_) if attempt < max_retries => {
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay * 2, Duration::from_millis(200));
            }
            Err(e) => panic!("Server not ready after {} attempts: {}", max_retries, e),
        }
    }
    client
}

fn test_state(readiness: ReadinessState) -> (ServerState, SharedMetrics) {
    let metrics = create_metrics().unwrap();
    let defaulter = PodDefaulter::new(std::sync::Arc::new(DefaultStrategy::new(
        "pool-a",
        vec!["kube-system".to_string()],
    )))
    .with_metrics(metrics.clone());
    (
        ServerState::new(readiness, metrics.clone(), defaulter),
        metrics,
    )
}

fn spawn_server(port: u16, state: ServerState) -> tokio::task::JoinHandle<()> {
    let (controller, signal) = shutdown_channel();
    tokio::spawn(async move {
        let _ = run_server(port, state, signal).await;
        // Held until here so the server only stops on abort
        drop(controller);
    })
}

/// Test that server starts and /healthz returns 200
#[tokio::test]
async fn test_healthz_returns_200() {
    // ARRANGE: Start server with a not-ready state
    let (state, _) = test_state(ReadinessState::new());
    let port = 18180;
    let server_handle = spawn_server(port, state);
    let client = wait_for_server(port, 10).await;

    // ACT
    let response = client
        .get(format!("http://127.0.0.1:{}/healthz", port))
        .timeout(Duration::from_secs(5))
        .send()
        .await
        .expect("Failed to connect to server");

    // ASSERT: Liveness does not depend on readiness
    assert_eq!(response.status(), 200, "Liveness probe should return 200");

    server_handle.abort();
}

/// Test that /readyz follows the readiness state
#[tokio::test]
async fn test_readyz_follows_readiness_state() {
    let readiness = ReadinessState::new();
    let (state, _) = test_state(readiness.clone());
    let port = 18181;
    let server_handle = spawn_server(port, state);
    let client = wait_for_server(port, 10).await;
    let url = format!("http://127.0.0.1:{}/readyz", port);

    let response = client.get(&url).send().await.unwrap();
    assert_eq!(
        response.status(),
        503,
        "Readiness probe should return 503 when not ready"
    );

    readiness.set_ready();
    let response = client.get(&url).send().await.unwrap();
    assert_eq!(response.status(), 200, "Readiness probe should return 200 when ready");

    readiness.set_not_ready();
    let response = client.get(&url).send().await.unwrap();
    assert_eq!(response.status(), 503);

    server_handle.abort();
}

/// Test that /metrics exposes the strategy counters
#[tokio::test]
async fn test_metrics_endpoint_exposes_counters() {
    let (state, metrics) = test_state(ReadinessState::new());
    metrics.record_fallback_shoot();
    let port = 18182;
    let server_handle = spawn_server(port, state);
    let client = wait_for_server(port, 10).await;

    let response = client
        .get(format!("http://127.0.0.1:{}/metrics", port))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body = response.text().await.unwrap();
    assert!(body.contains("kim_snatch_shoots_default 0"));
    assert!(body.contains("kim_snatch_shoots_fallback 1"));

    server_handle.abort();
}

/// Test that the webhook endpoint answers an AdmissionReview and counts it
#[tokio::test]
async fn test_mutate_endpoint_returns_patch() {
    let (state, metrics) = test_state(ReadinessState::new());
    let port = 18183;
    let server_handle = spawn_server(port, state);
    let client = wait_for_server(port, 10).await;

    let review = json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "request": {
            "uid": "b5a2e1f0-1111-2222-3333-444455556666",
            "kind": {"group": "", "version": "v1", "kind": "Pod"},
            "resource": {"group": "", "version": "v1", "resource": "pods"},
            "name": "web-0",
            "namespace": "default",
            "operation": "CREATE",
            "userInfo": {},
            "object": {
                "apiVersion": "v1",
                "kind": "Pod",
                "metadata": {"name": "web-0", "namespace": "default"},
                "spec": {"containers": [{"name": "app", "image": "nginx:1.27"}]}
            },
            "dryRun": false
        }
    });

    let response = client
        .post(format!("http://127.0.0.1:{}/mutate--v1-pod", port))
        .json(&review)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["kind"], "AdmissionReview");
    assert_eq!(body["response"]["uid"], "b5a2e1f0-1111-2222-3333-444455556666");
    assert_eq!(body["response"]["allowed"], true);
    assert_eq!(body["response"]["patchType"], "JSONPatch");
    assert!(body["response"]["patch"].is_string());
    assert_eq!(metrics.default_shoots(), 1);

    server_handle.abort();
}

/// Test that the server exits once shutdown is triggered
#[tokio::test]
async fn test_server_stops_on_shutdown() {
    let (state, _) = test_state(ReadinessState::new());
    let port = 18184;
    let (controller, signal) = shutdown_channel();
    let server_handle = tokio::spawn(async move { run_server(port, state, signal).await });
    wait_for_server(port, 10).await;

    controller.shutdown();

    let result = tokio::time::timeout(Duration::from_secs(5), server_handle)
        .await
        .expect("server should stop after shutdown");
    assert!(result.unwrap().is_ok());
}

/// Test ReadinessState basic functionality
#[test]
fn test_readiness_state_transitions() {
    let state = ReadinessState::new();

    // Initially not ready
    assert!(!state.is_ready());

    state.set_ready();
    assert!(state.is_ready());

    // Clone should share state
    let cloned = state.clone();
    assert!(cloned.is_ready());

    cloned.set_not_ready();
    assert!(!state.is_ready());
}
