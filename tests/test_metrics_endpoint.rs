//! Integration tests for the metrics endpoint

use edge_shield::{EdgeMetrics, MetricsEndpoint, PolicyMetrics, RequestClass};
use prometheus::Registry;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::timeout;

async fn start(endpoint: MetricsEndpoint) -> (String, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let _ = endpoint.serve(listener).await;
    });
    (format!("http://{}", addr), handle)
}

#[tokio::test]
async fn test_metrics_endpoint_serves_metrics() {
    let metrics = Arc::new(EdgeMetrics::new());
    metrics.record_request(RequestClass::ProtectedImage);
    metrics.record_request(RequestClass::Generic);
    metrics.record_cache_miss();
    metrics.record_network_fetch(true);
    metrics.record_navigation_block();

    let registry = Registry::new();
    let policy_metrics = PolicyMetrics::with_registry(&registry).unwrap();
    policy_metrics.record_decision("allow", "image_tag_referer");

    let endpoint = MetricsEndpoint::new(metrics, "127.0.0.1:0".parse().unwrap())
        .with_registry(registry);
    let (base, handle) = start(endpoint).await;

    let response = timeout(Duration::from_secs(5), reqwest::get(format!("{}/metrics", base)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/plain"));

    let body = response.text().await.unwrap();
    assert!(body.contains("edge_shield_requests_total 2"));
    assert!(body.contains("edge_shield_class_requests_total{class=\"protected_image\"} 1"));
    assert!(body.contains("edge_shield_direct_navigation_blocks_total 1"));
    assert!(body.contains("edge_shield_policy_decisions_total"));
    assert!(body.contains("image_tag_referer"));

    handle.abort();
}

#[tokio::test]
async fn test_health_and_unknown_paths() {
    let endpoint = MetricsEndpoint::new(
        Arc::new(EdgeMetrics::new()),
        "127.0.0.1:0".parse().unwrap(),
    )
    .with_registry(Registry::new());
    let (base, handle) = start(endpoint).await;

    let health = reqwest::get(format!("{}/health", base)).await.unwrap();
    assert_eq!(health.status(), 200);
    assert_eq!(health.text().await.unwrap(), r#"{"status":"healthy"}"#);

    let missing = reqwest::get(format!("{}/missing", base)).await.unwrap();
    assert_eq!(missing.status(), 404);

    handle.abort();
}
