//! Deferred retry queue replaying against a live origin

use edge_shield::{EdgeRequest, ReqwestFetcher, RetryQueue};
use http::Method;
use std::sync::Arc;
use wiremock::matchers::{body_string, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_replay_retries_until_origin_accepts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/contact"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/contact"))
        .and(body_string(r#"{"name":"ada"}"#))
        .respond_with(ResponseTemplate::new(201))
        .mount(&server)
        .await;

    let queue = RetryQueue::new(Arc::new(ReqwestFetcher::new().unwrap()));
    let id = queue
        .enqueue(
            EdgeRequest::new(Method::POST, format!("{}/api/contact", server.uri()))
                .with_header("content-type", "application/json")
                .with_body(r#"{"name":"ada"}"#.into()),
        )
        .unwrap();

    let first = queue.replay().await;
    assert_eq!(first.retained, vec![id]);
    assert_eq!(queue.len(), 1);

    let second = queue.replay().await;
    assert_eq!(second.delivered, vec![id]);
    assert!(queue.is_empty());
}

#[tokio::test]
async fn test_unreachable_origin_keeps_requests() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let queue = RetryQueue::new(Arc::new(ReqwestFetcher::new().unwrap()));
    queue
        .enqueue(EdgeRequest::new(Method::PUT, format!("http://{}/api/profile", addr)))
        .unwrap();
    queue
        .enqueue(EdgeRequest::new(Method::DELETE, format!("http://{}/api/session", addr)))
        .unwrap();

    let report = queue.replay().await;
    assert!(report.delivered.is_empty());
    assert_eq!(report.retained.len(), 2);
    assert_eq!(queue.pending()[0].request.method(), Method::PUT);
}
