//! Integration tests for the HTTP front end and its control path

use async_trait::async_trait;
use bytes::Bytes;
use edge_shield::{
    CacheStore, EdgeProxy, EdgeRequest, EdgeResponse, EdgeServer, GenerationManager,
    GenerationState, MemoryCacheStore, NetworkFetcher, Result, RetryQueue, ShieldConfig, TierNames,
};
use http::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct EchoFetcher {
    calls: AtomicUsize,
}

#[async_trait]
impl NetworkFetcher for EchoFetcher {
    async fn fetch(&self, request: &EdgeRequest) -> Result<EdgeResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(EdgeResponse::new(StatusCode::OK, format!("{} {}", request.method(), request.url())))
    }
}

struct Fixture {
    server: EdgeServer,
    store: Arc<MemoryCacheStore>,
    fetcher: Arc<EchoFetcher>,
    generation: Arc<GenerationManager>,
    queue: Arc<RetryQueue>,
}

fn fixture() -> Fixture {
    let mut config = ShieldConfig::default();
    config.policy.serving_origin = Some("https://www.site.test".to_string());
    fixture_with(config)
}

fn fixture_with(config: ShieldConfig) -> Fixture {
    let config = Arc::new(config);
    let store = Arc::new(MemoryCacheStore::new());
    let fetcher = Arc::new(EchoFetcher {
        calls: AtomicUsize::new(0),
    });
    let proxy = Arc::new(EdgeProxy::new(config.clone(), store.clone(), fetcher.clone()));
    let generation = Arc::new(GenerationManager::new(
        store.clone(),
        fetcher.clone(),
        TierNames::from_config(&config.cache),
        Vec::new(),
        None,
    ));
    let queue = Arc::new(RetryQueue::new(fetcher.clone()));
    let server = EdgeServer::new(proxy)
        .with_generation(generation.clone())
        .with_retry_queue(queue.clone());

    Fixture {
        server,
        store,
        fetcher,
        generation,
        queue,
    }
}

fn request(method: Method, uri: &str) -> http::request::Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("host", "www.site.test")
        .header("x-forwarded-proto", "https")
}

async fn body_json(response: http::Response<Full<Bytes>>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_navigation_to_image_is_blocked() {
    let fx = fixture();
    let req = request(Method::GET, "/images/a.jpg")
        .header("sec-fetch-mode", "navigate")
        .header("sec-fetch-dest", "document")
        .body(Full::new(Bytes::new()))
        .unwrap();

    let response = fx.server.handle(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(
        response.headers().get("x-protection-reason").unwrap(),
        "Direct navigation blocked"
    );
    assert_eq!(fx.fetcher.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_gallery_image_is_served() {
    let fx = fixture();
    let req = request(Method::GET, "/images/a.jpg")
        .header("sec-fetch-mode", "no-cors")
        .header("sec-fetch-dest", "image")
        .header("referer", "https://www.site.test/gallery")
        .body(Full::new(Bytes::new()))
        .unwrap();

    let response = fx.server.handle(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body, "GET https://www.site.test/images/a.jpg");
}

#[tokio::test]
async fn test_spoofed_localhost_host_gets_no_bypass() {
    let fx = fixture_with(ShieldConfig::default());
    let req = Request::builder()
        .method(Method::GET)
        .uri("/images/a.jpg")
        .header("host", "localhost")
        .header("user-agent", "curl/8.4.0")
        .header("sec-fetch-dest", "image")
        .body(Full::new(Bytes::new()))
        .unwrap();

    let response = fx.server.handle(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(fx.fetcher.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unknown_destination_is_treated_as_navigation() {
    let fx = fixture();
    let req = request(Method::GET, "/images/a.jpg")
        .header("sec-fetch-dest", "audio")
        .header("referer", "https://www.site.test/gallery")
        .body(Full::new(Bytes::new()))
        .unwrap();

    let response = fx.server.handle(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/html"));
    assert_eq!(fx.fetcher.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_skip_waiting_control_message() {
    let fx = fixture();
    fx.store.open("edge-shield-static-v0").await.unwrap();
    fx.generation.install().await.unwrap();
    assert_eq!(fx.generation.state(), GenerationState::Waiting);

    let req = request(Method::POST, "/__edge/control")
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from_static(br#"{"type":"SKIP_WAITING"}"#)))
        .unwrap();
    let response = fx.server.handle(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["activated"], true);
    assert_eq!(body["state"], "active");
    assert_eq!(body["deleted_tiers"], serde_json::json!(["edge-shield-static-v0"]));
    assert_eq!(fx.generation.state(), GenerationState::Active);
}

#[tokio::test]
async fn test_replay_queue_control_message() {
    let fx = fixture();
    let id = fx
        .queue
        .enqueue(EdgeRequest::new(Method::POST, "https://www.site.test/api/contact"))
        .unwrap();

    let req = request(Method::POST, "/__edge/control")
        .body(Full::new(Bytes::from_static(br#"{"type":"REPLAY_QUEUE"}"#)))
        .unwrap();
    let body = body_json(fx.server.handle(req).await.unwrap()).await;

    assert_eq!(body["delivered"], serde_json::json!([id]));
    assert!(fx.queue.is_empty());
}

#[tokio::test]
async fn test_enqueue_then_replay_over_control_path() {
    let fx = fixture();
    let enqueue = request(Method::POST, "/__edge/control")
        .body(Full::new(Bytes::from_static(
            br#"{"type":"ENQUEUE_REQUEST","method":"POST","url":"https://www.site.test/api/contact","headers":{"content-type":"text/plain"},"body":"name=ada"}"#,
        )))
        .unwrap();
    let response = fx.server.handle(enqueue).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = body_json(response).await;
    let id = body["queued"].clone();
    assert_eq!(body["pending"], 1);
    assert_eq!(fx.queue.len(), 1);
    assert_eq!(fx.fetcher.calls.load(Ordering::SeqCst), 0);

    let replay = request(Method::POST, "/__edge/control")
        .body(Full::new(Bytes::from_static(br#"{"type":"REPLAY_QUEUE"}"#)))
        .unwrap();
    let body = body_json(fx.server.handle(replay).await.unwrap()).await;
    assert_eq!(body["delivered"], serde_json::json!([id]));
    assert!(fx.queue.is_empty());
    assert_eq!(fx.fetcher.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_enqueue_rejects_reads_and_images() {
    let fx = fixture();
    for message in [
        r#"{"type":"ENQUEUE_REQUEST","method":"GET","url":"https://www.site.test/api/list"}"#,
        r#"{"type":"ENQUEUE_REQUEST","method":"POST","url":"https://www.site.test/upload","destination":"image"}"#,
    ] {
        let req = request(Method::POST, "/__edge/control")
            .body(Full::new(Bytes::from(message)))
            .unwrap();
        let response = fx.server.handle(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(response).await["error"].is_string());
    }
    assert!(fx.queue.is_empty());
}

#[tokio::test]
async fn test_control_path_rejects_bad_input() {
    let fx = fixture();

    let get = request(Method::GET, "/__edge/control")
        .body(Full::new(Bytes::new()))
        .unwrap();
    assert_eq!(
        fx.server.handle(get).await.unwrap().status(),
        StatusCode::METHOD_NOT_ALLOWED
    );

    let unknown = request(Method::POST, "/__edge/control")
        .body(Full::new(Bytes::from_static(br#"{"type":"CLAIM"}"#)))
        .unwrap();
    assert_eq!(
        fx.server.handle(unknown).await.unwrap().status(),
        StatusCode::BAD_REQUEST
    );
    assert_eq!(fx.fetcher.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_serves_over_tcp() {
    let fx = fixture();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(Arc::new(fx.server).serve(listener));

    let client = reqwest::Client::new();
    let response = tokio::time::timeout(
        Duration::from_secs(5),
        client
            .post(format!("http://{}/api/contact", addr))
            .body("name=ada")
            .send(),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(response.status(), 200);
    let body = response.text().await.unwrap();
    assert_eq!(body, format!("POST http://{}/api/contact", addr));

    handle.abort();
}
