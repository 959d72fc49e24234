//! HTTP front end
//!
//! Accepts HTTP/1 connections, turns each inbound request into an
//! [`EdgeRequest`], runs it through the [`EdgeProxy`] and writes the response
//! back. Requests to the control path carry lifecycle messages instead.

use crate::error::{Result, ShieldError};
use crate::generation::GenerationManager;
use crate::models::{EdgeRequest, EdgeResponse, RequestMode, ResourceKind};
use crate::proxy::EdgeProxy;
use crate::retry_queue::RetryQueue;
use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE, HOST};
use http::request::Parts;
use http::{Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

const SEC_FETCH_DEST: &str = "sec-fetch-dest";
const SEC_FETCH_MODE: &str = "sec-fetch-mode";
const FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Message posted by the application to the control path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    /// Activate a waiting cache generation now
    SkipWaiting,
    /// Connectivity is back; replay the deferred retry queue
    ReplayQueue,
    /// Park a mutating request that failed while offline
    EnqueueRequest(QueuedRequestSpec),
}

/// A request as the application describes it in an `ENQUEUE_REQUEST` message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedRequestSpec {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: String,
    /// `Sec-Fetch-Dest` of the original request, if known
    #[serde(default)]
    pub destination: Option<String>,
}

impl QueuedRequestSpec {
    fn to_edge_request(&self) -> Result<EdgeRequest> {
        let method = Method::from_bytes(self.method.to_ascii_uppercase().as_bytes()).map_err(|_| {
            ShieldError::RejectedRequest(format!("invalid method '{}'", self.method))
        })?;

        let mut request = EdgeRequest::new(method, self.url.clone())
            .with_body(Bytes::from(self.body.clone()));
        if let Some(destination) = &self.destination {
            request = request.with_destination(ResourceKind::parse(destination));
        }
        for (name, value) in &self.headers {
            request = request.with_header(name, value);
        }
        Ok(request)
    }
}

/// Front end serving the edge proxy
pub struct EdgeServer {
    proxy: Arc<EdgeProxy>,
    generation: Option<Arc<GenerationManager>>,
    retry_queue: Option<Arc<RetryQueue>>,
    control_path: String,
}

impl EdgeServer {
    pub fn new(proxy: Arc<EdgeProxy>) -> Self {
        let control_path = proxy.config().control_path.clone();
        EdgeServer {
            proxy,
            generation: None,
            retry_queue: None,
            control_path,
        }
    }

    pub fn with_generation(mut self, generation: Arc<GenerationManager>) -> Self {
        self.generation = Some(generation);
        self
    }

    pub fn with_retry_queue(mut self, retry_queue: Arc<RetryQueue>) -> Self {
        self.retry_queue = Some(retry_queue);
        self
    }

    /// Bind the address and serve until the process exits
    pub async fn run(self, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        Arc::new(self).serve(listener).await
    }

    /// Serve on an already bound listener
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        info!("Edge shield listening on http://{}", listener.local_addr()?);

        loop {
            let (stream, peer) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let server = Arc::clone(&self);

            tokio::task::spawn(async move {
                let service = service_fn(move |req| {
                    let server = Arc::clone(&server);
                    async move { server.handle(req).await }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    debug!("Connection from {} closed with error: {:?}", peer, err);
                }
            });
        }
    }

    /// Handle one inbound HTTP request
    pub async fn handle<B>(&self, req: Request<B>) -> std::result::Result<Response<Full<Bytes>>, Infallible>
    where
        B: Body,
        B::Error: std::fmt::Display,
    {
        let (parts, body) = req.into_parts();
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                warn!("Failed to read request body: {}", e);
                return Ok(plain(StatusCode::BAD_REQUEST, "Unreadable request body"));
            }
        };

        if parts.uri.path() == self.control_path {
            return Ok(self.handle_control(&parts.method, &body).await);
        }

        let request = to_edge_request(&parts, body);
        let response = self.proxy.handle(&request).await;
        Ok(to_http_response(response))
    }

    async fn handle_control(&self, method: &Method, body: &Bytes) -> Response<Full<Bytes>> {
        if method != Method::POST {
            return plain(StatusCode::METHOD_NOT_ALLOWED, "Control messages must be POSTed");
        }

        let message: ControlMessage = match serde_json::from_slice(body) {
            Ok(message) => message,
            Err(e) => {
                warn!("Rejected control message: {}", e);
                return plain(StatusCode::BAD_REQUEST, "Unknown control message");
            }
        };
        info!("Control message received: {:?}", message);

        match message {
            ControlMessage::SkipWaiting => {
                let Some(generation) = &self.generation else {
                    return plain(StatusCode::NOT_IMPLEMENTED, "No generation manager");
                };
                match generation.skip_waiting().await {
                    Ok(deleted) => json(
                        StatusCode::OK,
                        serde_json::json!({
                            "state": generation.state().as_str(),
                            "activated": deleted.is_some(),
                            "deleted_tiers": deleted.unwrap_or_default(),
                        }),
                    ),
                    Err(e) => {
                        error!("Activation failed: {}", e);
                        plain(StatusCode::INTERNAL_SERVER_ERROR, "Activation failed")
                    }
                }
            }
            ControlMessage::ReplayQueue => {
                let Some(queue) = &self.retry_queue else {
                    return plain(StatusCode::NOT_IMPLEMENTED, "No retry queue");
                };
                let report = queue.replay().await;
                json(
                    StatusCode::OK,
                    serde_json::json!({
                        "delivered": report.delivered,
                        "retained": report.retained,
                    }),
                )
            }
            ControlMessage::EnqueueRequest(spec) => {
                let Some(queue) = &self.retry_queue else {
                    return plain(StatusCode::NOT_IMPLEMENTED, "No retry queue");
                };
                match spec.to_edge_request().and_then(|request| queue.enqueue(request)) {
                    Ok(id) => json(
                        StatusCode::ACCEPTED,
                        serde_json::json!({
                            "queued": id,
                            "pending": queue.len(),
                        }),
                    ),
                    Err(e) => {
                        warn!("Refused to queue request: {}", e);
                        let status = StatusCode::from_u16(e.to_http_status())
                            .unwrap_or(StatusCode::BAD_REQUEST);
                        json(status, serde_json::json!({ "error": e.to_string() }))
                    }
                }
            }
        }
    }
}

/// Build the edge request model from an inbound HTTP request.
///
/// The URL is rebuilt from `X-Forwarded-Proto` (default `http`) and the
/// `Host` header; the resource kind and navigation mode come from
/// `Sec-Fetch-Dest` and `Sec-Fetch-Mode`.
pub fn to_edge_request(parts: &Parts, body: Bytes) -> EdgeRequest {
    let header = |name: &str| parts.headers.get(name).and_then(|v| v.to_str().ok());

    let scheme = header(FORWARDED_PROTO)
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_ascii_lowercase())
        .or_else(|| parts.uri.scheme_str().map(str::to_string))
        .unwrap_or_else(|| "http".to_string());
    let host = header(HOST.as_str())
        .map(str::to_string)
        .or_else(|| parts.uri.authority().map(|a| a.to_string()));
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    let url = match host {
        Some(host) => format!("{}://{}{}", scheme, host, path_and_query),
        None => path_and_query.to_string(),
    };

    let destination = header(SEC_FETCH_DEST)
        .map(ResourceKind::parse)
        .unwrap_or(ResourceKind::Empty);
    let mode = header(SEC_FETCH_MODE)
        .map(RequestMode::parse)
        .unwrap_or(RequestMode::NoCors);

    EdgeRequest::new(parts.method.clone(), url)
        .with_destination(destination)
        .with_mode(mode)
        .with_headers(parts.headers.clone())
        .with_body(body)
}

pub fn to_http_response(response: EdgeResponse) -> Response<Full<Bytes>> {
    let mut http_response = Response::new(Full::new(response.body));
    *http_response.status_mut() = response.status;
    *http_response.headers_mut() = response.headers;
    http_response
}

fn plain(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

fn json(status: StatusCode, value: serde_json::Value) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(value.to_string())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}
