//! Metrics HTTP Endpoint
//!
//! Serves the edge counters and the Prometheus policy metrics in text
//! exposition format on a separate port.

use crate::metrics::{EdgeMetrics, MetricsSnapshot};
use http::header::{HeaderValue, CONTENT_TYPE};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{Encoder, Registry, TextEncoder};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Metrics endpoint server
pub struct MetricsEndpoint {
    metrics: Arc<EdgeMetrics>,
    addr: SocketAddr,
    /// Registry to export; the process-wide default registry when unset
    registry: Option<Registry>,
}

impl MetricsEndpoint {
    /// Create a new metrics endpoint
    ///
    /// # Example
    /// ```no_run
    /// use edge_shield::metrics::EdgeMetrics;
    /// use edge_shield::metrics_endpoint::MetricsEndpoint;
    /// use std::sync::Arc;
    ///
    /// let metrics = Arc::new(EdgeMetrics::new());
    /// let endpoint = MetricsEndpoint::new(metrics, "127.0.0.1:9090".parse().unwrap());
    /// ```
    pub fn new(metrics: Arc<EdgeMetrics>, addr: SocketAddr) -> Self {
        Self {
            metrics,
            addr,
            registry: None,
        }
    }

    /// Export this registry instead of the default one
    pub fn with_registry(mut self, registry: Registry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Bind the configured address and serve until the process exits
    pub async fn start(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(self.addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener
    pub async fn serve(
        self,
        listener: TcpListener,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let local_addr = listener.local_addr()?;
        info!("Metrics endpoint listening on http://{}", local_addr);
        info!("Metrics available at http://{}/metrics", local_addr);

        let state = Arc::new(self);
        loop {
            let (stream, _) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let state = Arc::clone(&state);

            tokio::task::spawn(async move {
                let service = service_fn(move |req| {
                    let state = Arc::clone(&state);
                    async move { state.handle_request(req) }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Error serving connection: {:?}", err);
                }
            });
        }
    }

    fn handle_request<B>(&self, req: Request<B>) -> Result<Response<Full<Bytes>>, Infallible> {
        let response = match req.uri().path() {
            "/metrics" => self.metrics_response(),
            "/health" => health_response(),
            "/" => index_response(),
            _ => not_found_response(),
        };
        Ok(response)
    }

    fn metrics_response(&self) -> Response<Full<Bytes>> {
        let mut body = format_edge_metrics(&self.metrics.get_stats());

        let families = match &self.registry {
            Some(registry) => registry.gather(),
            None => prometheus::gather(),
        };
        let mut buffer = Vec::new();
        match TextEncoder::new().encode(&families, &mut buffer) {
            Ok(()) => body.push_str(&String::from_utf8_lossy(&buffer)),
            Err(e) => warn!("Failed to encode Prometheus metrics: {}", e),
        }

        text_response(StatusCode::OK, PROMETHEUS_CONTENT_TYPE, body)
    }
}

fn text_response(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn push_metric(output: &mut String, name: &str, kind: &str, help: &str, value: String) {
    output.push_str(&format!("# HELP {} {}\n", name, help));
    output.push_str(&format!("# TYPE {} {}\n", name, kind));
    output.push_str(&format!("{} {}\n\n", name, value));
}

/// Format the edge counters in Prometheus exposition format
fn format_edge_metrics(snapshot: &MetricsSnapshot) -> String {
    let mut output = String::new();

    // Request metrics
    push_metric(
        &mut output,
        "edge_shield_requests_total",
        "counter",
        "Total number of requests handled",
        snapshot.total_requests.to_string(),
    );
    output.push_str("# HELP edge_shield_class_requests_total Requests handled per class\n");
    output.push_str("# TYPE edge_shield_class_requests_total counter\n");
    for (class, value) in [
        ("static_asset", snapshot.static_requests),
        ("protected_image", snapshot.image_requests),
        ("dynamic", snapshot.dynamic_requests),
        ("generic", snapshot.generic_requests),
    ] {
        output.push_str(&format!(
            "edge_shield_class_requests_total{{class=\"{}\"}} {}\n",
            class, value
        ));
    }
    output.push('\n');

    // Cache metrics
    push_metric(
        &mut output,
        "edge_shield_cache_hits_total",
        "counter",
        "Number of cache hits",
        snapshot.cache_hits.to_string(),
    );
    push_metric(
        &mut output,
        "edge_shield_cache_misses_total",
        "counter",
        "Number of cache misses",
        snapshot.cache_misses.to_string(),
    );
    push_metric(
        &mut output,
        "edge_shield_cache_errors_total",
        "counter",
        "Number of failed cache lookups",
        snapshot.cache_errors.to_string(),
    );
    push_metric(
        &mut output,
        "edge_shield_cache_hit_rate",
        "gauge",
        "Cache hit rate percentage",
        format!("{:.2}", snapshot.cache_hit_rate()),
    );
    push_metric(
        &mut output,
        "edge_shield_cache_writes_total",
        "counter",
        "Detached cache writes applied",
        snapshot.cache_writes.to_string(),
    );
    push_metric(
        &mut output,
        "edge_shield_cache_write_failures_total",
        "counter",
        "Detached cache writes that failed",
        snapshot.cache_write_failures.to_string(),
    );

    // Network metrics
    push_metric(
        &mut output,
        "edge_shield_network_fetches_total",
        "counter",
        "Requests sent to the network",
        snapshot.network_fetches.to_string(),
    );
    push_metric(
        &mut output,
        "edge_shield_network_failures_total",
        "counter",
        "Network fetches that failed at the transport level",
        snapshot.network_failures.to_string(),
    );
    push_metric(
        &mut output,
        "edge_shield_network_failure_rate",
        "gauge",
        "Network failure rate percentage",
        format!("{:.2}", snapshot.network_failure_rate()),
    );
    push_metric(
        &mut output,
        "edge_shield_fallback_responses_total",
        "counter",
        "Responses served after a network failure",
        snapshot.fallback_responses.to_string(),
    );

    // Refusals
    push_metric(
        &mut output,
        "edge_shield_direct_navigation_blocks_total",
        "counter",
        "Protected image requests refused as direct navigation",
        snapshot.navigation_blocks.to_string(),
    );
    push_metric(
        &mut output,
        "edge_shield_policy_denials_total",
        "counter",
        "Protected image requests refused by the access policy",
        snapshot.policy_denials.to_string(),
    );

    // Latency metrics (in milliseconds)
    push_metric(
        &mut output,
        "edge_shield_request_duration_ms_avg",
        "gauge",
        "Average request duration in milliseconds",
        format!("{:.2}", snapshot.avg_request_duration_ms()),
    );

    output
}

fn health_response() -> Response<Full<Bytes>> {
    text_response(StatusCode::OK, "application/json", r#"{"status":"healthy"}"#)
}

fn index_response() -> Response<Full<Bytes>> {
    let body = r#"<!DOCTYPE html>
<html>
<head>
    <title>Edge Shield Metrics</title>
    <style>
        body { font-family: Arial, sans-serif; margin: 40px; }
        h1 { color: #333; }
        a { color: #0066cc; text-decoration: none; }
        .endpoint { margin: 10px 0; padding: 10px; background: #f5f5f5; border-radius: 4px; }
    </style>
</head>
<body>
    <h1>Edge Shield Metrics Endpoint</h1>
    <p>Available endpoints:</p>
    <div class="endpoint">
        <strong><a href="/metrics">/metrics</a></strong> - Prometheus format metrics
    </div>
    <div class="endpoint">
        <strong><a href="/health">/health</a></strong> - Health check endpoint
    </div>
</body>
</html>"#;

    text_response(StatusCode::OK, "text/html; charset=utf-8", body)
}

fn not_found_response() -> Response<Full<Bytes>> {
    text_response(StatusCode::NOT_FOUND, "text/plain", "404 Not Found")
}
