//! Network fetcher for origin requests

use crate::error::{NetworkFailure, Result, ShieldError};
use crate::models::{EdgeRequest, EdgeResponse, ResponseType};
use async_trait::async_trait;
use http::header::{CONNECTION, HOST, TRANSFER_ENCODING};
use http::{HeaderMap, Uri};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Fetches a request from the network.
///
/// Fails only on transport-level problems (DNS, refused connection, timeout).
/// Any HTTP status, including 4xx and 5xx, is an ordinary response.
#[async_trait]
pub trait NetworkFetcher: Send + Sync {
    async fn fetch(&self, request: &EdgeRequest) -> Result<EdgeResponse>;
}

/// Fetcher backed by a pooled reqwest client
pub struct ReqwestFetcher {
    http_client: Client,
    /// Scheme and authority every request is forwarded to, if set
    upstream: Option<Uri>,
}

impl ReqwestFetcher {
    /// Create a fetcher that requests each URL as-is
    pub fn new() -> Result<Self> {
        Self::with_timeout(Duration::from_secs(30))
    }

    /// Create a fetcher with a custom timeout
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ShieldError::InternalError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(ReqwestFetcher {
            http_client,
            upstream: None,
        })
    }

    /// Forward every request to this origin, keeping path and query
    pub fn with_upstream(mut self, upstream: &str) -> Result<Self> {
        let uri: Uri = upstream.parse().map_err(|e| {
            ShieldError::ConfigError(format!("upstream origin '{}' is invalid: {}", upstream, e))
        })?;
        if uri.scheme().is_none() || uri.authority().is_none() {
            return Err(ShieldError::ConfigError(format!(
                "upstream origin '{}' must include a scheme and host",
                upstream
            )));
        }
        self.upstream = Some(uri);
        Ok(self)
    }

    /// URL actually requested from the network
    fn target_url(&self, request: &EdgeRequest) -> Result<String> {
        let uri = request.uri().ok_or_else(|| {
            ShieldError::network(
                NetworkFailure::Request,
                format!("cannot fetch malformed URL '{}'", request.url()),
            )
        })?;

        match &self.upstream {
            Some(upstream) => {
                let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
                Ok(format!(
                    "{}://{}{}",
                    upstream.scheme_str().unwrap_or("http"),
                    upstream.authority().map(|a| a.as_str()).unwrap_or_default(),
                    path_and_query
                ))
            }
            None => Ok(uri.to_string()),
        }
    }
}

/// Hop-by-hop headers are not forwarded
fn forwardable_headers(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = headers.clone();
    forwarded.remove(HOST);
    forwarded.remove(CONNECTION);
    forwarded.remove(TRANSFER_ENCODING);
    forwarded
}

#[async_trait]
impl NetworkFetcher for ReqwestFetcher {
    async fn fetch(&self, request: &EdgeRequest) -> Result<EdgeResponse> {
        let url = self.target_url(request)?;
        debug!("Fetching {} {} from network", request.method(), url);

        let response = self
            .http_client
            .request(request.method().clone(), &url)
            .headers(forwardable_headers(request.headers()))
            .body(request.body().clone())
            .send()
            .await?;

        let status = response.status();
        let mut headers = response.headers().clone();
        headers.remove(TRANSFER_ENCODING);
        headers.remove(CONNECTION);
        let body = response.bytes().await?;

        debug!("Fetched {} -> {} ({} bytes)", url, status, body.len());

        Ok(EdgeResponse {
            status,
            headers,
            body,
            response_type: ResponseType::Basic,
        })
    }
}
