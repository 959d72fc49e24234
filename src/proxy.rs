//! Main EdgeProxy structure
//!
//! [`EdgeProxy`] classifies each request and runs the handling strategy of its
//! class:
//!
//! | Class            | Strategy                                         |
//! |------------------|--------------------------------------------------|
//! | `StaticAsset`    | cache first, fetch and persist on miss            |
//! | `ProtectedImage` | cache first, access policy gates the fetch        |
//! | `Dynamic`        | network only, 503 JSON on failure                 |
//! | `Generic`        | network first, catch-all tier on failure          |
//!
//! Every strategy ends in a response. Network failures and cache lookup
//! failures are converted here and never reach the caller. Fetched responses
//! are persisted through the [`CacheWriter`] without waiting for the write.

use crate::cache::CacheStore;
use crate::cache_writer::CacheWriter;
use crate::classifier::RequestClassifier;
use crate::config::ShieldConfig;
use crate::error::Result;
use crate::fetcher::NetworkFetcher;
use crate::generation::TierNames;
use crate::metrics::EdgeMetrics;
use crate::models::{EdgeRequest, EdgeResponse, RequestClass, ResponseType};
use crate::policy::{is_direct_navigation, AccessPolicy};
use crate::policy_metrics::PolicyMetrics;
use crate::responses;
use crate::token::{now_millis, TokenValidator};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Edge interception pipeline
pub struct EdgeProxy {
    config: Arc<ShieldConfig>,
    metrics: Arc<EdgeMetrics>,
    classifier: RequestClassifier,
    policy: AccessPolicy,
    policy_metrics: Option<Arc<PolicyMetrics>>,
    store: Arc<dyn CacheStore>,
    fetcher: Arc<dyn NetworkFetcher>,
    writer: CacheWriter,
    tiers: TierNames,
}

impl EdgeProxy {
    /// Build the pipeline. Spawns the cache writer, so a tokio runtime must
    /// be running.
    pub fn new(
        config: Arc<ShieldConfig>,
        store: Arc<dyn CacheStore>,
        fetcher: Arc<dyn NetworkFetcher>,
    ) -> Self {
        let metrics = Arc::new(EdgeMetrics::new());
        let classifier = RequestClassifier::new(Arc::new(config.classifier.clone()));
        let policy = AccessPolicy::new(
            Arc::new(config.policy.clone()),
            TokenValidator::new(&config.token),
        );
        let writer = CacheWriter::spawn(store.clone(), metrics.clone());
        let tiers = TierNames::from_config(&config.cache);

        info!(
            "Edge proxy ready: static={}, images={}, dynamic={}",
            tiers.static_tier, tiers.image_tier, tiers.dynamic_tier
        );

        EdgeProxy {
            config,
            metrics,
            classifier,
            policy,
            policy_metrics: None,
            store,
            fetcher,
            writer,
            tiers,
        }
    }

    /// Report policy decisions to Prometheus
    pub fn with_policy_metrics(mut self, policy_metrics: Arc<PolicyMetrics>) -> Self {
        self.policy = self.policy.with_metrics(policy_metrics.clone());
        self.policy_metrics = Some(policy_metrics);
        self
    }

    pub fn config(&self) -> &ShieldConfig {
        &self.config
    }

    pub fn metrics(&self) -> &EdgeMetrics {
        &self.metrics
    }

    pub fn metrics_arc(&self) -> Arc<EdgeMetrics> {
        self.metrics.clone()
    }

    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    pub fn tiers(&self) -> &TierNames {
        &self.tiers
    }

    pub fn writer(&self) -> &CacheWriter {
        &self.writer
    }

    /// Handle one request. Never fails.
    pub async fn handle(&self, request: &EdgeRequest) -> EdgeResponse {
        let start = Instant::now();
        let class = self.classifier.classify(request);
        self.metrics.record_request(class);

        let response = match class {
            RequestClass::StaticAsset => self.handle_static(request).await,
            RequestClass::ProtectedImage => self.handle_protected_image(request).await,
            RequestClass::Dynamic => self.handle_dynamic(request).await,
            RequestClass::Generic => self.handle_generic(request).await,
        };

        self.metrics.record_request_duration(start.elapsed());
        debug!(
            "{} {} [{}] -> {}",
            request.method(),
            request.url(),
            class.as_str(),
            response.status
        );
        response
    }

    /// Cache first; on a miss fetch and persist.
    async fn handle_static(&self, request: &EdgeRequest) -> EdgeResponse {
        if let Some(cached) = self.lookup(&self.tiers.static_tier, request).await {
            return cached;
        }

        match self.fetch(request).await {
            Ok(response) => {
                if response.is_success() {
                    self.writer
                        .persist(&self.tiers.static_tier, request.clone(), response.clone());
                }
                response
            }
            Err(e) => {
                warn!("Static asset {} unavailable: {}", request.url(), e);
                self.metrics.record_fallback_response();
                responses::offline_text()
            }
        }
    }

    /// Cache first; on a miss the direct-navigation check and the access
    /// policy decide whether the origin is asked at all.
    async fn handle_protected_image(&self, request: &EdgeRequest) -> EdgeResponse {
        if let Some(cached) = self.lookup(&self.tiers.image_tier, request).await {
            return cached;
        }

        if is_direct_navigation(request, self.policy.config()) {
            info!(
                target: "edge_shield::policy",
                url = request.url(),
                mode = request.mode().as_str(),
                "Direct navigation to protected image blocked"
            );
            self.metrics.record_navigation_block();
            if let Some(policy_metrics) = &self.policy_metrics {
                policy_metrics.record_navigation_block(request.mode().as_str());
            }
            return responses::direct_navigation_blocked();
        }

        let decision = self.policy.decide(request, now_millis());
        if !decision.is_allowed() {
            self.metrics.record_policy_denial();
            return responses::policy_denied();
        }

        match self.fetch(request).await {
            Ok(response) => {
                if response.is_success() {
                    self.writer
                        .persist(&self.tiers.image_tier, request.clone(), response.clone());
                }
                response
            }
            Err(e) => {
                warn!("Protected image {} unavailable: {}", request.url(), e);
                self.metrics.record_fallback_response();
                match self.placeholder(request).await {
                    Some(placeholder) => placeholder,
                    None => responses::image_not_found(),
                }
            }
        }
    }

    /// Network only; never touches a tier.
    async fn handle_dynamic(&self, request: &EdgeRequest) -> EdgeResponse {
        match self.fetch(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Dynamic request {} failed: {}", request.url(), e);
                self.metrics.record_fallback_response();
                responses::network_unavailable_json()
            }
        }
    }

    /// Network first; same-origin successes refresh the catch-all tier, which
    /// answers when the network is down.
    async fn handle_generic(&self, request: &EdgeRequest) -> EdgeResponse {
        match self.fetch(request).await {
            Ok(response) => {
                if response.is_success() && response.response_type == ResponseType::Basic {
                    self.writer
                        .persist(&self.tiers.dynamic_tier, request.clone(), response.clone());
                }
                response
            }
            Err(e) => {
                warn!("Generic request {} failed: {}", request.url(), e);
                self.metrics.record_fallback_response();
                match self.lookup(&self.tiers.dynamic_tier, request).await {
                    Some(cached) => cached,
                    None => responses::offline_text(),
                }
            }
        }
    }

    /// Placeholder image stored in the image tier under the request's origin
    async fn placeholder(&self, request: &EdgeRequest) -> Option<EdgeResponse> {
        let path = self.config.cache.placeholder_image.as_ref()?;
        let origin = request.origin()?;
        let placeholder_request = EdgeRequest::get(format!("{}{}", origin, path));
        self.lookup(&self.tiers.image_tier, &placeholder_request).await
    }

    /// Tier lookup where a store failure reads as a miss
    async fn lookup(&self, tier: &str, request: &EdgeRequest) -> Option<EdgeResponse> {
        match self.try_lookup(tier, request).await {
            Ok(Some(response)) => {
                self.metrics.record_cache_hit();
                Some(response)
            }
            Ok(None) => {
                self.metrics.record_cache_miss();
                None
            }
            Err(e) => {
                warn!("Cache lookup in {} failed for {}: {}", tier, request.url(), e);
                self.metrics.record_cache_error();
                self.metrics.record_cache_miss();
                None
            }
        }
    }

    async fn try_lookup(&self, tier: &str, request: &EdgeRequest) -> Result<Option<EdgeResponse>> {
        let handle = self.store.open(tier).await?;
        handle.lookup(request).await
    }

    async fn fetch(&self, request: &EdgeRequest) -> Result<EdgeResponse> {
        let result = self.fetcher.fetch(request).await;
        self.metrics.record_network_fetch(result.is_ok());
        result
    }
}
