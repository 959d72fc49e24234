//! Edge Shield
//!
//! An interception layer that sits between a photography website's clients and
//! its origin. Every request is classified and handled by a per-class caching
//! strategy; requests for protected images additionally pass an access policy
//! meant to stop hotlinking, scraping and direct opening of image URLs.
//!
//! # Not a security boundary
//!
//! The access policy trusts request headers (`Referer`, `User-Agent`, fetch
//! metadata, marker headers and a timestamp token) that any client can forge.
//! It is a deterrent against casual copying, not authentication. Anything that
//! must stay private needs real access control at the origin.
//!
//! # Architecture
//!
//! - [`RequestClassifier`]: assigns each request a [`RequestClass`]
//! - [`AccessPolicy`]: allow/deny for protected images, backed by the [`TokenValidator`]
//! - [`EdgeProxy`]: runs the cache strategy of each class
//! - [`CacheStore`]: named cache tiers, in memory ([`MemoryCacheStore`]) or on disk ([`DiskCacheStore`])
//! - [`CacheWriter`]: detached, best-effort cache writes
//! - [`GenerationManager`]: versioned tier names, precaching and stale tier cleanup
//! - [`RetryQueue`]: deferred replay of failed mutating requests
//! - [`EdgeServer`]: HTTP/1 front end and control path
//! - [`EdgeMetrics`] / [`PolicyMetrics`]: counters, exported by the [`MetricsEndpoint`]
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use edge_shield::{EdgeProxy, EdgeRequest, MemoryCacheStore, ReqwestFetcher, ShieldConfig};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Arc::new(ShieldConfig::from_file("edge_shield.yaml")?);
//! let proxy = EdgeProxy::new(
//!     config,
//!     Arc::new(MemoryCacheStore::new()),
//!     Arc::new(ReqwestFetcher::new()?),
//! );
//!
//! let response = proxy.handle(&EdgeRequest::get("https://example.com/index.html")).await;
//! println!("{}", response.status);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded from a YAML file; every field has a default:
//!
//! ```yaml
//! listen_address: "0.0.0.0:8080"
//! upstream_origin: "http://127.0.0.1:3000"
//! classifier:
//!   static_manifest: ["/", "/index.html", "/css/style.css"]
//!   protected_image_prefix: "/images/"
//!   api_prefix: "/api/"
//! policy:
//!   serving_origin: "https://www.example.com"
//!   allowed_origins: ["https://example.com"]
//! token:
//!   max_age_ms: 300000
//! cache:
//!   tier_prefix: "edge-shield"
//!   generation: "v1"
//!   backend: "memory"
//! ```
//!
//! See [`ShieldConfig`] for every option.

pub mod cache;
pub mod cache_writer;
pub mod classifier;
pub mod config;
pub mod disk_cache;
pub mod error;
pub mod fetcher;
pub mod generation;
pub mod metrics;
pub mod metrics_endpoint;
pub mod models;
pub mod policy;
pub mod policy_metrics;
pub mod proxy;
pub mod responses;
pub mod retry_queue;
pub mod server;
pub mod token;

// Re-export commonly used types
pub use cache::{CacheStore, MemoryCacheStore, TierHandle, TierStats};
pub use cache_writer::CacheWriter;
pub use classifier::RequestClassifier;
pub use config::{ConfigChanges, ShieldConfig};
pub use disk_cache::DiskCacheStore;
pub use error::{NetworkFailure, Result, ShieldError};
pub use fetcher::{NetworkFetcher, ReqwestFetcher};
pub use generation::{GenerationManager, GenerationState, TierNames};
pub use metrics::{EdgeMetrics, MetricsSnapshot};
pub use metrics_endpoint::MetricsEndpoint;
pub use models::{EdgeRequest, EdgeResponse, RequestClass, RequestMode, ResourceKind, ResponseType};
pub use policy::{AccessPolicy, Decision, DecisionReason, PolicyDecision};
pub use policy_metrics::PolicyMetrics;
pub use proxy::EdgeProxy;
pub use retry_queue::{ReplayReport, RetryQueue};
pub use server::{ControlMessage, EdgeServer, QueuedRequestSpec};
pub use token::{SessionToken, TokenValidator};
