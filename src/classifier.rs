//! Request classification into handling classes

use crate::config::ClassifierConfig;
use crate::models::{EdgeRequest, RequestClass};
use http::Method;
use std::sync::Arc;
use tracing::debug;

/// Assigns every request to exactly one [`RequestClass`]
pub struct RequestClassifier {
    config: Arc<ClassifierConfig>,
}

impl RequestClassifier {
    /// Create a new RequestClassifier with the given configuration
    pub fn new(config: Arc<ClassifierConfig>) -> Self {
        RequestClassifier { config }
    }

    /// Classify a request
    ///
    /// # Logic
    /// First match wins:
    /// 1. `StaticAsset` if the URL matches a manifest entry
    /// 2. `ProtectedImage` if the destination is an image or the path has the protected prefix
    /// 3. `Dynamic` if the path has the API prefix or the method is not GET
    /// 4. `Generic` otherwise
    ///
    /// A URL that cannot be parsed is `Generic`.
    pub fn classify(&self, request: &EdgeRequest) -> RequestClass {
        let class = self.classify_inner(request);
        debug!(
            "Classified {} {} as {}",
            request.method(),
            request.url(),
            class.as_str()
        );
        class
    }

    fn classify_inner(&self, request: &EdgeRequest) -> RequestClass {
        let Some(uri) = request.uri() else {
            return RequestClass::Generic;
        };
        let path = uri.path();

        if self.is_static_asset(request.url(), &uri) {
            return RequestClass::StaticAsset;
        }

        if request.destination().is_image() || path.starts_with(&self.config.protected_image_prefix)
        {
            return RequestClass::ProtectedImage;
        }

        if path.starts_with(&self.config.api_prefix) || request.method() != Method::GET {
            return RequestClass::Dynamic;
        }

        RequestClass::Generic
    }

    /// Check the URL against the static manifest
    ///
    /// An entry matches when it is the whole tail of the URL after the origin
    /// (path, or path plus query), or the whole URL for absolute entries.
    fn is_static_asset(&self, url: &str, uri: &http::Uri) -> bool {
        let url = url.split('#').next().unwrap_or(url);
        let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");

        self.config
            .static_manifest
            .iter()
            .any(|entry| entry == url || entry == path_and_query || entry == uri.path())
    }
}
