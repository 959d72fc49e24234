//! Cache generations
//!
//! Every cache tier name carries a generation label. A new deployment installs
//! its generation (precaching the static manifest), waits, and on activation
//! deletes every tier that does not belong to it.
//!
//! The binary activates at startup only when no earlier generation left tiers
//! behind. Otherwise the new generation stays waiting, and the old tiers are
//! kept, until the application posts `SKIP_WAITING`.

use crate::cache::CacheStore;
use crate::config::CacheConfig;
use crate::error::Result;
use crate::fetcher::NetworkFetcher;
use crate::models::EdgeRequest;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// Names of the three tiers of one generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierNames {
    pub static_tier: String,
    pub image_tier: String,
    /// Catch-all tier used by generic requests
    pub dynamic_tier: String,
}

impl TierNames {
    pub fn new(prefix: &str, version: &str) -> Self {
        TierNames {
            static_tier: format!("{}-static-{}", prefix, version),
            image_tier: format!("{}-images-{}", prefix, version),
            dynamic_tier: format!("{}-dynamic-{}", prefix, version),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(&config.tier_prefix, &config.generation)
    }

    pub fn contains(&self, name: &str) -> bool {
        name == self.static_tier || name == self.image_tier || name == self.dynamic_tier
    }
}

/// Lifecycle of a generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationState {
    Installing,
    /// Installed, older generations still present
    Waiting,
    Active,
}

impl GenerationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationState::Installing => "installing",
            GenerationState::Waiting => "waiting",
            GenerationState::Active => "active",
        }
    }
}

/// Installs and activates the current cache generation
pub struct GenerationManager {
    store: Arc<dyn CacheStore>,
    fetcher: Arc<dyn NetworkFetcher>,
    tiers: TierNames,
    manifest: Vec<String>,
    /// Origin prepended to relative manifest entries
    origin: Option<String>,
    state: RwLock<GenerationState>,
}

impl GenerationManager {
    pub fn new(
        store: Arc<dyn CacheStore>,
        fetcher: Arc<dyn NetworkFetcher>,
        tiers: TierNames,
        manifest: Vec<String>,
        origin: Option<String>,
    ) -> Self {
        GenerationManager {
            store,
            fetcher,
            tiers,
            manifest,
            origin: origin.map(|o| o.trim_end_matches('/').to_string()),
            state: RwLock::new(GenerationState::Installing),
        }
    }

    pub fn tiers(&self) -> &TierNames {
        &self.tiers
    }

    pub fn state(&self) -> GenerationState {
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: GenerationState) {
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = state;
        info!("Cache generation {} is {}", self.tiers.static_tier, state.as_str());
    }

    fn manifest_url(&self, entry: &str) -> Option<String> {
        if entry.starts_with("http://") || entry.starts_with("https://") {
            return Some(entry.to_string());
        }
        self.origin
            .as_ref()
            .map(|origin| format!("{}{}", origin, entry))
    }

    /// Precache the static manifest into the current static tier.
    ///
    /// Entries that fail to fetch, return a non-2xx status, or cannot be
    /// stored are logged and skipped. Returns how many were stored.
    pub async fn install(&self) -> Result<usize> {
        self.set_state(GenerationState::Installing);
        let tier = self.store.open(&self.tiers.static_tier).await?;

        let mut cached = 0;
        for entry in &self.manifest {
            let url = match self.manifest_url(entry) {
                Some(url) => url,
                None => {
                    warn!("No origin configured, cannot precache {}", entry);
                    continue;
                }
            };

            let request = EdgeRequest::get(url.as_str());
            match self.fetcher.fetch(&request).await {
                Ok(response) if response.is_success() => {
                    match tier.put(&request, &response).await {
                        Ok(()) => {
                            debug!("Precached {}", url);
                            cached += 1;
                        }
                        Err(e) => warn!("Failed to precache {}: {}", url, e),
                    }
                }
                Ok(response) => {
                    warn!("Skipping precache of {}: status {}", url, response.status);
                }
                Err(e) => warn!("Failed to precache {}: {}", url, e),
            }
        }

        info!(
            "Installed {} of {} manifest entries into {}",
            cached,
            self.manifest.len(),
            self.tiers.static_tier
        );
        self.set_state(GenerationState::Waiting);
        Ok(cached)
    }

    /// Delete every tier not belonging to this generation and become active.
    ///
    /// Returns the names of the deleted tiers.
    /// Tiers in the store that belong to another generation
    pub async fn stale_tiers(&self) -> Result<Vec<String>> {
        Ok(self
            .store
            .list_tier_names()
            .await?
            .into_iter()
            .filter(|name| !self.tiers.contains(name))
            .collect())
    }

    pub async fn activate(&self) -> Result<Vec<String>> {
        let mut deleted = Vec::new();
        for name in self.stale_tiers().await? {
            if self.store.delete_tier(&name).await? {
                info!("Deleted stale cache tier {}", name);
                deleted.push(name);
            }
        }

        self.set_state(GenerationState::Active);
        Ok(deleted)
    }

    /// Activate a waiting generation right away.
    ///
    /// Returns `None` when no generation was waiting.
    pub async fn skip_waiting(&self) -> Result<Option<Vec<String>>> {
        if self.state() != GenerationState::Waiting {
            debug!("skip_waiting ignored in state {}", self.state().as_str());
            return Ok(None);
        }
        info!("Skipping wait for cache generation {}", self.tiers.static_tier);
        self.activate().await.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStore;
    use crate::error::{NetworkFailure, ShieldError};
    use crate::models::EdgeResponse;
    use async_trait::async_trait;
    use http::StatusCode;

    /// Serves every URL except those containing "missing" or "down"
    struct StubFetcher;

    #[async_trait]
    impl NetworkFetcher for StubFetcher {
        async fn fetch(&self, request: &EdgeRequest) -> Result<EdgeResponse> {
            if request.url().contains("down") {
                return Err(ShieldError::network(NetworkFailure::Connect, "refused"));
            }
            if request.url().contains("missing") {
                return Ok(EdgeResponse::new(StatusCode::NOT_FOUND, ""));
            }
            Ok(EdgeResponse::new(StatusCode::OK, request.url().to_string()))
        }
    }

    fn manager(store: Arc<MemoryCacheStore>, manifest: &[&str]) -> GenerationManager {
        GenerationManager::new(
            store,
            Arc::new(StubFetcher),
            TierNames::new("edge", "v2"),
            manifest.iter().map(|s| s.to_string()).collect(),
            Some("https://site.test/".to_string()),
        )
    }

    #[test]
    fn test_tier_names() {
        let names = TierNames::new("edge-shield", "v1");
        assert_eq!(names.static_tier, "edge-shield-static-v1");
        assert_eq!(names.image_tier, "edge-shield-images-v1");
        assert_eq!(names.dynamic_tier, "edge-shield-dynamic-v1");
        assert!(names.contains("edge-shield-images-v1"));
        assert!(!names.contains("edge-shield-images-v0"));
    }

    #[tokio::test]
    async fn test_install_skips_failures() {
        let store = Arc::new(MemoryCacheStore::new());
        let manager = manager(
            store.clone(),
            &["/", "/css/style.css", "/missing.js", "/down.json"],
        );
        assert_eq!(manager.state(), GenerationState::Installing);

        let cached = manager.install().await.unwrap();
        assert_eq!(cached, 2);
        assert_eq!(manager.state(), GenerationState::Waiting);

        let tier = store.open("edge-static-v2").await.unwrap();
        let hit = tier
            .lookup(&EdgeRequest::get("https://site.test/css/style.css"))
            .await
            .unwrap();
        assert!(hit.is_some());
        assert_eq!(store.tier_stats("edge-static-v2").unwrap().entries, 2);
    }

    #[tokio::test]
    async fn test_activate_deletes_stale_tiers() {
        let store = Arc::new(MemoryCacheStore::new());
        store.open("edge-static-v1").await.unwrap();
        store.open("edge-images-v1").await.unwrap();
        store.open("edge-images-v2").await.unwrap();

        let manager = manager(store.clone(), &[]);
        manager.install().await.unwrap();
        let mut deleted = manager.activate().await.unwrap();
        deleted.sort();

        assert_eq!(deleted, vec!["edge-images-v1", "edge-static-v1"]);
        assert_eq!(manager.state(), GenerationState::Active);

        let remaining = store.list_tier_names().await.unwrap();
        assert!(remaining.contains("edge-images-v2"));
        assert!(remaining.contains("edge-static-v2"));
    }

    #[tokio::test]
    async fn test_stale_tiers_lists_other_generations() {
        let store = Arc::new(MemoryCacheStore::new());
        let manager = manager(store.clone(), &[]);
        manager.install().await.unwrap();
        assert!(manager.stale_tiers().await.unwrap().is_empty());

        store.open("edge-dynamic-v1").await.unwrap();
        store.open("other-app-cache").await.unwrap();
        let mut stale = manager.stale_tiers().await.unwrap();
        stale.sort();
        assert_eq!(stale, vec!["edge-dynamic-v1", "other-app-cache"]);
    }

    #[tokio::test]
    async fn test_skip_waiting_only_when_waiting() {
        let store = Arc::new(MemoryCacheStore::new());
        store.open("edge-static-v1").await.unwrap();
        let manager = manager(store.clone(), &[]);

        assert!(manager.skip_waiting().await.unwrap().is_none());

        manager.install().await.unwrap();
        let deleted = manager.skip_waiting().await.unwrap().unwrap();
        assert_eq!(deleted, vec!["edge-static-v1"]);
        assert_eq!(manager.state(), GenerationState::Active);

        assert!(manager.skip_waiting().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_install_without_origin_skips_relative_entries() {
        let store = Arc::new(MemoryCacheStore::new());
        let manager = GenerationManager::new(
            store.clone(),
            Arc::new(StubFetcher),
            TierNames::new("edge", "v1"),
            vec!["/index.html".to_string(), "https://cdn.test/lib.js".to_string()],
            None,
        );

        assert_eq!(manager.install().await.unwrap(), 1);
    }
}
