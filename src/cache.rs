//! Cache store seam and the in-memory store
//!
//! A cache store holds named tiers. Each tier maps a request identity to a
//! response. There is no TTL and no size-based eviction: an entry lives until
//! its whole tier is deleted by the generation manager.

use crate::error::{Result, ShieldError};
use crate::models::{EdgeRequest, EdgeResponse};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Handle to one named tier
#[async_trait]
pub trait TierHandle: Send + Sync {
    /// Name of the tier
    fn name(&self) -> &str;

    /// Look up the response stored for this request
    async fn lookup(&self, request: &EdgeRequest) -> Result<Option<EdgeResponse>>;

    /// Store a response for this request, replacing any previous entry
    async fn put(&self, request: &EdgeRequest, response: &EdgeResponse) -> Result<()>;
}

/// Collection of named tiers
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Open a tier, creating it when it does not exist yet
    async fn open(&self, tier: &str) -> Result<Arc<dyn TierHandle>>;

    /// Names of every existing tier
    async fn list_tier_names(&self) -> Result<BTreeSet<String>>;

    /// Delete a tier and all its entries. Returns whether it existed.
    async fn delete_tier(&self, tier: &str) -> Result<bool>;
}

/// Tier statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TierStats {
    pub entries: usize,
    pub body_bytes: usize,
    pub hits: u64,
    pub misses: u64,
}

/// One in-memory tier
pub struct MemoryTier {
    name: String,
    entries: RwLock<HashMap<String, EdgeResponse>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryTier {
    fn new(name: &str) -> Self {
        MemoryTier {
            name: name.to_string(),
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn lock_error(&self) -> ShieldError {
        ShieldError::CacheError(format!("tier '{}' lock poisoned", self.name))
    }

    /// Get tier statistics
    pub fn get_stats(&self) -> TierStats {
        let (entries, body_bytes) = match self.entries.read() {
            Ok(entries) => (
                entries.len(),
                entries.values().map(|r| r.body.len()).sum(),
            ),
            Err(_) => (0, 0),
        };

        TierStats {
            entries,
            body_bytes,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl TierHandle for MemoryTier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn lookup(&self, request: &EdgeRequest) -> Result<Option<EdgeResponse>> {
        let key = request.cache_key();
        let entries = self.entries.read().map_err(|_| self.lock_error())?;

        match entries.get(&key) {
            Some(response) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!("Tier hit: tier={}, key={}", self.name, key);
                Ok(Some(response.clone()))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!("Tier miss: tier={}, key={}", self.name, key);
                Ok(None)
            }
        }
    }

    async fn put(&self, request: &EdgeRequest, response: &EdgeResponse) -> Result<()> {
        let key = request.cache_key();
        let mut entries = self.entries.write().map_err(|_| self.lock_error())?;
        debug!(
            "Tier put: tier={}, key={}, size={}",
            self.name,
            key,
            response.body.len()
        );
        entries.insert(key, response.clone());
        Ok(())
    }
}

/// Cache store keeping every tier in process memory
#[derive(Default)]
pub struct MemoryCacheStore {
    tiers: RwLock<HashMap<String, Arc<MemoryTier>>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Statistics of a tier, if it exists
    pub fn tier_stats(&self, tier: &str) -> Option<TierStats> {
        let tiers = self.tiers.read().ok()?;
        tiers.get(tier).map(|t| t.get_stats())
    }

    fn lock_error() -> ShieldError {
        ShieldError::CacheError("tier map lock poisoned".to_string())
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn open(&self, tier: &str) -> Result<Arc<dyn TierHandle>> {
        if let Some(existing) = self
            .tiers
            .read()
            .map_err(|_| Self::lock_error())?
            .get(tier)
        {
            let handle: Arc<dyn TierHandle> = existing.clone();
            return Ok(handle);
        }

        let mut tiers = self.tiers.write().map_err(|_| Self::lock_error())?;
        let handle: Arc<dyn TierHandle> = tiers
            .entry(tier.to_string())
            .or_insert_with(|| {
                debug!("Created tier: {}", tier);
                Arc::new(MemoryTier::new(tier))
            })
            .clone();
        Ok(handle)
    }

    async fn list_tier_names(&self) -> Result<BTreeSet<String>> {
        let tiers = self.tiers.read().map_err(|_| Self::lock_error())?;
        Ok(tiers.keys().cloned().collect())
    }

    async fn delete_tier(&self, tier: &str) -> Result<bool> {
        let mut tiers = self.tiers.write().map_err(|_| Self::lock_error())?;
        Ok(tiers.remove(tier).is_some())
    }
}
