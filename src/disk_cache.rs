//! Disk-backed cache store
//!
//! Layout: one directory per tier under the base path, one file per entry.
//! Entry files are named by the xxh3 hash of the request key and hold a
//! bincode-encoded [`StoredResponse`] that repeats the key, so a hash
//! collision reads as a miss instead of the wrong response.

use crate::cache::{CacheStore, TierHandle};
use crate::error::{Result, ShieldError};
use crate::models::{EdgeRequest, EdgeResponse, ResponseType};
use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use xxhash_rust::xxh3::xxh3_64;

const ENTRY_EXTENSION: &str = "entry";

/// On-disk form of a cached response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredResponse {
    pub key: String,
    pub status: u16,
    pub headers: Vec<(String, Vec<u8>)>,
    pub body: Vec<u8>,
    pub response_type: ResponseType,
}

impl StoredResponse {
    fn from_response(key: String, response: &EdgeResponse) -> Self {
        StoredResponse {
            key,
            status: response.status.as_u16(),
            headers: response
                .headers
                .iter()
                .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
                .collect(),
            body: response.body.to_vec(),
            response_type: response.response_type,
        }
    }

    fn into_response(self) -> Result<EdgeResponse> {
        let status = StatusCode::from_u16(self.status)
            .map_err(|e| ShieldError::CacheError(format!("stored status invalid: {}", e)))?;

        let mut headers = HeaderMap::new();
        for (name, value) in self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ShieldError::CacheError(format!("stored header invalid: {}", e)))?;
            let value = HeaderValue::from_bytes(&value)
                .map_err(|e| ShieldError::CacheError(format!("stored header invalid: {}", e)))?;
            headers.append(name, value);
        }

        Ok(EdgeResponse {
            status,
            headers,
            body: Bytes::from(self.body),
            response_type: self.response_type,
        })
    }
}

/// Tier names become directory names; anything that could escape the base
/// directory is rejected.
fn validate_tier_name(tier: &str) -> Result<()> {
    let valid = !tier.is_empty()
        && tier != "."
        && tier != ".."
        && tier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(ShieldError::CacheError(format!("invalid tier name '{}'", tier)))
    }
}

async fn write_entry(tmp_path: &Path, path: &Path, encoded: &[u8]) -> Result<()> {
    let mut file = fs::File::create(tmp_path)
        .await
        .map_err(|e| ShieldError::CacheError(format!("Failed to create cache file: {}", e)))?;
    file.write_all(encoded)
        .await
        .map_err(|e| ShieldError::CacheError(format!("Failed to write entry: {}", e)))?;
    file.sync_all()
        .await
        .map_err(|e| ShieldError::CacheError(format!("Failed to sync file: {}", e)))?;
    fs::rename(tmp_path, path)
        .await
        .map_err(|e| ShieldError::CacheError(format!("Failed to commit entry: {}", e)))
}

/// One tier directory
pub struct DiskTier {
    name: String,
    dir: PathBuf,
}

impl DiskTier {
    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("{:016x}.{}", xxh3_64(key.as_bytes()), ENTRY_EXTENSION))
    }
}

#[async_trait]
impl TierHandle for DiskTier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn lookup(&self, request: &EdgeRequest) -> Result<Option<EdgeResponse>> {
        let key = request.cache_key();
        let path = self.entry_path(&key);

        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Disk tier miss: tier={}, key={}", self.name, key);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let stored: StoredResponse = bincode::deserialize(&data).map_err(|e| {
            ShieldError::CacheError(format!("corrupt entry {}: {}", path.display(), e))
        })?;

        if stored.key != key {
            warn!(
                "Disk tier key collision: tier={}, wanted={}, found={}",
                self.name, key, stored.key
            );
            return Ok(None);
        }

        debug!("Disk tier hit: tier={}, key={}", self.name, key);
        stored.into_response().map(Some)
    }

    async fn put(&self, request: &EdgeRequest, response: &EdgeResponse) -> Result<()> {
        let key = request.cache_key();
        let path = self.entry_path(&key);
        let stored = StoredResponse::from_response(key, response);
        let encoded = bincode::serialize(&stored)
            .map_err(|e| ShieldError::CacheError(format!("failed to encode entry: {}", e)))?;

        // Write to a sibling file and rename so readers never see a partial entry
        let tmp_path = path.with_extension("tmp");
        if let Err(e) = write_entry(&tmp_path, &path, &encoded).await {
            if let Err(cleanup) = fs::remove_file(&tmp_path).await {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove {}: {}", tmp_path.display(), cleanup);
                }
            }
            return Err(e);
        }

        debug!(
            "Disk tier put: tier={}, key={}, size={}",
            self.name,
            stored.key,
            encoded.len()
        );
        Ok(())
    }
}

/// Cache store persisting tiers under a base directory
pub struct DiskCacheStore {
    base_path: PathBuf,
}

impl DiskCacheStore {
    /// Create the store, creating the base directory if needed
    pub async fn new(base_path: impl AsRef<Path>) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path).await.map_err(|e| {
            ShieldError::CacheError(format!(
                "Failed to create cache directory {}: {}",
                base_path.display(),
                e
            ))
        })?;
        info!("Disk cache store at {:?}", base_path);
        Ok(DiskCacheStore { base_path })
    }
}

#[async_trait]
impl CacheStore for DiskCacheStore {
    async fn open(&self, tier: &str) -> Result<Arc<dyn TierHandle>> {
        validate_tier_name(tier)?;
        let dir = self.base_path.join(tier);
        fs::create_dir_all(&dir).await.map_err(|e| {
            ShieldError::CacheError(format!("Failed to create tier directory: {}", e))
        })?;

        let handle: Arc<dyn TierHandle> = Arc::new(DiskTier {
            name: tier.to_string(),
            dir,
        });
        Ok(handle)
    }

    async fn list_tier_names(&self) -> Result<BTreeSet<String>> {
        let mut names = BTreeSet::new();
        let mut entries = fs::read_dir(&self.base_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.insert(name.to_string());
                }
            }
        }
        Ok(names)
    }

    async fn delete_tier(&self, tier: &str) -> Result<bool> {
        validate_tier_name(tier)?;
        match fs::remove_dir_all(self.base_path.join(tier)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
