//! Asset cache
//!
//! Key/value store for avatar models, keyed by participant id. `put`
//! overwrites. There are no transactions and no eviction.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::error::CacheError;

/// Persistent store for avatar models
#[async_trait]
pub trait AssetCache: Send + Sync {
    /// Store `bytes` under `key`, replacing any previous value
    async fn put(&self, key: &str, bytes: Bytes) -> Result<(), CacheError>;

    /// Stored value for `key`, if any
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError>;

    /// Whether `key` has a stored value
    async fn exists_key(&self, key: &str) -> Result<bool, CacheError>;
}

/// Directory-backed cache, one file per key.
///
/// The directory is created on first use. Concurrent first callers share a
/// single open.
pub struct FsAssetCache {
    root: PathBuf,
    dir: OnceCell<PathBuf>,
    opens: AtomicUsize,
}

impl FsAssetCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            dir: OnceCell::new(),
            opens: AtomicUsize::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// How many times the store directory was actually opened
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    async fn open(&self) -> Result<&Path, CacheError> {
        let dir = self
            .dir
            .get_or_try_init(|| async {
                tokio::fs::create_dir_all(&self.root)
                    .await
                    .map_err(|source| CacheError::Open {
                        path: self.root.display().to_string(),
                        source,
                    })?;
                self.opens.fetch_add(1, Ordering::SeqCst);
                debug!("Opened asset store at {}", self.root.display());
                Ok::<_, CacheError>(self.root.clone())
            })
            .await?;
        Ok(dir.as_path())
    }

    // Ids are caller-chosen strings, so they never reach the filesystem raw
    fn file_name(key: &str) -> String {
        format!("{}.vrm", hex::encode(key.as_bytes()))
    }
}

#[async_trait]
impl AssetCache for FsAssetCache {
    async fn put(&self, key: &str, bytes: Bytes) -> Result<(), CacheError> {
        let dir = self.open().await?;
        let name = Self::file_name(key);
        let path = dir.join(&name);
        let tmp = dir.join(format!("{}.{}.tmp", name, uuid::Uuid::new_v4().simple()));

        if let Err(e) = tokio::fs::write(&tmp, &bytes).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            warn!("Failed to move asset for {} into place: {}", key, e);
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        debug!("Stored {} bytes for {}", bytes.len(), key);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        let path = self.open().await?.join(Self::file_name(key));
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists_key(&self, key: &str) -> Result<bool, CacheError> {
        let path = self.open().await?.join(Self::file_name(key));
        Ok(tokio::fs::try_exists(&path).await?)
    }
}

/// In-process cache
#[derive(Default)]
pub struct MemoryAssetCache {
    entries: DashMap<String, Bytes>,
}

impl MemoryAssetCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl AssetCache for MemoryAssetCache {
    async fn put(&self, key: &str, bytes: Bytes) -> Result<(), CacheError> {
        self.entries.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn exists_key(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.entries.contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_is_path_safe() {
        let name = FsAssetCache::file_name("../etc/passwd");
        assert!(!name.contains('/'));
        assert_eq!(name.matches('.').count(), 1);
        assert_eq!(FsAssetCache::file_name("ab"), "6162.vrm");
    }

    #[tokio::test]
    async fn test_memory_overwrite() {
        let cache = MemoryAssetCache::new();
        cache.put("alice", Bytes::from_static(b"v1")).await.unwrap();
        cache.put("alice", Bytes::from_static(b"v2")).await.unwrap();

        assert_eq!(cache.len(), 1);
        assert_eq!(
            cache.get("alice").await.unwrap(),
            Some(Bytes::from_static(b"v2"))
        );
        assert!(!cache.exists_key("bob").await.unwrap());
    }
}
