//! Response container storage on the local file system
//!
//! Layout: `<root>/<container>/<sha256(url)>.body` holds the raw payload and
//! `<sha256(url)>.meta.json` the status, headers and timestamps. The metadata
//! file is written last and removed first, so a reader that finds it can rely
//! on the payload being complete.

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::{CacheStorage, CachedResponse},
};
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const BODY_SUFFIX: &str = ".body";
const META_SUFFIX: &str = ".meta.json";

/// ENOSPC on Unix, ERROR_DISK_FULL on Windows
const DISK_FULL_CODES: &[i32] = &[28, 112];

/// `CacheStorage` backed by one directory per container.
#[derive(Debug, Clone)]
pub struct FsCacheStorage {
    root: PathBuf,
}

impl FsCacheStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn container_dir(&self, container: &str) -> Result<PathBuf> {
        let valid = !container.is_empty()
            && !container.starts_with('.')
            && container
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

        if !valid {
            return Err(BridgeError::OperationFailed(format!(
                "Invalid cache container name: {:?}",
                container
            )));
        }

        Ok(self.root.join(container))
    }

    fn entry_stem(key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn entry_paths(dir: &Path, key: &str) -> (PathBuf, PathBuf) {
        let stem = Self::entry_stem(key);
        (
            dir.join(format!("{}{}", stem, BODY_SUFFIX)),
            dir.join(format!("{}{}", stem, META_SUFFIX)),
        )
    }

    async fn read_meta(path: &Path) -> Result<Option<CachedResponse>> {
        let raw = match tokio::fs::read(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(map_io(e)),
        };

        serde_json::from_slice(&raw).map(Some).map_err(|e| {
            BridgeError::OperationFailed(format!(
                "Corrupt cache metadata {}: {}",
                path.display(),
                e
            ))
        })
    }
}

fn map_io(e: std::io::Error) -> BridgeError {
    match e.raw_os_error() {
        Some(code) if DISK_FULL_CODES.contains(&code) => BridgeError::QuotaExceeded(e.to_string()),
        _ => BridgeError::Io(e),
    }
}

async fn remove_if_exists(path: &Path) -> Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(map_io(e)),
    }
}

#[async_trait]
impl CacheStorage for FsCacheStorage {
    async fn put(&self, container: &str, key: &str, response: &CachedResponse) -> Result<()> {
        let dir = self.container_dir(container)?;
        tokio::fs::create_dir_all(&dir).await.map_err(map_io)?;

        let (body_path, meta_path) = Self::entry_paths(&dir, key);
        let meta = serde_json::to_vec(response).map_err(|e| {
            BridgeError::OperationFailed(format!("Failed to encode cache metadata: {}", e))
        })?;

        // An overwrite must not leave the old metadata pointing at a new body
        remove_if_exists(&meta_path).await?;
        tokio::fs::write(&body_path, &response.body)
            .await
            .map_err(map_io)?;
        tokio::fs::write(&meta_path, meta).await.map_err(map_io)?;

        debug!(container, key, bytes = response.body.len(), "Stored cached response");
        Ok(())
    }

    async fn get(&self, container: &str, key: &str) -> Result<Option<CachedResponse>> {
        let dir = self.container_dir(container)?;
        let (body_path, meta_path) = Self::entry_paths(&dir, key);

        let Some(mut cached) = Self::read_meta(&meta_path).await? else {
            return Ok(None);
        };

        match tokio::fs::read(&body_path).await {
            Ok(body) => {
                cached.body = Bytes::from(body);
                Ok(Some(cached))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(container, key, "Cache metadata without payload");
                Ok(None)
            }
            Err(e) => Err(map_io(e)),
        }
    }

    async fn delete(&self, container: &str, key: &str) -> Result<bool> {
        let dir = self.container_dir(container)?;
        let (body_path, meta_path) = Self::entry_paths(&dir, key);

        let existed = remove_if_exists(&meta_path).await?;
        remove_if_exists(&body_path).await?;
        Ok(existed)
    }

    async fn keys(&self, container: &str) -> Result<Vec<String>> {
        let dir = self.container_dir(container)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(map_io(e)),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(map_io)? {
            let path = entry.path();
            let is_meta = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(META_SUFFIX));
            if !is_meta {
                continue;
            }

            match Self::read_meta(&path).await {
                Ok(Some(meta)) => keys.push(meta.url),
                Ok(None) => {}
                Err(e) => warn!(
                    path = %path.display(),
                    error = %e,
                    "Skipping unreadable cache entry"
                ),
            }
        }

        Ok(keys)
    }

    async fn delete_container(&self, container: &str) -> Result<bool> {
        let dir = self.container_dir(container)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(map_io(e)),
        }
    }

    async fn container_names(&self) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(map_io(e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(map_io)? {
            if entry.file_type().await.map_err(map_io)?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }

        names.sort();
        Ok(names)
    }
}
