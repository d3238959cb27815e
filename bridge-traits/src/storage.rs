//! Response Container Abstraction
//!
//! Provides the named, persistent response containers the cache manager layers
//! its policy on top of. A container is a flat map from request URL to a stored
//! response; the host decides how containers are persisted.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::Result;
use crate::http::HttpResponse;

/// A response as held inside a cache container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    /// Request URL the response was stored under
    pub url: String,
    /// HTTP status code of the stored response
    pub status: u16,
    /// Response headers
    pub headers: HashMap<String, String>,
    /// Raw payload
    #[serde(skip)]
    pub body: Bytes,
    /// When the response was written into the container
    pub cached_at: DateTime<Utc>,
}

impl CachedResponse {
    pub fn from_response(
        url: impl Into<String>,
        response: &HttpResponse,
        cached_at: DateTime<Utc>,
    ) -> Self {
        Self {
            url: url.into(),
            status: response.status,
            headers: response.headers.clone(),
            body: response.body.clone(),
            cached_at,
        }
    }

    /// Payload size in bytes
    pub fn size(&self) -> u64 {
        self.body.len() as u64
    }

    pub fn to_response(&self) -> HttpResponse {
        HttpResponse {
            status: self.status,
            headers: self.headers.clone(),
            body: self.body.clone(),
        }
    }
}

/// Named response containers
///
/// Platform mappings:
/// - **Web**: the Cache Storage API exposed to service workers
/// - **Desktop**: one directory per container (see `bridge-desktop`)
/// - **Tests**: in-memory maps
///
/// Implementations report a full disk or exhausted browser quota as
/// [`BridgeError::QuotaExceeded`](crate::error::BridgeError::QuotaExceeded).
/// Callers treat every error from this trait as recoverable.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::{CacheStorage, CachedResponse};
///
/// async fn remember(storage: &dyn CacheStorage, entry: CachedResponse) -> Result<()> {
///     storage.put("offline-v1-api", &entry.url.clone(), &entry).await
/// }
/// ```
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Store (or overwrite) a response under `key` in `container`, creating the
    /// container when it does not exist yet.
    async fn put(&self, container: &str, key: &str, response: &CachedResponse) -> Result<()>;

    /// Fetch a stored response.
    async fn get(&self, container: &str, key: &str) -> Result<Option<CachedResponse>>;

    /// Remove a stored response. Returns whether it existed.
    async fn delete(&self, container: &str, key: &str) -> Result<bool>;

    /// List every key held by `container` (empty when the container is absent).
    async fn keys(&self, container: &str) -> Result<Vec<String>>;

    /// Drop a whole container. Returns whether it existed.
    async fn delete_container(&self, container: &str) -> Result<bool>;

    /// Names of all existing containers.
    async fn container_names(&self) -> Result<Vec<String>>;
}
