//! Host bridges and shared settings for the cache manager and sync queue.
//!
//! [`CoreConfig::builder`] collects the bridges and fails fast: a missing
//! capability is reported when the config is built, not on the first
//! request. `HttpClient` and `CacheStorage` are mandatory; the network
//! monitor and clock are optional. With the `desktop-shims` feature the
//! builder fills any bridge left unset with the `bridge-desktop` version.
//!
//! ```ignore
//! let config = CoreConfig::builder()
//!     .database_path("/var/lib/app/offline.db")
//!     .cache_dir("/var/cache/app")
//!     .http_client(Arc::new(MyHttpClient))
//!     .cache_storage(Arc::new(MyCacheStorage))
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use crate::events::DEFAULT_EVENT_BUFFER_SIZE;
use bridge_traits::{CacheStorage, Clock, HttpClient, NetworkMonitor, SystemClock};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Upper bound on the event channel; beyond this a subscriber is simply too slow.
const MAX_EVENT_BUFFER_SIZE: usize = 65_536;

/// Built by [`CoreConfigBuilder`]; cloning shares the bridges.
#[derive(Clone)]
pub struct CoreConfig {
    /// Path to the SQLite database holding the write queue
    pub database_path: PathBuf,

    /// Directory holding the response containers
    pub cache_dir: PathBuf,

    /// HTTP client for reads and queued writes
    pub http_client: Arc<dyn HttpClient>,

    /// Response container storage
    pub cache_storage: Arc<dyn CacheStorage>,

    /// Network connectivity monitor (optional)
    pub network_monitor: Option<Arc<dyn NetworkMonitor>>,

    /// Time source for cache ages and queue timestamps
    pub clock: Arc<dyn Clock>,

    /// Per-subscriber event buffer
    pub event_buffer_size: usize,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("database_path", &self.database_path)
            .field("cache_dir", &self.cache_dir)
            .field("http_client", &"HttpClient { ... }")
            .field("cache_storage", &"CacheStorage { ... }")
            .field(
                "network_monitor",
                &self
                    .network_monitor
                    .as_ref()
                    .map(|_| "NetworkMonitor { ... }"),
            )
            .field("event_buffer_size", &self.event_buffer_size)
            .finish()
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Re-checked by the façade at bootstrap, since fields are public.
    pub fn validate(&self) -> Result<()> {
        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        if self.event_buffer_size > MAX_EVENT_BUFFER_SIZE {
            return Err(Error::Config(format!(
                "Event buffer size {} exceeds maximum of {}",
                self.event_buffer_size, MAX_EVENT_BUFFER_SIZE
            )));
        }

        if self.database_path.as_os_str().is_empty() {
            return Err(Error::Config("Database path must not be empty".to_string()));
        }

        Ok(())
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    let client = bridge_desktop::ReqwestHttpClient::new().map_err(|e| {
        Error::CapabilityMissing {
            capability: "HttpClient".to_string(),
            message: format!("Failed to create the desktop HTTP client: {}", e),
        }
    })?;
    Ok(Arc::new(client))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: "No HttpClient implementation provided. Cached reads and queued writes \
                  need one. Inject an implementation via CoreConfig::builder().http_client(...) \
                  or enable the `desktop-shims` feature."
            .to_string(),
    })
}

#[cfg(feature = "desktop-shims")]
fn provide_default_cache_storage(cache_dir: &Path) -> Result<Arc<dyn CacheStorage>> {
    Ok(Arc::new(bridge_desktop::FsCacheStorage::new(cache_dir)))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_cache_storage(_cache_dir: &Path) -> Result<Arc<dyn CacheStorage>> {
    Err(Error::CapabilityMissing {
        capability: "CacheStorage".to_string(),
        message: "No CacheStorage implementation provided. The response cache needs \
                  persistent containers. Inject an implementation via \
                  CoreConfig::builder().cache_storage(...) or enable the `desktop-shims` feature."
            .to_string(),
    })
}

#[cfg(feature = "desktop-shims")]
fn provide_default_network_monitor() -> Option<Arc<dyn NetworkMonitor>> {
    Some(Arc::new(bridge_desktop::DesktopNetworkMonitor::new()))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_network_monitor() -> Option<Arc<dyn NetworkMonitor>> {
    None
}

#[derive(Default)]
pub struct CoreConfigBuilder {
    database_path: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
    http_client: Option<Arc<dyn HttpClient>>,
    cache_storage: Option<Arc<dyn CacheStorage>>,
    network_monitor: Option<Arc<dyn NetworkMonitor>>,
    clock: Option<Arc<dyn Clock>>,
    event_buffer_size: Option<usize>,
}

impl CoreConfigBuilder {
    /// Sets the write queue database path (required).
    pub fn database_path(mut self, path: impl AsRef<Path>) -> Self {
        self.database_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Sets the response container directory (required).
    pub fn cache_dir(mut self, path: impl AsRef<Path>) -> Self {
        self.cache_dir = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn cache_storage(mut self, storage: Arc<dyn CacheStorage>) -> Self {
        self.cache_storage = Some(storage);
        self
    }

    pub fn network_monitor(mut self, monitor: Arc<dyn NetworkMonitor>) -> Self {
        self.network_monitor = Some(monitor);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    /// # Errors
    ///
    /// [`Error::Config`] for a missing path or bad value,
    /// [`Error::CapabilityMissing`] for a bridge with no default.
    pub fn build(self) -> Result<CoreConfig> {
        let database_path = self.database_path.ok_or_else(|| {
            Error::Config("Database path is required. Use .database_path() to set it.".to_string())
        })?;

        let cache_dir = self.cache_dir.ok_or_else(|| {
            Error::Config("Cache directory is required. Use .cache_dir() to set it.".to_string())
        })?;

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client()?,
        };

        let cache_storage = match self.cache_storage {
            Some(storage) => storage,
            None => provide_default_cache_storage(&cache_dir)?,
        };

        let config = CoreConfig {
            database_path,
            cache_dir,
            http_client,
            cache_storage,
            network_monitor: self
                .network_monitor
                .or_else(provide_default_network_monitor),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            event_buffer_size: self
                .event_buffer_size
                .unwrap_or(DEFAULT_EVENT_BUFFER_SIZE),
        };

        config.validate()?;

        Ok(config)
    }
}
