//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (HTTP, response
//! containers, connectivity) into one cache manager and one sync queue that
//! share an event bus. Desktop apps typically enable the `desktop-shims`
//! feature (which depends on `bridge-desktop`) so the bridges they do not
//! inject are filled with native defaults.
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use core_service::OfflineCore;
//!
//! let config = CoreConfig::builder()
//!     .database_path("/var/lib/app/offline.db")
//!     .cache_dir("/var/cache/app")
//!     .build()?;
//! let core = OfflineCore::bootstrap(config).await?;
//!
//! let page = core.handle_request(HttpRequest::get("/api/posts")).await?;
//! core.register(SyncRequest::post("/api/posts").json(&draft)?).await?;
//!
//! core.shutdown().await;
//! ```

pub mod error;

pub use error::{CoreError, Result};

use std::sync::Arc;

use bridge_traits::{HttpRequest, HttpResponse};
use core_cache::{CacheClass, CacheConfig, CacheManager, CacheStats, InvalidationScope, UrlPattern};
use core_runtime::config::CoreConfig;
use core_runtime::events::{CoreEvent, EventBus, EventStream, Receiver};
use core_sync::{
    SqliteSyncOperationStore, SyncConfig, SyncOperation, SyncOperationId, SyncOperationStore,
    SyncQueue, SyncRequest,
};
use tracing::{info, instrument};

#[cfg(all(feature = "desktop-shims", not(target_arch = "wasm32")))]
pub use bridge_desktop::{DesktopNetworkMonitor, FsCacheStorage, ReqwestHttpClient};

/// Primary façade exposed to host applications.
///
/// Holds the cache manager for reads and the sync queue for writes. The two
/// never call each other; the façade only constructs, starts and stops them.
#[derive(Clone)]
pub struct OfflineCore {
    cache: CacheManager,
    sync: SyncQueue,
    event_bus: EventBus,
}

impl OfflineCore {
    /// Bootstrap with default cache and queue settings.
    pub async fn bootstrap(config: CoreConfig) -> Result<Self> {
        Self::bootstrap_with(config, CacheConfig::default(), SyncConfig::default()).await
    }

    /// Bootstrap with explicit cache and queue settings.
    ///
    /// Opens the write queue database at `config.database_path`.
    pub async fn bootstrap_with(
        config: CoreConfig,
        cache_config: CacheConfig,
        sync_config: SyncConfig,
    ) -> Result<Self> {
        let store = SqliteSyncOperationStore::open(&config.database_path)
            .await
            .map_err(|e| {
                CoreError::InitializationFailed(format!(
                    "Failed to open write queue at {}: {}",
                    config.database_path.display(),
                    e
                ))
            })?;

        Self::bootstrap_with_store(config, cache_config, sync_config, Arc::new(store)).await
    }

    /// Bootstrap around an existing operation store.
    #[instrument(skip_all)]
    pub async fn bootstrap_with_store(
        config: CoreConfig,
        cache_config: CacheConfig,
        sync_config: SyncConfig,
        store: Arc<dyn SyncOperationStore>,
    ) -> Result<Self> {
        config.validate()?;
        let event_bus = EventBus::new(config.event_buffer_size);

        let cache = CacheManager::new(
            cache_config,
            Arc::clone(&config.cache_storage),
            Arc::clone(&config.http_client),
            Arc::clone(&config.clock),
        )?
        .with_event_bus(event_bus.clone());
        cache.initialize().await?;
        cache.start_eviction_scheduler();

        let mut sync = SyncQueue::new(
            sync_config,
            store,
            Arc::clone(&config.http_client),
            Arc::clone(&config.clock),
        )?
        .with_event_bus(event_bus.clone());
        if let Some(monitor) = &config.network_monitor {
            sync = sync.with_network_monitor(Arc::clone(monitor));
        }

        if let Err(e) = sync.start().await {
            cache.stop_eviction_scheduler().await;
            return Err(CoreError::InitializationFailed(format!(
                "Failed to start sync queue: {}",
                e
            )));
        }

        info!(
            database = %config.database_path.display(),
            cache_dir = %config.cache_dir.display(),
            "Offline core started"
        );
        Ok(Self {
            cache,
            sync,
            event_bus,
        })
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    pub fn sync_queue(&self) -> &SyncQueue {
        &self.sync
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Route an outbound read through the cache.
    pub async fn handle_request(&self, request: HttpRequest) -> Result<HttpResponse> {
        Ok(self.cache.handle_request(request).await?)
    }

    pub async fn invalidate_by_type(&self, scope: InvalidationScope) -> Result<usize> {
        Ok(self.cache.invalidate_by_type(scope).await?)
    }

    pub async fn invalidate_by_url(&self, pattern: &UrlPattern) -> Result<usize> {
        Ok(self.cache.invalidate_by_url(pattern).await?)
    }

    pub async fn invalidate_by_resource(&self, resource: &str, id: Option<&str>) -> Result<usize> {
        Ok(self.cache.invalidate_by_resource(resource, id).await?)
    }

    pub async fn invalidate_expired(&self) -> Result<usize> {
        Ok(self.cache.invalidate_expired().await?)
    }

    pub fn get_cache_stats(&self, class: CacheClass) -> CacheStats {
        self.cache.get_cache_stats(class)
    }

    pub fn get_all_stats(&self) -> Vec<CacheStats> {
        self.cache.get_all_stats()
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Queue an outbound write for durable delivery.
    pub async fn register(&self, request: SyncRequest) -> Result<SyncOperationId> {
        Ok(self.sync.register(request).await?)
    }

    pub async fn retry_failed(&self) -> Result<usize> {
        Ok(self.sync.retry_failed().await?)
    }

    pub async fn clear_all(&self) -> Result<u64> {
        Ok(self.sync.clear_all().await?)
    }

    pub async fn pending_operations(&self) -> Result<Vec<SyncOperation>> {
        Ok(self.sync.pending_operations().await?)
    }

    // ========================================================================
    // Events & lifecycle
    // ========================================================================

    /// Subscribe to cache and sync events, including abandoned writes.
    pub fn subscribe_events(&self) -> Receiver<CoreEvent> {
        self.event_bus.subscribe()
    }

    /// Filterable stream over [`subscribe_events`](Self::subscribe_events).
    pub fn event_stream(&self) -> EventStream {
        self.event_bus.stream()
    }

    /// Stop background work. Pending writes stay persisted for the next run.
    pub async fn shutdown(&self) {
        self.cache.stop_eviction_scheduler().await;
        self.sync.stop().await;
        info!("Offline core stopped");
    }
}
