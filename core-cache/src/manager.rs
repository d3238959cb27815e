//! # Response Cache Manager
//!
//! Serves GET/HEAD requests from the class-scoped containers using the
//! strategy of each request's traffic class, and keeps every container under
//! its byte budget.
//!
//! ## Overview
//!
//! - **cache-first** (`STATIC`): stored copy wins; network only on a miss
//! - **network-first** (`API`, `DYNAMIC`): network wins; stored copy when offline
//! - **stale-while-revalidate** (`IMAGES`): stored copy now, refreshed in the background
//!
//! Every container write is followed by an eviction pass over that class, and
//! [`CacheManager::start_eviction_scheduler`] adds a periodic pass over all of
//! them. Writes, evictions and invalidations are serialized by one async gate
//! so the in-memory index and the containers never disagree about membership.
//! A background refresh that was in flight when an invalidation ran drops its
//! result rather than writing back what was just removed.
//!
//! Storage failures never reach the caller of [`CacheManager::handle_request`]:
//! a failed read is a miss and a failed write serves the response uncached.
//!
//! ## Usage
//!
//! ```ignore
//! use core_cache::{CacheConfig, CacheManager};
//!
//! let manager = CacheManager::new(CacheConfig::default(), storage, http_client, clock)?
//!     .with_event_bus(event_bus);
//!
//! manager.initialize().await?;
//! manager.start_eviction_scheduler();
//!
//! let response = manager.handle_request(HttpRequest::get("/api/posts")).await?;
//! ```

use bridge_traits::{
    CacheStorage, CachedResponse, Clock, HttpClient, HttpMethod, HttpRequest, HttpResponse,
};
use core_runtime::events::{CacheEvent, CoreEvent, EventBus};
use core_runtime::logging::strip_query;
use parking_lot::Mutex as SyncMutex;
use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::classify::{CacheClass, CacheStrategy, RequestClassifier};
use crate::config::CacheConfig;
use crate::entry::CacheEntry;
use crate::error::{CacheError, Result};
use crate::eviction::plan_eviction;
use crate::index::CacheIndex;
use crate::invalidation::{InvalidationScope, UrlPattern};
use crate::stats::CacheStats;

/// Outcome of one eviction pass over a class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionReport {
    pub class: CacheClass,
    pub entries_removed: usize,
    pub bytes_freed: u64,
}

impl EvictionReport {
    fn empty(class: CacheClass) -> Self {
        Self {
            class,
            entries_removed: 0,
            bytes_freed: 0,
        }
    }
}

struct EvictionScheduler {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Clears the in-flight marker of a background refresh however it ends.
struct RefreshGuard {
    refreshing: Arc<SyncMutex<HashSet<String>>>,
    url: String,
}

impl Drop for RefreshGuard {
    fn drop(&mut self) {
        self.refreshing.lock().remove(&self.url);
    }
}

/// Strategy-driven response cache.
///
/// Cloning is cheap; clones share the index, the write gate and the
/// eviction scheduler.
#[derive(Clone)]
pub struct CacheManager {
    config: Arc<CacheConfig>,
    classifier: Arc<RequestClassifier>,
    storage: Arc<dyn CacheStorage>,
    http_client: Arc<dyn HttpClient>,
    clock: Arc<dyn Clock>,
    event_bus: Option<EventBus>,
    index: Arc<CacheIndex>,
    write_gate: Arc<Mutex<()>>,
    /// Bumped under the write gate by every invalidation
    invalidations: Arc<AtomicU64>,
    refreshing: Arc<SyncMutex<HashSet<String>>>,
    scheduler: Arc<SyncMutex<Option<EvictionScheduler>>>,
}

impl CacheManager {
    /// Create a cache manager. Fails if `config` does not validate.
    pub fn new(
        config: CacheConfig,
        storage: Arc<dyn CacheStorage>,
        http_client: Arc<dyn HttpClient>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let classifier = RequestClassifier::new(&config)?;

        Ok(Self {
            config: Arc::new(config),
            classifier: Arc::new(classifier),
            storage,
            http_client,
            clock,
            event_bus: None,
            index: Arc::new(CacheIndex::new()),
            write_gate: Arc::new(Mutex::new(())),
            invalidations: Arc::new(AtomicU64::new(0)),
            refreshing: Arc::new(SyncMutex::new(HashSet::new())),
            scheduler: Arc::new(SyncMutex::new(None)),
        })
    }

    /// Publish eviction and invalidation events on `event_bus`.
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Index entry for `url`, if it is cached.
    pub fn entry(&self, url: &str) -> Option<CacheEntry> {
        self.index.get(url)
    }

    pub fn entry_count(&self) -> usize {
        self.index.len()
    }

    /// Number of stale-while-revalidate refreshes still running.
    pub fn refreshes_in_flight(&self) -> usize {
        self.refreshing.lock().len()
    }

    /// Class and strategy a request for `url` is served with.
    ///
    /// A cached URL keeps the class and strategy it was stored under.
    pub fn route(&self, url: &str) -> (CacheClass, CacheStrategy) {
        if let Some(entry) = self.index.get(url) {
            return (entry.class, entry.strategy);
        }
        let class = self.classifier.classify(url);
        (class, class.default_strategy())
    }

    // ========================================================================
    // Startup
    // ========================================================================

    /// Delete containers of older namespace versions and rebuild the index
    /// from what the current containers hold.
    ///
    /// Restored entries start with `last_accessed = cached_at` and no hits.
    #[instrument(skip(self), fields(namespace = %self.config.namespace))]
    pub async fn initialize(&self) -> Result<()> {
        let names = self.storage.container_names().await.map_err(|e| {
            CacheError::Storage(format!("Failed to list cache containers: {}", e))
        })?;

        let family = self.config.namespace_family();
        let current = format!("{}-", self.config.namespace);

        let gate = self.write_gate.lock().await;

        let mut purged = Vec::new();
        for name in names
            .into_iter()
            .filter(|name| name.starts_with(family) && !name.starts_with(&current))
        {
            match self.storage.delete_container(&name).await {
                Ok(_) => {
                    info!(container = %name, "Deleted stale cache container");
                    purged.push(name);
                }
                Err(e) => warn!(container = %name, error = %e, "Failed to delete stale container"),
            }
        }

        self.index.clear();
        let mut restored = 0usize;
        for class in CacheClass::ALL {
            let container = self.config.container_name(class);
            let keys = match self.storage.keys(&container).await {
                Ok(keys) => keys,
                Err(e) => {
                    warn!(container = %container, error = %e, "Failed to list container keys");
                    continue;
                }
            };

            for key in keys {
                match self.storage.get(&container, &key).await {
                    Ok(Some(cached)) => {
                        self.index.upsert(CacheEntry::new(
                            key,
                            class,
                            class.default_strategy(),
                            cached.size(),
                            cached.cached_at,
                        ));
                        restored += 1;
                    }
                    Ok(None) => {}
                    Err(e) => warn!(
                        container = %container,
                        url = %strip_query(&key),
                        error = %e,
                        "Skipping unreadable entry"
                    ),
                }
            }
        }
        drop(gate);

        info!(restored, purged = purged.len(), "Cache index rebuilt");
        if !purged.is_empty() {
            self.emit(CacheEvent::StaleContainersPurged { containers: purged });
        }
        Ok(())
    }

    // ========================================================================
    // Request handling
    // ========================================================================

    /// Serve a request.
    ///
    /// Methods other than GET and HEAD go straight to the network. HEAD
    /// requests read the cache but are never stored. The only error is
    /// [`CacheError::Network`], returned when the network failed and no
    /// stored copy could stand in.
    #[instrument(
        skip(self, request),
        fields(method = %request.method, url = %strip_query(&request.url))
    )]
    pub async fn handle_request(&self, request: HttpRequest) -> Result<HttpResponse> {
        if !request.method.is_cacheable() {
            debug!("Bypassing cache");
            return self.fetch(request).await;
        }

        let (class, strategy) = self.route(&request.url);
        debug!(class = %class, strategy = %strategy, "Routing request");

        match strategy {
            CacheStrategy::CacheFirst => self.cache_first(request, class, strategy).await,
            CacheStrategy::NetworkFirst => self.network_first(request, class, strategy).await,
            CacheStrategy::StaleWhileRevalidate => {
                self.stale_while_revalidate(request, class, strategy).await
            }
        }
    }

    async fn cache_first(
        &self,
        request: HttpRequest,
        class: CacheClass,
        strategy: CacheStrategy,
    ) -> Result<HttpResponse> {
        if let Some(cached) = self.read_cached(&request.url).await {
            return Ok(cached);
        }

        let url = request.url.clone();
        let writable = request.method == HttpMethod::Get;
        let response = self.fetch(request).await?;
        if writable && response.is_success() {
            self.store(&url, class, strategy, &response).await;
        }
        Ok(response)
    }

    async fn network_first(
        &self,
        request: HttpRequest,
        class: CacheClass,
        strategy: CacheStrategy,
    ) -> Result<HttpResponse> {
        let url = request.url.clone();
        let writable = request.method == HttpMethod::Get;

        match self.fetch(request).await {
            Ok(response) if response.is_success() => {
                if writable {
                    self.store(&url, class, strategy, &response).await;
                }
                Ok(response)
            }
            Ok(response) => {
                if let Some(cached) = self.read_cached(&url).await {
                    debug!(status = response.status, "Serving cached copy over error response");
                    return Ok(cached);
                }
                Ok(response)
            }
            Err(err) => {
                if let Some(cached) = self.read_cached(&url).await {
                    debug!(error = %err, "Network failed, serving cached copy");
                    return Ok(cached);
                }
                Err(err)
            }
        }
    }

    async fn stale_while_revalidate(
        &self,
        request: HttpRequest,
        class: CacheClass,
        strategy: CacheStrategy,
    ) -> Result<HttpResponse> {
        if let Some(cached) = self.read_cached(&request.url).await {
            if request.method == HttpMethod::Get {
                self.spawn_refresh(request, class, strategy);
            }
            return Ok(cached);
        }

        let url = request.url.clone();
        let writable = request.method == HttpMethod::Get;
        let response = self.fetch(request).await?;
        if writable && response.is_success() {
            self.store(&url, class, strategy, &response).await;
        }
        Ok(response)
    }

    /// Refresh a stored copy in the background; at most one refresh per URL.
    fn spawn_refresh(&self, request: HttpRequest, class: CacheClass, strategy: CacheStrategy) {
        if !self.refreshing.lock().insert(request.url.clone()) {
            debug!("Refresh already in flight");
            return;
        }

        let guard = RefreshGuard {
            refreshing: self.refreshing.clone(),
            url: request.url.clone(),
        };
        let manager = self.clone();
        let generation = self.invalidations.load(Ordering::SeqCst);

        tokio::spawn(async move {
            let _guard = guard;
            let url = request.url.clone();
            match manager.fetch(request).await {
                Ok(response) if response.is_success() => {
                    if manager
                        .store_since(&url, class, strategy, &response, Some(generation))
                        .await
                    {
                        debug!(url = %strip_query(&url), "Background refresh stored");
                    }
                }
                Ok(response) => debug!(
                    url = %strip_query(&url),
                    status = response.status,
                    "Background refresh not stored"
                ),
                Err(e) => debug!(url = %strip_query(&url), error = %e, "Background refresh failed"),
            }
        });
    }

    async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.http_client
            .execute(request)
            .await
            .map_err(|e| CacheError::Network(e.to_string()))
    }

    /// Stored copy of `url`, recording the hit. Storage errors count as a miss.
    async fn read_cached(&self, url: &str) -> Option<HttpResponse> {
        let entry = self.index.get(url)?;
        let container = self.config.container_name(entry.class);

        match self.storage.get(&container, url).await {
            Ok(Some(cached)) => {
                self.index.record_hit(url, self.clock.now());
                debug!(class = %entry.class, hits = entry.access_count + 1, "Cache hit");
                Some(cached.to_response())
            }
            Ok(None) => {
                let _gate = self.write_gate.lock().await;
                // A write may have landed while waiting for the gate
                if let Ok(None) = self.storage.get(&container, url).await {
                    warn!(
                        container = %container,
                        "Index entry without stored payload, dropping it"
                    );
                    self.index.remove(url);
                }
                None
            }
            Err(e) => {
                warn!(container = %container, error = %e, "Cache read failed, treating as miss");
                None
            }
        }
    }

    /// Write a response into its class container, then trim the class.
    async fn store(
        &self,
        url: &str,
        class: CacheClass,
        strategy: CacheStrategy,
        response: &HttpResponse,
    ) -> bool {
        self.store_since(url, class, strategy, response, None).await
    }

    /// Like [`Self::store`], but skipped when an invalidation has run since
    /// `generation` was read.
    async fn store_since(
        &self,
        url: &str,
        class: CacheClass,
        strategy: CacheStrategy,
        response: &HttpResponse,
        generation: Option<u64>,
    ) -> bool {
        let now = self.clock.now();
        let cached = CachedResponse::from_response(url, response, now);
        let container = self.config.container_name(class);

        {
            let gate = self.write_gate.lock().await;
            if generation.is_some_and(|g| g != self.invalidations.load(Ordering::SeqCst)) {
                debug!(url = %strip_query(url), "Write discarded after invalidation");
                return false;
            }
            if let Err(e) = self.storage.put(&container, url, &cached).await {
                warn!(
                    container = %container,
                    url = %strip_query(url),
                    error = %e,
                    "Cache write failed, response served uncached"
                );
                drop(gate);
                if matches!(e, bridge_traits::BridgeError::QuotaExceeded(_)) {
                    self.evict_class(class).await;
                }
                return false;
            }
            self.index
                .upsert(CacheEntry::new(url, class, strategy, cached.size(), now));
        }

        debug!(class = %class, bytes = cached.size(), "Response cached");
        self.evict_class(class).await;
        true
    }

    // ========================================================================
    // Eviction
    // ========================================================================

    /// Bring one class back under its budget, least recently used first.
    ///
    /// An entry whose payload cannot be deleted stays indexed.
    #[instrument(skip(self))]
    pub async fn evict_class(&self, class: CacheClass) -> EvictionReport {
        let gate = self.write_gate.lock().await;

        let plan = plan_eviction(
            self.index.entries_for(class),
            self.config.budget_for(class),
            &self.config,
        );
        let mut report = EvictionReport::empty(class);
        if plan.victims.is_empty() {
            return report;
        }

        let container = self.config.container_name(class);
        for victim in plan.victims {
            match self.storage.delete(&container, &victim.url).await {
                Ok(_) => {
                    self.index.remove(&victim.url);
                    report.entries_removed += 1;
                    report.bytes_freed += victim.size;
                }
                Err(e) => warn!(
                    url = %strip_query(&victim.url),
                    error = %e,
                    "Failed to evict entry, keeping it"
                ),
            }
        }
        drop(gate);

        if report.entries_removed > 0 {
            info!(
                entries_removed = report.entries_removed,
                bytes_freed = report.bytes_freed,
                target_size = plan.target_size,
                "Evicted cache entries"
            );
            self.emit(CacheEvent::Evicted {
                class: class.to_string(),
                entries_removed: report.entries_removed,
                bytes_freed: report.bytes_freed,
            });
        }
        report
    }

    /// Run an eviction pass over every class.
    pub async fn run_eviction_pass(&self) -> Vec<EvictionReport> {
        let mut reports = Vec::with_capacity(CacheClass::ALL.len());
        for class in CacheClass::ALL {
            reports.push(self.evict_class(class).await);
        }
        reports
    }

    /// Start the periodic eviction scan. No-op if it is already running.
    pub fn start_eviction_scheduler(&self) {
        let mut scheduler = self.scheduler.lock();
        if scheduler.is_some() {
            return;
        }

        let token = CancellationToken::new();
        let manager = self.clone();
        let cancel = token.clone();
        let period = self.config.eviction_interval;

        let handle = tokio::spawn(async move {
            manager.eviction_loop(period, cancel).await;
        });

        info!(interval_secs = period.as_secs(), "Eviction scheduler started");
        *scheduler = Some(EvictionScheduler { token, handle });
    }

    /// Stop the periodic eviction scan and wait for it to finish.
    pub async fn stop_eviction_scheduler(&self) {
        let scheduler = self.scheduler.lock().take();
        if let Some(EvictionScheduler { token, handle }) = scheduler {
            token.cancel();
            if let Err(e) = handle.await {
                warn!(error = %e, "Eviction scheduler task failed");
            }
            info!("Eviction scheduler stopped");
        }
    }

    pub fn is_eviction_scheduler_running(&self) -> bool {
        self.scheduler.lock().is_some()
    }

    async fn eviction_loop(&self, period: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let freed: u64 = self
                        .run_eviction_pass()
                        .await
                        .iter()
                        .map(|report| report.bytes_freed)
                        .sum();
                    debug!(bytes_freed = freed, "Scheduled eviction pass finished");
                }
            }
        }
    }

    // ========================================================================
    // Invalidation
    // ========================================================================

    /// Drop one class container, or all of them.
    #[instrument(skip(self))]
    pub async fn invalidate_by_type(&self, scope: InvalidationScope) -> Result<usize> {
        let gate = self.write_gate.lock().await;
        self.invalidations.fetch_add(1, Ordering::SeqCst);

        let mut removed = 0;
        for class in scope.classes() {
            let container = self.config.container_name(class);
            self.storage
                .delete_container(&container)
                .await
                .map_err(|e| {
                    CacheError::Storage(format!("Failed to delete {}: {}", container, e))
                })?;
            removed += self.index.remove_class(class);
        }
        drop(gate);

        info!(scope = %scope, removed, "Cache invalidated");
        self.emit(CacheEvent::Invalidated {
            scope: scope.to_string(),
            entries_removed: removed,
        });
        Ok(removed)
    }

    /// Drop every entry, in any class, whose URL matches `pattern`.
    #[instrument(skip(self), fields(pattern = %pattern))]
    pub async fn invalidate_by_url(&self, pattern: &UrlPattern) -> Result<usize> {
        let gate = self.write_gate.lock().await;
        self.invalidations.fetch_add(1, Ordering::SeqCst);

        let mut removed = 0;
        for class in CacheClass::ALL {
            let container = self.config.container_name(class);

            let mut urls: BTreeSet<String> = self
                .index
                .entries_for(class)
                .into_iter()
                .map(|entry| entry.url)
                .filter(|url| pattern.matches(url))
                .collect();
            match self.storage.keys(&container).await {
                Ok(keys) => urls.extend(keys.into_iter().filter(|key| pattern.matches(key))),
                Err(e) => warn!(
                    container = %container,
                    error = %e,
                    "Failed to list container keys"
                ),
            }

            for url in urls {
                match self.storage.delete(&container, &url).await {
                    Ok(existed) => {
                        let indexed = self.index.get(&url).is_some_and(|e| e.class == class)
                            && self.index.remove(&url).is_some();
                        if existed || indexed {
                            removed += 1;
                        }
                    }
                    Err(e) => warn!(
                        url = %strip_query(&url),
                        error = %e,
                        "Failed to invalidate entry"
                    ),
                }
            }
        }
        drop(gate);

        info!(removed, "Cache invalidated by URL");
        self.emit(CacheEvent::Invalidated {
            scope: pattern.to_string(),
            entries_removed: removed,
        });
        Ok(removed)
    }

    /// Drop the entries of a resource collection, or of one resource in it.
    pub async fn invalidate_by_resource(&self, resource: &str, id: Option<&str>) -> Result<usize> {
        self.invalidate_by_url(&UrlPattern::resource(resource, id))
            .await
    }

    /// Drop entries older than their strategy's maximum age.
    #[instrument(skip(self))]
    pub async fn invalidate_expired(&self) -> Result<usize> {
        let now = self.clock.now();
        let gate = self.write_gate.lock().await;
        self.invalidations.fetch_add(1, Ordering::SeqCst);

        let expired: Vec<CacheEntry> = self
            .index
            .all()
            .into_iter()
            .filter(|entry| entry.is_older_than(self.max_age_for(entry.strategy), now))
            .collect();

        let mut removed = 0;
        for entry in expired {
            let container = self.config.container_name(entry.class);
            match self.storage.delete(&container, &entry.url).await {
                Ok(_) => {
                    self.index.remove(&entry.url);
                    removed += 1;
                }
                Err(e) => warn!(
                    url = %strip_query(&entry.url),
                    error = %e,
                    "Failed to drop expired entry"
                ),
            }
        }
        drop(gate);

        if removed > 0 {
            info!(removed, "Expired cache entries dropped");
            self.emit(CacheEvent::Invalidated {
                scope: "expired".to_string(),
                entries_removed: removed,
            });
        }
        Ok(removed)
    }

    fn max_age_for(&self, strategy: CacheStrategy) -> Duration {
        match strategy {
            CacheStrategy::CacheFirst => self.config.cache_first_max_age,
            _ => self.config.default_max_age,
        }
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    pub fn get_cache_stats(&self, class: CacheClass) -> CacheStats {
        CacheStats::from_entries(class, &self.index.entries_for(class))
    }

    /// Statistics for every class, in [`CacheClass::ALL`] order.
    pub fn get_all_stats(&self) -> Vec<CacheStats> {
        CacheClass::ALL
            .into_iter()
            .map(|class| self.get_cache_stats(class))
            .collect()
    }

    fn emit(&self, event: CacheEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::Cache(event)).ok();
        }
    }
}
