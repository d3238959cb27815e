#![allow(dead_code)]

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    CacheStorage, CachedResponse, Clock, HttpClient, HttpRequest, HttpResponse,
};
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use core_cache::{CacheConfig, CacheManager};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

// ============================================================================
// Storage
// ============================================================================

/// `CacheStorage` over nested maps, with switches to make operations fail.
#[derive(Default)]
pub struct MemoryCacheStorage {
    containers: Mutex<BTreeMap<String, BTreeMap<String, CachedResponse>>>,
    pub fail_puts: AtomicBool,
    pub fail_gets: AtomicBool,
    pub fail_deletes: AtomicBool,
    pub quota_exceeded: AtomicBool,
}

impl MemoryCacheStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn body(&self, container: &str, key: &str) -> Option<String> {
        self.containers
            .lock()
            .get(container)
            .and_then(|entries| entries.get(key))
            .map(|cached| String::from_utf8_lossy(&cached.body).into_owned())
    }

    pub fn contains(&self, container: &str, key: &str) -> bool {
        self.body(container, key).is_some()
    }

    pub fn len(&self, container: &str) -> usize {
        self.containers
            .lock()
            .get(container)
            .map_or(0, |entries| entries.len())
    }

    /// Write directly, bypassing any manager.
    pub fn seed(&self, container: &str, url: &str, body: &str, cached_at: DateTime<Utc>) {
        let response = HttpResponse::new(200, body.to_string());
        self.containers
            .lock()
            .entry(container.to_string())
            .or_default()
            .insert(
                url.to_string(),
                CachedResponse::from_response(url, &response, cached_at),
            );
    }

    fn check(flag: &AtomicBool, op: &str) -> Result<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(BridgeError::OperationFailed(format!("{} failed", op)));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn put(&self, container: &str, key: &str, response: &CachedResponse) -> Result<()> {
        if self.quota_exceeded.load(Ordering::SeqCst) {
            return Err(BridgeError::QuotaExceeded("memory full".to_string()));
        }
        Self::check(&self.fail_puts, "put")?;
        self.containers
            .lock()
            .entry(container.to_string())
            .or_default()
            .insert(key.to_string(), response.clone());
        Ok(())
    }

    async fn get(&self, container: &str, key: &str) -> Result<Option<CachedResponse>> {
        Self::check(&self.fail_gets, "get")?;
        Ok(self
            .containers
            .lock()
            .get(container)
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    async fn delete(&self, container: &str, key: &str) -> Result<bool> {
        Self::check(&self.fail_deletes, "delete")?;
        Ok(self
            .containers
            .lock()
            .get_mut(container)
            .is_some_and(|entries| entries.remove(key).is_some()))
    }

    async fn keys(&self, container: &str) -> Result<Vec<String>> {
        Ok(self
            .containers
            .lock()
            .get(container)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete_container(&self, container: &str) -> Result<bool> {
        Self::check(&self.fail_deletes, "delete_container")?;
        Ok(self.containers.lock().remove(container).is_some())
    }

    async fn container_names(&self) -> Result<Vec<String>> {
        Ok(self.containers.lock().keys().cloned().collect())
    }
}

// ============================================================================
// Clock
// ============================================================================

pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()),
        })
    }

    pub fn advance(&self, by: ChronoDuration) {
        *self.now.lock() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

// ============================================================================
// Network
// ============================================================================

/// HTTP client answering every request with one configurable response.
///
/// `hold()` parks requests until `release()`, to observe work in flight.
pub struct FakeHttpClient {
    response: Mutex<Option<(u16, String)>>,
    calls: AtomicUsize,
    held: watch::Sender<bool>,
}

impl FakeHttpClient {
    pub fn new() -> Arc<Self> {
        let (held, _) = watch::channel(false);
        Arc::new(Self {
            response: Mutex::new(Some((200, String::new()))),
            calls: AtomicUsize::new(0),
            held,
        })
    }

    pub fn respond(&self, status: u16, body: &str) {
        *self.response.lock() = Some((status, body.to_string()));
    }

    pub fn go_offline(&self) {
        *self.response.lock() = None;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn hold(&self) {
        self.held.send_replace(true);
    }

    pub fn release(&self) {
        self.held.send_replace(false);
    }
}

#[async_trait]
impl HttpClient for FakeHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let mut held = self.held.subscribe();
        held.wait_for(|held| !*held)
            .await
            .map_err(|e| BridgeError::OperationFailed(e.to_string()))?;

        match self.response.lock().clone() {
            Some((status, body)) => Ok(HttpResponse::new(status, body)),
            None => Err(BridgeError::Network(format!(
                "connection refused: {}",
                request.url
            ))),
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

pub fn manager(
    config: CacheConfig,
    storage: Arc<MemoryCacheStorage>,
    http: Arc<dyn HttpClient>,
    clock: Arc<ManualClock>,
) -> CacheManager {
    CacheManager::new(config, storage, http, clock).unwrap()
}

pub fn body_of(response: &HttpResponse) -> String {
    response.text().unwrap()
}

/// Wait until no stale-while-revalidate refresh is running.
pub async fn settle(manager: &CacheManager) {
    for _ in 0..1000 {
        if manager.refreshes_in_flight() == 0 {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(1)).await;
    }
    panic!("background refresh did not finish");
}
