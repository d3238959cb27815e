#![allow(dead_code)]

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result as BridgeResult},
    HttpClient, HttpRequest, HttpResponse, NetworkChangeStream, NetworkInfo, NetworkMonitor,
    NetworkType, SystemClock,
};
use chrono::{DateTime, Utc};
use core_runtime::events::{CoreEvent, EventBus, Receiver, SyncEvent};
use core_sync::{
    Result, SyncConfig, SyncError, SyncOperation, SyncOperationId, SyncOperationStore, SyncQueue,
    SyncRequest,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

// ============================================================================
// Store
// ============================================================================

#[derive(Default)]
pub struct MemorySyncOperationStore {
    operations: Mutex<Vec<SyncOperation>>,
    pub fail_puts: AtomicBool,
    pub fail_updates: AtomicBool,
    pub fail_deletes: AtomicBool,
}

impl MemorySyncOperationStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn snapshot(&self) -> Vec<SyncOperation> {
        self.operations.lock().clone()
    }
}

#[async_trait]
impl SyncOperationStore for MemorySyncOperationStore {
    async fn put(&self, operation: &SyncOperation) -> Result<()> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(SyncError::Storage("disk full".to_string()));
        }
        self.operations.lock().push(operation.clone());
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<SyncOperation>> {
        Ok(self.operations.lock().clone())
    }

    async fn delete(&self, id: SyncOperationId) -> Result<bool> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(SyncError::Storage("database is locked".to_string()));
        }
        let mut operations = self.operations.lock();
        let before = operations.len();
        operations.retain(|operation| operation.id != id);
        Ok(operations.len() < before)
    }

    async fn update(&self, operation: &SyncOperation) -> Result<()> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(SyncError::Storage("quota exceeded".to_string()));
        }
        if let Some(stored) = self
            .operations
            .lock()
            .iter_mut()
            .find(|stored| stored.id == operation.id)
        {
            stored.retry_count = operation.retry_count;
        }
        Ok(())
    }

    async fn clear(&self) -> Result<u64> {
        let mut operations = self.operations.lock();
        let removed = operations.len() as u64;
        operations.clear();
        Ok(removed)
    }
}

// ============================================================================
// Network
// ============================================================================

/// HTTP client that records every attempt.
///
/// Everything succeeds with 201 unless the URL was marked failing (503) or
/// the client is offline (transport error).
pub struct RecordingHttpClient {
    failing: Mutex<HashSet<String>>,
    offline: AtomicBool,
    attempts: Mutex<Vec<(String, Instant)>>,
    held: watch::Sender<bool>,
}

impl RecordingHttpClient {
    pub fn new() -> Arc<Self> {
        let (held, _) = watch::channel(false);
        Arc::new(Self {
            failing: Mutex::new(HashSet::new()),
            offline: AtomicBool::new(false),
            attempts: Mutex::new(Vec::new()),
            held,
        })
    }

    pub fn fail(&self, url: &str) {
        self.failing.lock().insert(url.to_string());
    }

    pub fn recover(&self, url: &str) {
        self.failing.lock().remove(url);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn hold(&self) {
        self.held.send_replace(true);
    }

    pub fn release(&self) {
        self.held.send_replace(false);
    }

    /// URLs in the order they were attempted.
    pub fn attempts(&self) -> Vec<String> {
        self.attempts
            .lock()
            .iter()
            .map(|(url, _)| url.clone())
            .collect()
    }

    pub fn attempt_times(&self, url: &str) -> Vec<Instant> {
        self.attempts
            .lock()
            .iter()
            .filter(|(attempted, _)| attempted == url)
            .map(|(_, at)| *at)
            .collect()
    }
}

#[async_trait]
impl HttpClient for RecordingHttpClient {
    async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
        let mut held = self.held.subscribe();
        held.wait_for(|held| !*held)
            .await
            .map_err(|e| BridgeError::OperationFailed(e.to_string()))?;

        self.attempts
            .lock()
            .push((request.url.clone(), Instant::now()));

        if self.offline.load(Ordering::SeqCst) {
            return Err(BridgeError::Network("connection refused".to_string()));
        }
        if self.failing.lock().contains(&request.url) {
            return Ok(HttpResponse::new(503, "unavailable"));
        }
        Ok(HttpResponse::new(201, "{}"))
    }
}

/// Network monitor driven by the test.
pub struct FakeNetworkMonitor {
    connected: AtomicBool,
    sender: mpsc::UnboundedSender<NetworkInfo>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<NetworkInfo>>>,
}

impl FakeNetworkMonitor {
    pub fn new(connected: bool) -> Arc<Self> {
        let (sender, receiver) = mpsc::unbounded_channel();
        Arc::new(Self {
            connected: AtomicBool::new(connected),
            sender,
            receiver: Mutex::new(Some(receiver)),
        })
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
        let _ = self.sender.send(info(connected));
    }
}

fn info(connected: bool) -> NetworkInfo {
    if connected {
        NetworkInfo::connected(NetworkType::WiFi)
    } else {
        NetworkInfo::disconnected()
    }
}

#[async_trait]
impl NetworkMonitor for FakeNetworkMonitor {
    async fn get_network_info(&self) -> BridgeResult<NetworkInfo> {
        Ok(info(self.connected.load(Ordering::SeqCst)))
    }

    async fn subscribe_changes(&self) -> BridgeResult<Box<dyn NetworkChangeStream>> {
        let receiver = self
            .receiver
            .lock()
            .take()
            .ok_or_else(|| BridgeError::NotAvailable("already subscribed".to_string()))?;
        Ok(Box::new(ChannelChangeStream { receiver }))
    }
}

struct ChannelChangeStream {
    receiver: mpsc::UnboundedReceiver<NetworkInfo>,
}

#[async_trait]
impl NetworkChangeStream for ChannelChangeStream {
    async fn next(&mut self) -> Option<NetworkInfo> {
        self.receiver.recv().await
    }
}

// ============================================================================
// Helpers
// ============================================================================

pub fn queue(
    config: SyncConfig,
    store: Arc<dyn SyncOperationStore>,
    http: Arc<RecordingHttpClient>,
) -> SyncQueue {
    SyncQueue::new(config, store, http, Arc::new(SystemClock)).unwrap()
}

pub fn operation(url: &str, timestamp: DateTime<Utc>, max_retries: u32) -> SyncOperation {
    SyncOperation::new(SyncRequest::post(url).body("{}"), timestamp, max_retries)
}

/// Wait for the background drain passes to finish.
pub async fn wait_idle(queue: &SyncQueue) {
    for _ in 0..1000 {
        if !queue.is_draining() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("drain did not finish");
}

/// Next sync event matching `predicate`, skipping others.
pub async fn next_sync_event<F>(events: &mut Receiver<CoreEvent>, predicate: F) -> SyncEvent
where
    F: Fn(&SyncEvent) -> bool,
{
    loop {
        match events.recv().await {
            Ok(CoreEvent::Sync(event)) if predicate(&event) => return event,
            Ok(_) => continue,
            Err(e) => panic!("event stream failed: {}", e),
        }
    }
}

pub fn bus() -> EventBus {
    EventBus::new(64)
}
