//! # Durable Write Queue
//!
//! Delivers writes that must survive offline periods and restarts.
//!
//! ## Overview
//!
//! [`SyncQueue::register`] persists a request and returns once it is stored.
//! Delivery happens in drain passes that replay pending operations oldest
//! first:
//!
//! - **2xx**: the operation is removed
//! - **failure** (transport error or non-2xx): `retry_count` is bumped and
//!   the pass stops; a retry timer re-enters the drain after
//!   `2^(retry_count - 1) × base_delay`
//! - **retries spent**: the operation is removed and
//!   `SyncEvent::OperationAbandoned` is published; the pass moves on
//!
//! A failing operation blocks everything registered after it, so writes are
//! delivered in registration order or not at all.
//!
//! ## Drain triggers
//!
//! Registration, the retry timer, connectivity coming back, queue start-up
//! and explicit requests all go through [`SyncQueue::request_drain`]. Only
//! one pass runs at a time; requests arriving meanwhile collapse into a
//! single follow-up pass. When a `NetworkMonitor` is configured and reports
//! no connectivity, passes are skipped without spending retries. A
//! registration arriving while the head operation waits out its backoff
//! leaves the next pass to the retry timer.
//!
//! ## Store failures
//!
//! A store that refuses to record progress does not stall the queue. A
//! retry count it could not save is tracked in memory, so backoff and
//! abandonment proceed as usual; an operation it could not remove after
//! delivery is not sent again, and its removal is retried on the next pass.
//!
//! ## Usage
//!
//! ```ignore
//! use core_sync::{SyncConfig, SyncQueue, SyncRequest, SqliteSyncOperationStore};
//!
//! let store = Arc::new(SqliteSyncOperationStore::open("offline.db").await?);
//! let queue = SyncQueue::new(SyncConfig::default(), store, http_client, clock)?
//!     .with_network_monitor(monitor)
//!     .with_event_bus(event_bus);
//!
//! queue.start().await?;
//! let id = queue.register(SyncRequest::post("/api/posts").json(&draft)?).await?;
//! ```

use bridge_traits::{Clock, HttpClient, NetworkMonitor};
use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
use core_runtime::logging::strip_query;
use parking_lot::Mutex as SyncMutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::operation::{SyncOperation, SyncOperationId, SyncRequest};
use crate::store::SyncOperationStore;

/// What requested a drain pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DrainTrigger {
    Registration,
    RetryTimer,
    Connectivity,
    Startup,
    Manual,
}

impl DrainTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            DrainTrigger::Registration => "registration",
            DrainTrigger::RetryTimer => "retry-timer",
            DrainTrigger::Connectivity => "connectivity",
            DrainTrigger::Startup => "startup",
            DrainTrigger::Manual => "manual",
        }
    }
}

impl fmt::Display for DrainTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a drain pass did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainSkip {
    /// The network monitor reports no connectivity
    Offline,
    /// The head of the queue is waiting out its backoff delay
    Backoff,
}

/// Outcome of one drain pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainReport {
    pub trigger: DrainTrigger,
    pub succeeded: usize,
    pub abandoned: usize,
    /// Operations still pending after the pass
    pub remaining: usize,
    /// Operation whose failure stopped the pass, if any
    pub blocked_by: Option<SyncOperationId>,
    pub skipped: Option<DrainSkip>,
}

impl DrainReport {
    fn new(trigger: DrainTrigger) -> Self {
        Self {
            trigger,
            succeeded: 0,
            abandoned: 0,
            remaining: 0,
            blocked_by: None,
            skipped: None,
        }
    }
}

/// A spawned task that can be cancelled.
struct BackgroundTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl BackgroundTask {
    fn spawn<F>(token: CancellationToken, future: F) -> Self
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        Self {
            token,
            handle: tokio::spawn(future),
        }
    }

    fn is_active(&self) -> bool {
        !self.token.is_cancelled() && !self.handle.is_finished()
    }
}

/// Progress the store failed to record.
///
/// Consulted before the stored values so a failing store neither loses
/// retry accounting nor causes a delivered write to be sent again.
#[derive(Default)]
struct UnsavedProgress {
    retry_counts: HashMap<SyncOperationId, u32>,
    /// Delivered or abandoned, but still in the store
    finished: HashSet<SyncOperationId>,
}

impl UnsavedProgress {
    fn apply(&self, pending: Vec<SyncOperation>) -> Vec<SyncOperation> {
        pending
            .into_iter()
            .filter(|operation| !self.finished.contains(&operation.id))
            .map(|mut operation| {
                if let Some(&retry_count) = self.retry_counts.get(&operation.id) {
                    operation.retry_count = retry_count;
                }
                operation
            })
            .collect()
    }
}

#[derive(Default)]
struct DrainState {
    running: bool,
    follow_up: Option<DrainTrigger>,
}

/// Durable, retrying FIFO write queue.
///
/// Cloning is cheap; clones share the store, the drain state and the
/// background tasks.
#[derive(Clone)]
pub struct SyncQueue {
    config: Arc<SyncConfig>,
    store: Arc<dyn SyncOperationStore>,
    http_client: Arc<dyn HttpClient>,
    clock: Arc<dyn Clock>,
    network_monitor: Option<Arc<dyn NetworkMonitor>>,
    event_bus: Option<EventBus>,
    drain_gate: Arc<Mutex<()>>,
    drain_state: Arc<SyncMutex<DrainState>>,
    retry_timer: Arc<SyncMutex<Option<BackgroundTask>>>,
    listener: Arc<SyncMutex<Option<BackgroundTask>>>,
    unsaved: Arc<SyncMutex<UnsavedProgress>>,
}

impl SyncQueue {
    /// Create a queue. Fails if `config` does not validate.
    pub fn new(
        config: SyncConfig,
        store: Arc<dyn SyncOperationStore>,
        http_client: Arc<dyn HttpClient>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            config: Arc::new(config),
            store,
            http_client,
            clock,
            network_monitor: None,
            event_bus: None,
            drain_gate: Arc::new(Mutex::new(())),
            drain_state: Arc::new(SyncMutex::new(DrainState::default())),
            retry_timer: Arc::new(SyncMutex::new(None)),
            listener: Arc::new(SyncMutex::new(None)),
            unsaved: Arc::new(SyncMutex::new(UnsavedProgress::default())),
        })
    }

    /// Defer drains while offline and drain when connectivity returns.
    pub fn with_network_monitor(mut self, monitor: Arc<dyn NetworkMonitor>) -> Self {
        self.network_monitor = Some(monitor);
        self
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Persist a write and request a drain.
    ///
    /// Returns once the operation is stored. If the store rejects it, the
    /// request is sent once right away instead; the id is returned if that
    /// succeeds and [`SyncError::Storage`] otherwise, since nothing will
    /// retry it.
    #[instrument(
        skip(self, request),
        fields(method = %request.method, url = %strip_query(&request.url))
    )]
    pub async fn register(&self, request: SyncRequest) -> Result<SyncOperationId> {
        let operation = SyncOperation::new(request, self.clock.now(), self.config.max_retries);
        let id = operation.id;

        if let Err(store_error) = self.store.put(&operation).await {
            warn!(
                operation_id = %id,
                error = %store_error,
                "Failed to persist operation, sending immediately"
            );

            return match self.attempt(&operation).await {
                Ok(status) => {
                    info!(operation_id = %id, status, "Unpersisted operation delivered");
                    self.emit(SyncEvent::OperationSucceeded {
                        operation_id: id.to_string(),
                        status,
                    });
                    Ok(id)
                }
                Err(attempt_error) => Err(SyncError::Storage(format!(
                    "{}; immediate delivery failed: {}",
                    store_error, attempt_error
                ))),
            };
        }

        info!(operation_id = %id, "Operation queued");
        self.emit(SyncEvent::OperationQueued {
            operation_id: id.to_string(),
            method: operation.method.as_str().to_string(),
            url: operation.url.clone(),
        });

        self.request_drain(DrainTrigger::Registration);
        Ok(id)
    }

    // ========================================================================
    // Draining
    // ========================================================================

    /// Run a drain pass in the background.
    ///
    /// If a pass is already running, one follow-up pass runs after it,
    /// however many requests arrive in the meantime.
    pub fn request_drain(&self, trigger: DrainTrigger) {
        {
            let mut state = self.drain_state.lock();
            if state.running {
                debug!(trigger = %trigger, "Drain already running, coalescing request");
                state.follow_up = Some(trigger);
                return;
            }
            state.running = true;
        }

        let queue = self.clone();
        tokio::spawn(async move {
            queue.drain_loop(trigger).await;
        });
    }

    /// Whether a background drain pass is running or about to.
    pub fn is_draining(&self) -> bool {
        self.drain_state.lock().running
    }

    async fn drain_loop(&self, mut trigger: DrainTrigger) {
        loop {
            if let Err(e) = self.drain(trigger).await {
                error!(trigger = %trigger, error = %e, "Drain pass failed");
            }

            let next = {
                let mut state = self.drain_state.lock();
                match state.follow_up.take() {
                    Some(next) => Some(next),
                    None => {
                        state.running = false;
                        None
                    }
                }
            };

            match next {
                Some(next) => trigger = next,
                None => break,
            }
        }
    }

    /// Replay pending operations oldest first and wait for the pass to end.
    ///
    /// Passes never overlap: a call made while another pass runs waits for
    /// it to finish first.
    #[instrument(skip(self))]
    pub async fn drain(&self, trigger: DrainTrigger) -> Result<DrainReport> {
        let _gate = self.drain_gate.lock().await;
        let mut report = DrainReport::new(trigger);

        self.forget_finished().await;
        let mut pending = match self.store.get_all().await {
            Ok(pending) => self.unsaved.lock().apply(pending),
            Err(e) => {
                warn!(error = %e, "Failed to read pending operations, retrying later");
                self.schedule_retry(self.config.base_delay);
                return Err(e);
            }
        };
        if pending.is_empty() {
            debug!("Nothing to drain");
            return Ok(report);
        }

        // A new registration queues behind the blocked head anyway
        if trigger == DrainTrigger::Registration && self.has_scheduled_retry() {
            debug!(pending = pending.len(), "Retry pending, leaving drain to the timer");
            report.remaining = pending.len();
            report.skipped = Some(DrainSkip::Backoff);
            return Ok(report);
        }

        if let Some(monitor) = &self.network_monitor {
            if !monitor.is_connected().await {
                info!(pending = pending.len(), "Offline, deferring drain");
                report.remaining = pending.len();
                report.skipped = Some(DrainSkip::Offline);
                return Ok(report);
            }
        }

        // Stable: operations registered in the same millisecond keep store order
        pending.sort_by_key(|operation| operation.timestamp);
        let total = pending.len();

        for mut operation in pending {
            match self.attempt(&operation).await {
                Ok(status) => {
                    self.settle(operation.id).await;
                    report.succeeded += 1;
                    debug!(operation_id = %operation.id, status, "Operation delivered");
                    self.emit(SyncEvent::OperationSucceeded {
                        operation_id: operation.id.to_string(),
                        status,
                    });
                }
                Err(failure) => {
                    operation.record_failure();

                    if operation.is_exhausted() {
                        self.settle(operation.id).await;
                        report.abandoned += 1;
                        error!(
                            operation_id = %operation.id,
                            url = %strip_query(&operation.url),
                            retry_count = operation.retry_count,
                            error = %failure,
                            "Operation abandoned after max retries"
                        );
                        self.emit(SyncEvent::OperationAbandoned {
                            operation: operation.to_abandoned(),
                            error: failure,
                        });
                        continue;
                    }

                    self.save_retry_count(&operation).await;
                    let delay = operation.backoff_delay(self.config.base_delay);
                    warn!(
                        operation_id = %operation.id,
                        retry_count = operation.retry_count,
                        max_retries = operation.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %failure,
                        "Operation failed, will retry"
                    );
                    self.emit(SyncEvent::RetryScheduled {
                        operation_id: operation.id.to_string(),
                        retry_count: operation.retry_count,
                        delay_ms: delay.as_millis() as u64,
                        error: failure,
                    });
                    self.schedule_retry(delay);
                    report.blocked_by = Some(operation.id);
                    break;
                }
            }
        }

        report.remaining = total - report.succeeded - report.abandoned;
        info!(
            succeeded = report.succeeded,
            abandoned = report.abandoned,
            remaining = report.remaining,
            "Drain pass finished"
        );
        self.emit(SyncEvent::DrainCompleted {
            trigger: trigger.to_string(),
            succeeded: report.succeeded,
            abandoned: report.abandoned,
            remaining: report.remaining,
        });

        Ok(report)
    }

    /// Remove a delivered or abandoned operation.
    ///
    /// If the store refuses, the id is remembered so the operation is
    /// neither sent again nor reported as pending.
    async fn settle(&self, id: SyncOperationId) {
        self.unsaved.lock().retry_counts.remove(&id);
        if let Err(e) = self.store.delete(id).await {
            warn!(operation_id = %id, error = %e, "Failed to remove finished operation");
            self.unsaved.lock().finished.insert(id);
        }
    }

    /// Persist a bumped `retry_count`, keeping it in memory if the store refuses.
    async fn save_retry_count(&self, operation: &SyncOperation) {
        match self.store.update(operation).await {
            Ok(()) => {
                self.unsaved.lock().retry_counts.remove(&operation.id);
            }
            Err(e) => {
                warn!(
                    operation_id = %operation.id,
                    retry_count = operation.retry_count,
                    error = %e,
                    "Failed to persist retry count, tracking it in memory"
                );
                self.unsaved
                    .lock()
                    .retry_counts
                    .insert(operation.id, operation.retry_count);
            }
        }
    }

    /// Retry removals the store refused earlier.
    async fn forget_finished(&self) {
        let finished: Vec<_> = self.unsaved.lock().finished.iter().copied().collect();
        for id in finished {
            if self.store.delete(id).await.is_ok() {
                self.unsaved.lock().finished.remove(&id);
            }
        }
    }

    /// Send one operation. Ok carries the 2xx status; Err describes the failure.
    async fn attempt(&self, operation: &SyncOperation) -> std::result::Result<u16, String> {
        match self.http_client.execute(operation.to_http_request()).await {
            Ok(response) if response.is_success() => Ok(response.status),
            Ok(response) => Err(format!("HTTP {}", response.status)),
            Err(e) => Err(e.to_string()),
        }
    }

    // ========================================================================
    // Retry timer
    // ========================================================================

    /// Request a drain after `delay`, replacing any timer already set.
    fn schedule_retry(&self, delay: Duration) {
        let token = CancellationToken::new();
        let cancel = token.clone();
        let queue = self.clone();

        let timer = BackgroundTask::spawn(token, async move {
            let fired = tokio::select! {
                _ = cancel.cancelled() => false,
                _ = tokio::time::sleep(delay) => true,
            };
            if fired {
                // No longer a pending retry once the pass is requested
                cancel.cancel();
                queue.request_drain(DrainTrigger::RetryTimer);
            }
        });

        if let Some(previous) = self.retry_timer.lock().replace(timer) {
            previous.token.cancel();
        }
    }

    fn cancel_retry_timer(&self) -> bool {
        match self.retry_timer.lock().take() {
            Some(timer) => {
                let was_active = timer.is_active();
                timer.token.cancel();
                was_active
            }
            None => false,
        }
    }

    /// Whether a retry is waiting on its backoff delay.
    pub fn has_scheduled_retry(&self) -> bool {
        self.retry_timer
            .lock()
            .as_ref()
            .is_some_and(BackgroundTask::is_active)
    }

    // ========================================================================
    // Management
    // ========================================================================

    /// Give every pending operation a fresh retry budget and drain now.
    ///
    /// Returns how many operations had failed attempts reset.
    #[instrument(skip(self))]
    pub async fn retry_failed(&self) -> Result<usize> {
        let reset = {
            let _gate = self.drain_gate.lock().await;
            self.cancel_retry_timer();

            let pending = self.store.get_all().await?;
            let pending = self.unsaved.lock().apply(pending);

            let mut reset = 0;
            for mut operation in pending {
                if operation.retry_count > 0 {
                    operation.retry_count = 0;
                    self.save_retry_count(&operation).await;
                    reset += 1;
                }
            }
            reset
        };

        info!(reset, "Retry counters reset");
        self.request_drain(DrainTrigger::Manual);
        Ok(reset)
    }

    /// Drop every pending operation without sending it.
    #[instrument(skip(self))]
    pub async fn clear_all(&self) -> Result<u64> {
        let _gate = self.drain_gate.lock().await;
        self.cancel_retry_timer();

        let removed = self.store.clear().await?;
        *self.unsaved.lock() = UnsavedProgress::default();
        info!(removed, "Sync queue cleared");
        Ok(removed)
    }

    /// Pending operations in drain order.
    pub async fn pending_operations(&self) -> Result<Vec<SyncOperation>> {
        let pending = self.store.get_all().await?;
        let mut pending = self.unsaved.lock().apply(pending);
        pending.sort_by_key(|operation| operation.timestamp);
        Ok(pending)
    }

    pub async fn pending_count(&self) -> Result<usize> {
        Ok(self.pending_operations().await?.len())
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Drain what a previous run left behind and start following
    /// connectivity changes.
    pub async fn start(&self) -> Result<()> {
        if self.config.drain_on_startup {
            self.request_drain(DrainTrigger::Startup);
        }

        let Some(monitor) = &self.network_monitor else {
            return Ok(());
        };
        if self.listener.lock().as_ref().is_some_and(BackgroundTask::is_active) {
            return Ok(());
        }

        let mut changes = monitor
            .subscribe_changes()
            .await
            .map_err(|e| SyncError::Network(format!("Failed to watch connectivity: {}", e)))?;

        let token = CancellationToken::new();
        let cancel = token.clone();
        let queue = self.clone();

        let listener = BackgroundTask::spawn(token, async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    change = changes.next() => match change {
                        Some(info) if info.is_connected() => {
                            info!("Connectivity restored, draining sync queue");
                            queue.request_drain(DrainTrigger::Connectivity);
                        }
                        Some(info) => debug!(status = ?info.status, "Connectivity lost"),
                        None => {
                            debug!("Connectivity stream closed");
                            break;
                        }
                    },
                }
            }
        });

        if let Some(previous) = self.listener.lock().replace(listener) {
            previous.token.cancel();
        }
        info!("Sync queue started");
        Ok(())
    }

    /// Stop following connectivity and cancel any pending retry timer.
    ///
    /// Operations stay persisted for the next start.
    pub async fn stop(&self) {
        self.cancel_retry_timer();

        let listener = self.listener.lock().take();
        if let Some(BackgroundTask { token, handle }) = listener {
            token.cancel();
            if let Err(e) = handle.await {
                warn!(error = %e, "Connectivity listener failed");
            }
        }
        info!("Sync queue stopped");
    }

    fn emit(&self, event: SyncEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::Sync(event)).ok();
        }
    }
}
