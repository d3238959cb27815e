//! # Event Bus System
//!
//! Provides an event-driven notification channel for the offline core using
//! `tokio::sync::broadcast`. The cache manager and the sync queue publish typed
//! events here; the host application subscribes to learn about evictions,
//! invalidations and, most importantly, writes that were permanently abandoned.
//!
//! ## Overview
//!
//! [`CoreEvent`] wraps one enum per component. [`EventBus`] is the cloneable
//! sender handed to both components; [`EventStream`] is a filtering
//! subscriber.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐    emit     ┌───────────┐
//! │ Cache Manager ├────────────>│           │     subscribe    ┌────────────┐
//! └───────────────┘             │ EventBus  ├─────────────────>│ Subscriber │
//!                               │ (broadcast│                  └────────────┘
//! ┌───────────────┐    emit     │  channel) │     subscribe    ┌────────────┐
//! │  Sync Queue   ├────────────>│           ├─────────────────>│ Subscriber │
//! └───────────────┘             └───────────┘                  └────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CacheEvent, CoreEvent, EventBus};
//!
//! let bus = EventBus::new(64);
//! let event = CoreEvent::Cache(CacheEvent::Evicted {
//!     class: "IMAGES".to_string(),
//!     entries_removed: 12,
//!     bytes_freed: 4_194_304,
//! });
//!
//! bus.emit(event).ok();
//! ```
//!
//! ### Watching for abandoned writes
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(64);
//! let mut failures = bus.stream().filter(|event| {
//!     matches!(event, CoreEvent::Sync(SyncEvent::OperationAbandoned { .. }))
//! });
//!
//! let watcher = tokio::spawn(async move {
//!     while let Ok(event) = failures.recv().await {
//!         eprintln!("write dropped: {:?}", event);
//!     }
//! });
//! # drop(bus);
//! # watcher.await.ok();
//! # }
//! ```
//!
//! ## Receiving
//!
//! `RecvError::Lagged(n)` means `n` events were skipped and the subscriber can
//! keep reading. `RecvError::Closed` means every bus handle is gone.
//!
//! Publishers ignore the "no subscribers" error: events are notifications, never
//! part of the control flow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tokio::sync::broadcast;

use tokio::sync::broadcast::error::TryRecvError;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Per-subscriber buffer used by `EventBus::default()` and `CoreConfig`.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Response cache events
    Cache(CacheEvent),
    /// Write queue events
    Sync(SyncEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Cache(e) => e.description(),
            CoreEvent::Sync(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Sync(SyncEvent::OperationAbandoned { .. }) => EventSeverity::Error,
            CoreEvent::Sync(SyncEvent::RetryScheduled { .. }) => EventSeverity::Warning,
            CoreEvent::Cache(CacheEvent::Evicted { .. }) => EventSeverity::Info,
            CoreEvent::Cache(CacheEvent::Invalidated { .. }) => EventSeverity::Info,
            CoreEvent::Sync(SyncEvent::DrainCompleted { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    /// Debug-level events (verbose)
    Debug,
    /// Informational events
    Info,
    /// Warning events
    Warning,
    /// Error events
    Error,
}

// ============================================================================
// Cache Events
// ============================================================================

/// Events published by the response cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum CacheEvent {
    /// Least-recently-used entries were dropped to bring a class under budget.
    Evicted {
        /// Traffic class whose container was trimmed (e.g. "IMAGES").
        class: String,
        /// Number of entries removed.
        entries_removed: usize,
        /// Payload bytes released.
        bytes_freed: u64,
    },
    /// Entries were removed by an explicit invalidation.
    Invalidated {
        /// What was invalidated (class name, URL pattern, resource path, "expired").
        scope: String,
        /// Number of entries removed.
        entries_removed: usize,
    },
    /// Containers left behind by an older cache namespace were deleted.
    StaleContainersPurged {
        /// Names of the deleted containers.
        containers: Vec<String>,
    },
}

impl CacheEvent {
    fn description(&self) -> &str {
        match self {
            CacheEvent::Evicted { .. } => "Cache entries evicted",
            CacheEvent::Invalidated { .. } => "Cache entries invalidated",
            CacheEvent::StaleContainersPurged { .. } => "Stale cache containers purged",
        }
    }
}

// ============================================================================
// Sync Events
// ============================================================================

/// Snapshot of a queued write at the moment it was given up on.
///
/// Carries everything the host needs to surface the failure or re-submit the
/// request by hand.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AbandonedOperation {
    /// Operation identifier assigned at registration.
    pub id: String,
    /// HTTP method, upper case.
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Vec<u8>>,
    /// Registration time.
    pub timestamp: DateTime<Utc>,
    /// Failed attempts, equal to `max_retries` when abandoned.
    pub retry_count: u32,
    pub max_retries: u32,
}

/// Events published by the durable write queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    /// A write was persisted and is waiting to be sent.
    OperationQueued {
        operation_id: String,
        method: String,
        url: String,
    },
    /// A queued write was accepted by the server and removed from the queue.
    OperationSucceeded {
        operation_id: String,
        /// HTTP status returned by the server.
        status: u16,
    },
    /// A write failed and will be retried after a backoff delay.
    RetryScheduled {
        operation_id: String,
        /// Failed attempts so far.
        retry_count: u32,
        /// Delay before the next attempt (milliseconds).
        delay_ms: u64,
        /// Why the last attempt failed.
        error: String,
    },
    /// A write exhausted its retries and was removed from the queue.
    OperationAbandoned {
        operation: AbandonedOperation,
        /// Why the last attempt failed.
        error: String,
    },
    /// A drain pass finished.
    DrainCompleted {
        /// What requested the pass (e.g. "connectivity").
        trigger: String,
        succeeded: usize,
        abandoned: usize,
        /// Operations still pending after the pass.
        remaining: usize,
    },
}

impl SyncEvent {
    fn description(&self) -> &str {
        match self {
            SyncEvent::OperationQueued { .. } => "Write queued",
            SyncEvent::OperationSucceeded { .. } => "Queued write delivered",
            SyncEvent::RetryScheduled { .. } => "Queued write retry scheduled",
            SyncEvent::OperationAbandoned { .. } => "Queued write abandoned",
            SyncEvent::DrainCompleted { .. } => "Write queue drain completed",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Cloneable publish/subscribe handle shared by the cache and the queue.
///
/// Every subscriber gets its own copy of each event published after it
/// subscribed. A subscriber more than `capacity` events behind sees
/// `RecvError::Lagged` once and then continues with the newest events.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to every current subscriber.
    ///
    /// Fails only when nobody is subscribed; publishers call `.ok()` on the
    /// result.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Subscribe through an [`EventStream`].
    pub fn stream(&self) -> EventStream {
        EventStream::new(self.subscribe())
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

// ============================================================================
// Event Stream
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// Subscriber that only yields events passing all of its filters.
///
/// ```rust
/// use core_runtime::events::{EventBus, EventSeverity};
///
/// let bus = EventBus::default();
/// // Retries and abandoned writes only
/// let problems = bus.stream().min_severity(EventSeverity::Warning);
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filters: Vec<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filters: Vec::new(),
        }
    }

    /// Keep only events matching `predicate`, in addition to earlier filters.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filters.push(Box::new(predicate));
        self
    }

    /// Keep only events at or above `severity`.
    pub fn min_severity(self, severity: EventSeverity) -> Self {
        self.filter(move |event| event.severity() >= severity)
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filters.iter().all(|filter| filter(event))
    }

    /// Next accepted event. Lag and closure are reported as in
    /// `broadcast::Receiver::recv`.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Next accepted event already buffered, or `None`.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            let event = match self.receiver.try_recv() {
                Ok(event) => event,
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Lagged(missed)) => return Some(Err(RecvError::Lagged(missed))),
                Err(TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            };
            if self.accepts(&event) {
                return Some(Ok(event));
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("filters", &self.filters.len())
            .finish()
    }
}
