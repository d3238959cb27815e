//! # Host Bridge Traits
//!
//! Capability contracts the offline core requires from its host.
//!
//! ## Overview
//!
//! The cache manager and the sync queue never talk to the network or to
//! persistent containers directly. Each capability is a trait the host
//! implements once per platform:
//!
//! ### Networking
//! - [`HttpClient`](http::HttpClient) - Single-attempt async HTTP execution
//! - [`NetworkMonitor`](network::NetworkMonitor) - Connectivity and change notifications
//!
//! ### Storage
//! - [`CacheStorage`](storage::CacheStorage) - Named response containers
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Platform Requirements
//!
//! | Platform | Implementation Crate |
//! |----------|---------------------|
//! | Desktop  | `bridge-desktop`    |
//! | Web      | host-provided       |
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type. Platform
//! implementations should:
//!
//! - Report transport failures as `BridgeError::Network`
//! - Report exhausted storage as `BridgeError::QuotaExceeded`
//! - Include context (URL, container name) in messages
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so a single implementation can be
//! shared by the cache manager, its background refresh tasks and the sync queue.

pub mod error;
pub mod http;
pub mod network;
pub mod storage;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
pub use network::{NetworkChangeStream, NetworkInfo, NetworkMonitor, NetworkStatus, NetworkType};
pub use storage::{CacheStorage, CachedResponse};
pub use time::{Clock, LogEntry, LogLevel, LoggerSink, SystemClock};
