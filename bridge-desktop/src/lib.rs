//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `HttpClient` using `reqwest` (one attempt per call, no hidden retries)
//! - `CacheStorage` using `tokio::fs`, one directory per container
//! - `NetworkMonitor` using TCP reachability polling
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{DesktopNetworkMonitor, FsCacheStorage, ReqwestHttpClient};
//!
//! #[tokio::main]
//! async fn main() -> bridge_traits::error::Result<()> {
//!     let http_client = ReqwestHttpClient::new()?;
//!     let storage = FsCacheStorage::new("/var/cache/app");
//!     let monitor = DesktopNetworkMonitor::new();
//!
//!     // Hand these to the core configuration
//!     Ok(())
//! }
//! ```

mod cache_storage;
mod http;
mod network;

pub use cache_storage::FsCacheStorage;
pub use http::ReqwestHttpClient;
pub use network::DesktopNetworkMonitor;
