//! # Response Cache
//!
//! Offline-first response caching for GET/HEAD traffic.
//!
//! Requests are classified into four traffic classes, each with its own
//! container, byte budget and serving strategy:
//!
//! | Class     | Strategy               | Default budget |
//! |-----------|------------------------|----------------|
//! | `STATIC`  | cache-first            | 50 MiB         |
//! | `DYNAMIC` | network-first          | 25 MiB         |
//! | `IMAGES`  | stale-while-revalidate | 100 MiB        |
//! | `API`     | network-first          | 10 MiB         |
//!
//! [`CacheManager`] is the entry point; everything else in this crate is
//! the policy it is built from and can be used on its own.

pub mod classify;
pub mod config;
pub mod entry;
pub mod error;
pub mod eviction;
pub(crate) mod index;
pub mod invalidation;
pub mod manager;
pub mod stats;

pub use classify::{CacheClass, CacheStrategy, RequestClassifier};
pub use config::CacheConfig;
pub use entry::CacheEntry;
pub use error::{CacheError, Result};
pub use eviction::{plan_eviction, EvictionPlan};
pub use invalidation::{InvalidationScope, UrlPattern};
pub use manager::{CacheManager, EvictionReport};
pub use stats::CacheStats;
