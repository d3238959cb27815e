//! Workspace placeholder crate.
//!
//! This crate exists to expose shared feature flags that map to the individual
//! workspace crates (`core-service`, `core-cache`, `core-sync`). Host
//! applications can depend on `offline-workspace`, enable `desktop-shims`, and
//! get the [`OfflineCore`] façade without wiring each crate individually.

#[cfg(feature = "desktop-shims")]
pub use core_service::*;
