//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the offline core:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Event bus system
//!
//! ## Overview
//!
//! This crate contains the runtime utilities the cache manager and the sync
//! queue depend on. It establishes the logging conventions, the shared bridge
//! configuration and the event broadcasting mechanism used throughout the
//! system.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
