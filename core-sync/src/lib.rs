//! # Sync Queue
//!
//! Durable, retrying FIFO queue for writes that must reach the server even
//! when they are issued offline.
//!
//! ## Overview
//!
//! - Registered writes are persisted before `register` returns
//! - Pending writes are replayed in registration order
//! - Failures back off exponentially (1s, 2s, ... by default)
//! - Writes that exhaust their retries are dropped and reported through
//!   `SyncEvent::OperationAbandoned`
//!
//! ## Components
//!
//! - **Operations** (`operation`): `SyncRequest` input and the persisted `SyncOperation`
//! - **Store** (`store`): `SyncOperationStore` contract and its SQLite implementation
//! - **Queue** (`queue`): registration, drain passes, retry timer, connectivity listener

pub mod config;
pub mod error;
pub mod operation;
pub mod queue;
pub mod store;

pub use config::SyncConfig;
pub use error::{Result, SyncError};
pub use operation::{backoff_delay, SyncOperation, SyncOperationId, SyncRequest};
pub use queue::{DrainReport, DrainSkip, DrainTrigger, SyncQueue};
pub use store::{SqliteSyncOperationStore, SyncOperationStore};
