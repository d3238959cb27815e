//! Sync queue configuration

use std::time::Duration;

use crate::error::{Result, SyncError};

/// Configuration for the durable write queue.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Failed attempts after which an operation is abandoned (default: 3)
    pub max_retries: u32,

    /// Delay before the first retry; doubles with every further failure
    /// (default: 1s)
    pub base_delay: Duration,

    /// Drain operations left by a previous run when the queue starts
    /// (default: true)
    pub drain_on_startup: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            drain_on_startup: true,
        }
    }
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_drain_on_startup(mut self, enabled: bool) -> Self {
        self.drain_on_startup = enabled;
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(SyncError::InvalidConfig(
                "max_retries must be at least 1".to_string(),
            ));
        }

        if self.base_delay.is_zero() {
            return Err(SyncError::InvalidConfig(
                "base_delay must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
