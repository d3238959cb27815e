//! Cache configuration and policies

use std::time::Duration;

use crate::classify::CacheClass;
use crate::error::{CacheError, Result};

const MIB: u64 = 1024 * 1024;
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Configuration for the response cache manager.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Container namespace; containers are named `<namespace>-<class>` (default: `offline-v1`)
    pub namespace: String,

    /// Byte budget of the STATIC container (default: 50 MiB)
    pub static_budget_bytes: u64,

    /// Byte budget of the DYNAMIC container (default: 25 MiB)
    pub dynamic_budget_bytes: u64,

    /// Byte budget of the IMAGES container (default: 100 MiB)
    pub images_budget_bytes: u64,

    /// Byte budget of the API container (default: 10 MiB)
    pub api_budget_bytes: u64,

    /// Share of the budget freed by one eviction pass (default: 0.25)
    pub eviction_percentage: f64,

    /// Period of the scheduled eviction scan (default: 30s)
    pub eviction_interval: Duration,

    /// Entries a class always keeps, whatever its size (default: 5)
    pub min_entries: usize,

    /// Most entries one pass may remove from a class (default: 100)
    pub max_evictions_per_pass: usize,

    /// Age after which cache-first entries expire (default: 30 days)
    pub cache_first_max_age: Duration,

    /// Age after which all other entries expire (default: 7 days)
    pub default_max_age: Duration,

    /// Path segments that mark an API request (default: `["api"]`)
    pub api_segments: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            namespace: "offline-v1".to_string(),
            static_budget_bytes: 50 * MIB,
            dynamic_budget_bytes: 25 * MIB,
            images_budget_bytes: 100 * MIB,
            api_budget_bytes: 10 * MIB,
            eviction_percentage: 0.25,
            eviction_interval: Duration::from_secs(30),
            min_entries: 5,
            max_evictions_per_pass: 100,
            cache_first_max_age: 30 * DAY,
            default_max_age: 7 * DAY,
            api_segments: vec!["api".to_string()],
        }
    }
}

impl CacheConfig {
    /// Create a new cache configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the byte budget of one class.
    pub fn with_budget(mut self, class: CacheClass, bytes: u64) -> Self {
        match class {
            CacheClass::Static => self.static_budget_bytes = bytes,
            CacheClass::Dynamic => self.dynamic_budget_bytes = bytes,
            CacheClass::Images => self.images_budget_bytes = bytes,
            CacheClass::Api => self.api_budget_bytes = bytes,
        }
        self
    }

    pub fn with_eviction_percentage(mut self, percentage: f64) -> Self {
        self.eviction_percentage = percentage;
        self
    }

    pub fn with_eviction_interval(mut self, interval: Duration) -> Self {
        self.eviction_interval = interval;
        self
    }

    pub fn with_min_entries(mut self, count: usize) -> Self {
        self.min_entries = count;
        self
    }

    pub fn with_max_evictions_per_pass(mut self, count: usize) -> Self {
        self.max_evictions_per_pass = count;
        self
    }

    /// Set the expiry ages for cache-first entries and for everything else.
    pub fn with_max_ages(mut self, cache_first: Duration, other: Duration) -> Self {
        self.cache_first_max_age = cache_first;
        self.default_max_age = other;
        self
    }

    pub fn with_api_segments(mut self, segments: Vec<String>) -> Self {
        self.api_segments = segments;
        self
    }

    pub fn budget_for(&self, class: CacheClass) -> u64 {
        match class {
            CacheClass::Static => self.static_budget_bytes,
            CacheClass::Dynamic => self.dynamic_budget_bytes,
            CacheClass::Images => self.images_budget_bytes,
            CacheClass::Api => self.api_budget_bytes,
        }
    }

    /// Container holding the payloads of `class`.
    pub fn container_name(&self, class: CacheClass) -> String {
        format!("{}-{}", self.namespace, class.container_suffix())
    }

    /// Prefix shared by every namespace version, e.g. `offline-` for `offline-v1`.
    pub fn namespace_family(&self) -> &str {
        match self.namespace.rfind('-') {
            Some(idx) => &self.namespace[..=idx],
            None => &self.namespace,
        }
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(CacheError::InvalidConfig(
                "namespace cannot be empty".to_string(),
            ));
        }

        if let Some(class) = CacheClass::ALL
            .into_iter()
            .find(|class| self.budget_for(*class) == 0)
        {
            return Err(CacheError::InvalidConfig(format!(
                "{} budget must be greater than 0",
                class
            )));
        }

        if !(self.eviction_percentage > 0.0 && self.eviction_percentage <= 1.0) {
            return Err(CacheError::InvalidConfig(format!(
                "eviction_percentage must be in (0, 1], got {}",
                self.eviction_percentage
            )));
        }

        if self.eviction_interval.is_zero() {
            return Err(CacheError::InvalidConfig(
                "eviction_interval must be greater than 0".to_string(),
            ));
        }

        if self.max_evictions_per_pass == 0 {
            return Err(CacheError::InvalidConfig(
                "max_evictions_per_pass must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
