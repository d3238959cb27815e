//! Cache entry metadata

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::classify::{CacheClass, CacheStrategy};

/// Access metadata for one cached URL.
///
/// The payload itself lives in the class container; the entry records what
/// eviction and expiry need to decide about it without reading the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub url: String,
    pub class: CacheClass,
    pub strategy: CacheStrategy,
    pub cached_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    /// Cache hits served from this entry
    pub access_count: u64,
    /// Payload size in bytes
    pub size: u64,
}

impl CacheEntry {
    /// Entry for a payload written at `now`.
    pub fn new(
        url: impl Into<String>,
        class: CacheClass,
        strategy: CacheStrategy,
        size: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            url: url.into(),
            class,
            strategy,
            cached_at: now,
            last_accessed: now,
            access_count: 0,
            size,
        }
    }

    pub fn record_access(&mut self, now: DateTime<Utc>) {
        self.last_accessed = now;
        self.access_count += 1;
    }

    /// Eviction order: least recently used first, then least used.
    pub fn eviction_key(&self) -> (DateTime<Utc>, u64) {
        (self.last_accessed, self.access_count)
    }

    pub fn is_older_than(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        match ChronoDuration::from_std(max_age) {
            Ok(max_age) => now - self.cached_at > max_age,
            // Longer than chrono can represent: never expires
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_access() {
        let t0 = Utc::now();
        let mut entry = CacheEntry::new(
            "/a.png",
            CacheClass::Images,
            CacheStrategy::StaleWhileRevalidate,
            10,
            t0,
        );
        assert_eq!(entry.access_count, 0);
        assert_eq!(entry.last_accessed, t0);

        let t1 = t0 + ChronoDuration::seconds(5);
        entry.record_access(t1);
        assert_eq!(entry.access_count, 1);
        assert_eq!(entry.last_accessed, t1);
        assert_eq!(entry.cached_at, t0);
    }

    #[test]
    fn test_expiry() {
        let t0 = Utc::now();
        let entry = CacheEntry::new("/api/x", CacheClass::Api, CacheStrategy::NetworkFirst, 1, t0);
        let week = Duration::from_secs(7 * 24 * 3600);

        assert!(!entry.is_older_than(week, t0 + ChronoDuration::days(7)));
        assert!(entry.is_older_than(week, t0 + ChronoDuration::days(8)));
        assert!(!entry.is_older_than(Duration::MAX, t0 + ChronoDuration::days(8000)));
    }
}
