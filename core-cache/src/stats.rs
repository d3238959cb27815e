//! Cache statistics and monitoring

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classify::CacheClass;
use crate::entry::CacheEntry;

/// Statistics about one traffic class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub class: CacheClass,

    /// Number of cached URLs
    pub entry_count: usize,

    /// Sum of payload sizes in bytes
    pub total_size: u64,

    /// `cached_at` of the oldest entry
    pub oldest_entry: Option<DateTime<Utc>>,

    /// `cached_at` of the newest entry
    pub newest_entry: Option<DateTime<Utc>>,
}

impl CacheStats {
    pub fn from_entries<'a>(
        class: CacheClass,
        entries: impl IntoIterator<Item = &'a CacheEntry>,
    ) -> Self {
        let mut stats = Self {
            class,
            entry_count: 0,
            total_size: 0,
            oldest_entry: None,
            newest_entry: None,
        };

        for entry in entries {
            stats.entry_count += 1;
            stats.total_size += entry.size;
            stats.oldest_entry = Some(match stats.oldest_entry {
                Some(oldest) => oldest.min(entry.cached_at),
                None => entry.cached_at,
            });
            stats.newest_entry = Some(match stats.newest_entry {
                Some(newest) => newest.max(entry.cached_at),
                None => entry.cached_at,
            });
        }

        stats
    }

    /// Cache usage as a percentage of `budget`.
    pub fn usage_percentage(&self, budget: u64) -> f64 {
        if budget == 0 {
            return 0.0;
        }

        (self.total_size as f64 / budget as f64) * 100.0
    }

    pub fn is_over_budget(&self, budget: u64) -> bool {
        self.total_size > budget
    }
}
