//! In-memory metadata index
//!
//! One [`CacheEntry`] per URL across all classes. The index is only mutated
//! by the manager while it holds its write gate, right after the matching
//! container operation succeeded.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::classify::CacheClass;
use crate::entry::CacheEntry;

#[derive(Debug, Default)]
pub(crate) struct CacheIndex {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl CacheIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, url: &str) -> Option<CacheEntry> {
        self.entries.read().get(url).cloned()
    }

    /// Insert or overwrite the entry for `entry.url`.
    ///
    /// Overwrites keep the hit counter of the previous entry.
    pub fn upsert(&self, mut entry: CacheEntry) {
        let mut entries = self.entries.write();
        if let Some(previous) = entries.get(&entry.url) {
            entry.access_count = previous.access_count;
        }
        entries.insert(entry.url.clone(), entry);
    }

    pub fn record_hit(&self, url: &str, now: DateTime<Utc>) {
        if let Some(entry) = self.entries.write().get_mut(url) {
            entry.record_access(now);
        }
    }

    pub fn remove(&self, url: &str) -> Option<CacheEntry> {
        self.entries.write().remove(url)
    }

    pub fn entries_for(&self, class: CacheClass) -> Vec<CacheEntry> {
        self.entries
            .read()
            .values()
            .filter(|entry| entry.class == class)
            .cloned()
            .collect()
    }

    pub fn all(&self) -> Vec<CacheEntry> {
        self.entries.read().values().cloned().collect()
    }

    /// Drop every entry of `class`, returning how many there were.
    pub fn remove_class(&self, class: CacheClass) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.class != class);
        before - entries.len()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::CacheStrategy;
    use chrono::Duration;

    fn entry(url: &str, class: CacheClass, now: DateTime<Utc>) -> CacheEntry {
        CacheEntry::new(url, class, class.default_strategy(), 100, now)
    }

    #[test]
    fn test_upsert_preserves_access_count() {
        let index = CacheIndex::new();
        let t0 = Utc::now();
        index.upsert(entry("/api/posts", CacheClass::Api, t0));
        index.record_hit("/api/posts", t0 + Duration::seconds(1));
        index.record_hit("/api/posts", t0 + Duration::seconds(2));

        let t3 = t0 + Duration::seconds(3);
        index.upsert(CacheEntry::new(
            "/api/posts",
            CacheClass::Api,
            CacheStrategy::NetworkFirst,
            250,
            t3,
        ));

        let stored = index.get("/api/posts").unwrap();
        assert_eq!(stored.access_count, 2);
        assert_eq!(stored.size, 250);
        assert_eq!(stored.cached_at, t3);
    }

    #[test]
    fn test_class_queries() {
        let index = CacheIndex::new();
        let now = Utc::now();
        index.upsert(entry("/a.png", CacheClass::Images, now));
        index.upsert(entry("/b.png", CacheClass::Images, now));
        index.upsert(entry("/api/x", CacheClass::Api, now));

        assert_eq!(index.entries_for(CacheClass::Images).len(), 2);
        assert_eq!(index.remove_class(CacheClass::Images), 2);
        assert_eq!(index.len(), 1);
        assert!(index.remove("/api/x").is_some());
        assert!(index.get("/api/x").is_none());
        assert!(index.all().is_empty());
    }
}
