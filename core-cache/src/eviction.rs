//! LRU eviction planning
//!
//! Planning is pure: it looks at a snapshot of one class and picks victims.
//! The manager then removes them payload-first under its write gate.

use crate::config::CacheConfig;
use crate::entry::CacheEntry;

/// Outcome of planning one class.
#[derive(Debug, Clone, Default)]
pub struct EvictionPlan {
    /// Entries to remove, least recently used first
    pub victims: Vec<CacheEntry>,
    /// Size the pass aims to get under
    pub target_size: u64,
    /// Entries the class keeps no matter what
    pub floor: usize,
}

/// Pick the entries to evict so the class falls back under its budget.
///
/// Nothing happens while the class total is within `budget`. Otherwise
/// entries are taken in `(last_accessed, access_count)` order until the total
/// is at most `budget × (1 − eviction_percentage)` or the class would shrink
/// below `max(min_entries, count − max_evictions_per_pass)`.
pub fn plan_eviction(entries: Vec<CacheEntry>, budget: u64, config: &CacheConfig) -> EvictionPlan {
    let count = entries.len();
    let total: u64 = entries.iter().map(|entry| entry.size).sum();
    let target_size = (budget as f64 * (1.0 - config.eviction_percentage)) as u64;
    let floor = config
        .min_entries
        .max(count.saturating_sub(config.max_evictions_per_pass));

    if total <= budget {
        return EvictionPlan {
            victims: Vec::new(),
            target_size,
            floor,
        };
    }

    let mut candidates = entries;
    candidates.sort_by_key(|entry| entry.eviction_key());

    let mut remaining_size = total;
    let mut remaining_count = count;
    let mut victims = Vec::new();

    for entry in candidates {
        if remaining_size <= target_size || remaining_count <= floor {
            break;
        }
        remaining_size -= entry.size;
        remaining_count -= 1;
        victims.push(entry);
    }

    EvictionPlan {
        victims,
        target_size,
        floor,
    }
}
