//! L1: `MemoryStore` — an ordered key→entry map with LRU order, per-entry
//! metadata, and memory accounting (§4.1).
//!
//! The store's own mutex is held only while manipulating the map and
//! counters, never across I/O — disk write-through happens above this
//! layer, outside the lock (§5).

use super::entry::{CacheEntry, PopularKeys};
use parking_lot::Mutex;
use std::collections::HashMap;

pub struct MemoryStoreConfig {
    pub max_entries: usize,
    pub max_memory_bytes: usize,
}

struct Inner {
    entries: HashMap<String, CacheEntry>,
    memory_bytes: usize,
    popular: PopularKeys,
}

/// Outcome of an admission attempt, reported up to `UnifiedCache` so it can
/// drive `CacheStats` without the memory lock held.
pub struct AdmissionReport {
    pub admitted: bool,
    pub evicted: usize,
    pub memory_pressure: bool,
}

pub struct MemoryStore {
    config: MemoryStoreConfig,
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new(config: MemoryStoreConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                memory_bytes: 0,
                popular: PopularKeys::default(),
            }),
        }
    }

    /// Returns a clone of the entry if present and unexpired, after marking
    /// it most-recently-used and touching its access counters. Expired
    /// entries are removed on observation.
    pub fn get(&self, key: &str, now: u64) -> Option<CacheEntry> {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.get(key) {
            if entry.is_expired(now) {
                let removed = inner.entries.remove(key).unwrap();
                inner.memory_bytes = inner.memory_bytes.saturating_sub(removed.size_bytes);
                return None;
            }
        } else {
            return None;
        }
        let entry = inner.entries.get_mut(key).unwrap();
        entry.touch(now);
        let snapshot = entry.clone();
        inner.popular.consider(&snapshot);
        Some(snapshot)
    }

    pub fn peek(&self, key: &str, now: u64) -> Option<CacheEntry> {
        let inner = self.inner.lock();
        inner
            .entries
            .get(key)
            .filter(|e| !e.is_expired(now))
            .cloned()
    }

    pub fn has(&self, key: &str, now: u64) -> bool {
        self.peek(key, now).is_some()
    }

    /// Admits `entry`, evicting lower-priority / least-recently-used
    /// entries as needed (§4.1 eviction policy). Returns `admitted = false`
    /// only when the value alone exceeds the memory budget after a
    /// best-effort eviction pass.
    pub fn set(&self, entry: CacheEntry) -> AdmissionReport {
        let mut inner = self.inner.lock();

        if entry.size_bytes > self.config.max_memory_bytes {
            return AdmissionReport {
                admitted: false,
                evicted: 0,
                memory_pressure: false,
            };
        }

        if let Some(previous) = inner.entries.remove(&entry.key) {
            inner.memory_bytes = inner.memory_bytes.saturating_sub(previous.size_bytes);
        }

        let mut evicted = 0usize;
        let mut memory_pressure = false;

        while inner.entries.len() >= self.config.max_entries
            || inner.memory_bytes + entry.size_bytes > self.config.max_memory_bytes
        {
            let Some(victim_key) = Self::select_victim(&inner.entries) else {
                break;
            };
            if inner.memory_bytes + entry.size_bytes > self.config.max_memory_bytes {
                memory_pressure = true;
            }
            if let Some(victim) = inner.entries.remove(&victim_key) {
                inner.memory_bytes = inner.memory_bytes.saturating_sub(victim.size_bytes);
                evicted += 1;
            } else {
                break;
            }
        }

        inner.memory_bytes += entry.size_bytes;
        inner.entries.insert(entry.key.clone(), entry);

        AdmissionReport {
            admitted: true,
            evicted,
            memory_pressure,
        }
    }

    /// Sort by `(priority ascending, last_accessed_at ascending)` and
    /// return the first candidate — lowest priority, then least recently
    /// used (§4.1, invariant 5).
    fn select_victim(entries: &HashMap<String, CacheEntry>) -> Option<String> {
        entries
            .values()
            .min_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then(a.last_accessed_at.cmp(&b.last_accessed_at))
            })
            .map(|e| e.key.clone())
    }

    pub fn delete(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        if let Some(removed) = inner.entries.remove(key) {
            inner.memory_bytes = inner.memory_bytes.saturating_sub(removed.size_bytes);
            true
        } else {
            false
        }
    }

    /// Removes entries matching `category` (or all entries if `None`).
    /// Returns the number removed.
    pub fn clear(&self, category: Option<&str>) -> usize {
        let mut inner = self.inner.lock();
        let victims: Vec<String> = inner
            .entries
            .values()
            .filter(|e| category.map(|c| e.category == c).unwrap_or(true))
            .map(|e| e.key.clone())
            .collect();
        for key in &victims {
            if let Some(removed) = inner.entries.remove(key) {
                inner.memory_bytes = inner.memory_bytes.saturating_sub(removed.size_bytes);
            }
        }
        victims.len()
    }

    /// Removes expired entries; returns the keys removed, for the caller
    /// to increment `expirations` against.
    pub fn sweep_expired(&self, now: u64) -> Vec<String> {
        let mut inner = self.inner.lock();
        let expired: Vec<String> = inner
            .entries
            .values()
            .filter(|e| e.is_expired(now))
            .map(|e| e.key.clone())
            .collect();
        for key in &expired {
            if let Some(removed) = inner.entries.remove(key) {
                inner.memory_bytes = inner.memory_bytes.saturating_sub(removed.size_bytes);
            }
        }
        expired
    }

    pub fn categories(&self) -> Vec<String> {
        let inner = self.inner.lock();
        let mut set: Vec<String> = inner
            .entries
            .values()
            .map(|e| e.category.clone())
            .collect::<std::collections::HashSet<_>>()
            .into_iter()
            .collect();
        set.sort();
        set
    }

    pub fn popular_keys(&self) -> Vec<String> {
        self.inner.lock().popular.keys.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn memory_bytes(&self) -> usize {
        self.inner.lock().memory_bytes
    }

    pub fn max_memory_bytes(&self) -> usize {
        self.config.max_memory_bytes
    }

    /// Mutates an entry's TTL in place (used by smart-TTL extension and by
    /// disk-hit installation). Returns `false` if the key is absent.
    pub fn with_entry_mut(&self, key: &str, f: impl FnOnce(&mut CacheEntry)) -> bool {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.get_mut(key) {
            f(entry);
            true
        } else {
            false
        }
    }

    pub fn ttl_of(&self, key: &str, now: u64) -> Option<i64> {
        let inner = self.inner.lock();
        inner.entries.get(key).map(|e| {
            if e.is_expired(now) {
                -2
            } else {
                (e.created_at + e.ttl_seconds) as i64 - now as i64
            }
        })
    }

    pub fn all_entries_snapshot(&self) -> Vec<CacheEntry> {
        self.inner.lock().entries.values().cloned().collect()
    }

    pub fn keys_in_category(&self, category: &str) -> Vec<String> {
        self.inner
            .lock()
            .entries
            .values()
            .filter(|e| e.category == category)
            .map(|e| e.key.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::Tier;
    use serde_json::json;

    fn entry(key: &str, priority: u8, last_accessed_at: u64) -> CacheEntry {
        let mut e = CacheEntry::new(key, json!(1), 300, "test", priority, Tier::Warm);
        e.last_accessed_at = last_accessed_at;
        e
    }

    #[test]
    fn evicts_lowest_priority_then_lru() {
        let store = MemoryStore::new(MemoryStoreConfig {
            max_entries: 3,
            max_memory_bytes: 1_000_000,
        });
        store.set(entry("a", 1, 1));
        store.set(entry("b", 1, 2));
        store.set(entry("c", 5, 3));
        // "a" is priority 1 with the earliest last_accessed_at among ties,
        // so it is the victim when "d" forces an eviction.
        store.set(entry("d", 1, 4));
        assert!(store.peek("a", 100).is_none());
        assert!(store.peek("b", 100).is_some());
        assert!(store.peek("c", 100).is_some());
        assert!(store.peek("d", 100).is_some());
    }

    #[test]
    fn rejects_oversized_value() {
        let store = MemoryStore::new(MemoryStoreConfig {
            max_entries: 10,
            max_memory_bytes: 4,
        });
        let report = store.set(entry("huge", 1, 0));
        assert!(!report.admitted);
    }

    proptest::proptest! {
        /// However many admittable entries are pushed through `set`, the
        /// store never holds more than `max_entries` at once (§4.1
        /// invariant: eviction keeps the store within its configured bounds).
        #[test]
        fn never_exceeds_max_entries(
            count in 1usize..50,
            priorities in proptest::collection::vec(1u8..=5, 1..50),
        ) {
            let max_entries = 10;
            let store = MemoryStore::new(MemoryStoreConfig {
                max_entries,
                max_memory_bytes: 10_000_000,
            });
            for i in 0..count {
                let priority = priorities[i % priorities.len()];
                store.set(entry(&format!("k{i}"), priority, i as u64));
            }
            proptest::prop_assert!(store.len() <= max_entries);
        }
    }
}
