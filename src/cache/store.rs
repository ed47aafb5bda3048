//! Cache Store Module
//!
//! Concurrent key to entry mapping shared by callers, scan loops and workers.

use dashmap::DashMap;

use crate::cache::{CacheEntry, CacheStats, StatsCounters};

// == Cache Store ==
/// Sharded map from key to [`CacheEntry`].
///
/// Single-key operations are atomic without external locking. Snapshots lock
/// one shard at a time, so they may interleave with concurrent writes.
#[derive(Debug, Default)]
pub struct CacheStore {
    /// Key-entry storage
    entries: DashMap<String, CacheEntry>,
    /// Activity counters
    stats: StatsCounters,
}

impl CacheStore {
    // == Constructor ==
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    // == Get ==
    /// Returns a copy of the entry for `key`.
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    // == Set ==
    /// Stores an entry under its key, replacing any previous one.
    pub fn set(&self, entry: CacheEntry) {
        self.entries.insert(entry.key.clone(), entry);
    }

    // == Update ==
    /// Mutates the entry for `key` in place while holding its shard lock.
    ///
    /// Returns `None` if the key is absent.
    pub fn update<R>(&self, key: &str, f: impl FnOnce(&mut CacheEntry) -> R) -> Option<R> {
        self.entries.get_mut(key).map(|mut entry| f(entry.value_mut()))
    }

    // == Remove ==
    /// Removes an entry by key, returning it if it was present.
    pub fn remove(&self, key: &str) -> Option<CacheEntry> {
        self.entries.remove(key).map(|(_, entry)| entry)
    }

    /// Removes the entry only if `predicate` holds for its current state.
    pub fn remove_if(
        &self,
        key: &str,
        predicate: impl FnOnce(&CacheEntry) -> bool,
    ) -> Option<CacheEntry> {
        self.entries
            .remove_if(key, |_, entry| predicate(entry))
            .map(|(_, entry)| entry)
    }

    /// Returns true if `key` is present.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    // == Count ==
    /// Returns the current number of entries.
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // == Snapshot ==
    /// Copies every entry out of the map.
    ///
    /// Payloads are shared, not copied. Each entry is read consistently; the
    /// snapshot as a whole is not atomic.
    pub fn snapshot(&self) -> Vec<CacheEntry> {
        self.entries
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }

    // == Stats ==
    /// Returns the shared activity counters.
    pub fn counters(&self) -> &StatsCounters {
        &self.stats
    }

    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot(self.entries.len())
    }
}
