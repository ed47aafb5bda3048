//! Eviction Policy Module
//!
//! Makes room for inserts by removing the entry closest to its revocation
//! deadline.

use tracing::info;

use crate::cache::{CacheEntry, CacheStore};

// == Select Victim ==
/// Picks the entry with the earliest `revoke_at`.
///
/// Ties go to the first entry in scan order.
pub fn select_victim<'a, I>(entries: I) -> Option<&'a CacheEntry>
where
    I: IntoIterator<Item = &'a CacheEntry>,
{
    entries.into_iter().min_by_key(|entry| entry.revoke_at)
}

// == Evict One ==
/// Removes the entry with the soonest revocation deadline from the store.
///
/// Returns the evicted key, or `None` if the store was empty or the victim
/// disappeared before it could be removed.
pub fn evict_one(store: &CacheStore) -> Option<String> {
    let snapshot = store.snapshot();
    let key = select_victim(&snapshot)?.key.clone();

    store.remove(&key)?;
    store.counters().record_eviction();
    info!(key = %key, "Cache full, evicted entry with earliest revoke time");
    Some(key)
}
