//! Cache Module
//!
//! Entries, the concurrent store, capacity eviction and statistics.

mod entry;
mod eviction;
mod stats;
mod store;


// Re-export public types
pub use entry::{CacheEntry, CacheItem, EntryInfo, Loader};
pub(crate) use entry::deadline_after;
pub use eviction::{evict_one, select_victim};
pub use stats::{CacheStats, StatsCounters};
pub use store::CacheStore;

// == Public Constants ==
/// Maximum allowed key length in bytes
pub const MAX_KEY_LENGTH: usize = 256;
