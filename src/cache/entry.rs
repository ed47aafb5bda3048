//! Cache Entry Module
//!
//! Defines caller-supplied items and the stored entries carrying their
//! refresh and revocation deadlines.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

/// Stand-in deadline for windows too long to represent as an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Returns `now + after`, saturating to a far-future deadline on overflow.
pub(crate) fn deadline_after(now: Instant, after: Duration) -> Instant {
    now.checked_add(after)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

// == Loader ==
/// Recomputes the value for a key. `None` means "keep the current value".
pub type Loader = Arc<dyn Fn(&str) -> Option<Vec<u8>> + Send + Sync>;

// == Cache Item ==
/// A value handed to the cache together with its refresh settings.
#[derive(Clone)]
pub struct CacheItem {
    /// Cache key, for example a URL
    pub key: String,
    /// Initial payload
    pub value: Vec<u8>,
    /// Age after which the value is refreshed through the loader
    pub expiration: Duration,
    /// Inactivity window before revocation, falls back to the default TTL
    pub ttl: Option<Duration>,
    /// Function producing fresh values
    pub loader: Loader,
}

impl CacheItem {
    // == Constructor ==
    /// Creates an item without a TTL override.
    ///
    /// # Arguments
    /// * `key` - The key to store
    /// * `value` - The initial value
    /// * `expiration` - How long a value stays fresh
    /// * `loader` - Called by refresh workers with the key
    pub fn new<F>(key: impl Into<String>, value: Vec<u8>, expiration: Duration, loader: F) -> Self
    where
        F: Fn(&str) -> Option<Vec<u8>> + Send + Sync + 'static,
    {
        Self {
            key: key.into(),
            value,
            expiration,
            ttl: None,
            loader: Arc::new(loader),
        }
    }

    /// Sets the inactivity window for this item.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

impl fmt::Debug for CacheItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheItem")
            .field("key", &self.key)
            .field("value_len", &self.value.len())
            .field("expiration", &self.expiration)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

// == Cache Entry ==
/// Represents a stored item with its timing metadata.
#[derive(Clone)]
pub struct CacheEntry {
    /// The cache key
    pub key: String,
    /// The current payload, replaced by refreshes
    pub value: Arc<[u8]>,
    /// How long a value stays fresh
    pub expiration: Duration,
    /// Resolved inactivity window (item TTL or the default)
    pub ttl: Duration,
    /// When the value goes stale
    pub expire_at: Instant,
    /// When the entry is revoked unless accessed again
    pub revoke_at: Instant,
    /// True while a refresh job for this key is in flight
    pub updating: bool,
    /// Identifies the insert this entry came from
    pub generation: u64,
    /// Function producing fresh values
    pub loader: Loader,
}

impl CacheEntry {
    // == Constructor ==
    /// Builds an entry from an item, stamping both deadlines from `now`.
    pub fn from_item(item: CacheItem, default_ttl: Duration, generation: u64, now: Instant) -> Self {
        let ttl = item.ttl.filter(|ttl| !ttl.is_zero()).unwrap_or(default_ttl);
        let mut entry = Self {
            key: item.key,
            value: Arc::from(item.value),
            expiration: item.expiration,
            ttl,
            expire_at: now,
            revoke_at: now,
            updating: false,
            generation,
            loader: item.loader,
        };
        entry.touch(now);
        entry.mark_refreshed(now);
        entry
    }

    // == Retention Window ==
    /// Returns `max(ttl, expiration)`.
    ///
    /// An entry is never revoked before it could expire and refresh once.
    pub fn retention(&self) -> Duration {
        self.ttl.max(self.expiration)
    }

    // == Touch ==
    /// Extends the revocation deadline from an access at `now`.
    pub fn touch(&mut self, now: Instant) {
        self.revoke_at = deadline_after(now, self.retention());
    }

    // == Mark Refreshed ==
    /// Restarts the freshness window from `now`.
    pub fn mark_refreshed(&mut self, now: Instant) {
        self.expire_at = deadline_after(now, self.expiration);
    }

    // == Needs Refresh ==
    /// Checks whether the value is within `lookahead` of going stale and no
    /// refresh is already running.
    pub fn needs_refresh(&self, now: Instant, lookahead: Duration) -> bool {
        if self.updating {
            return false;
        }
        // A lookahead past the end of time covers every deadline
        now.checked_add(lookahead)
            .map_or(true, |horizon| horizon >= self.expire_at)
    }

    // == Is Revoked ==
    /// Checks if the revocation deadline has passed.
    ///
    /// Boundary condition: the entry is revoked once `now >= revoke_at`.
    pub fn is_revoked(&self, now: Instant) -> bool {
        now >= self.revoke_at
    }

    /// Returns a loader-free view of the timing metadata.
    pub fn info(&self) -> EntryInfo {
        EntryInfo {
            key: self.key.clone(),
            expiration: self.expiration,
            ttl: self.ttl,
            expire_at: self.expire_at,
            revoke_at: self.revoke_at,
            updating: self.updating,
        }
    }
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("key", &self.key)
            .field("value_len", &self.value.len())
            .field("expiration", &self.expiration)
            .field("ttl", &self.ttl)
            .field("expire_at", &self.expire_at)
            .field("revoke_at", &self.revoke_at)
            .field("updating", &self.updating)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

// == Entry Info ==
/// Timing metadata of a stored entry, as seen by `peek`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    pub key: String,
    pub expiration: Duration,
    pub ttl: Duration,
    pub expire_at: Instant,
    pub revoke_at: Instant,
    pub updating: bool,
}
