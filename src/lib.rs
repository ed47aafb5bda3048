//! Refresh Cache - an embedded key/value cache with background refresh
//!
//! Values are reloaded by a worker pool shortly before they go stale, and
//! entries nobody reads within their TTL are revoked. A fixed entry budget is
//! enforced by evicting the entry closest to its revoke deadline.

pub mod cache;
pub mod config;
pub mod error;
pub mod handle;
pub mod tasks;

pub use cache::{CacheItem, CacheStats, EntryInfo, Loader};
pub use config::Config;
pub use error::{CacheError, Result};
pub use handle::RefreshCache;
