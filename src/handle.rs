//! Cache Handle
//!
//! Owns one cache instance: the store, the scan loops and the refresh
//! workers. Every operation goes through a [`RefreshCache`] value, so
//! independent caches can run side by side.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::{
    evict_one, CacheEntry, CacheItem, CacheStats, CacheStore, EntryInfo, MAX_KEY_LENGTH,
};
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::tasks::{spawn_refresh_task, spawn_revoke_task, WorkerPool};

/// Background machinery of a started cache.
struct Running {
    shutdown: watch::Sender<bool>,
    refresh: JoinHandle<()>,
    revoke: JoinHandle<()>,
    workers: WorkerPool,
}

// == Refresh Cache ==
/// A started cache instance.
///
/// Reads and writes are synchronous and never wait on a refresh. Background
/// work runs on the tokio runtime that was current when [`RefreshCache::start`]
/// was called.
pub struct RefreshCache {
    store: Arc<CacheStore>,
    config: Config,
    /// Serializes the capacity check and write of concurrent puts
    insert_lock: Mutex<()>,
    next_generation: AtomicU64,
    stopped: AtomicBool,
    running: Mutex<Option<Running>>,
}

impl RefreshCache {
    // == Start ==
    /// Validates `config`, spawns the refresh workers and both scan loops.
    ///
    /// # Errors
    /// - `InvalidConfig` if a setting is out of range
    /// - `NoRuntime` if called outside of a tokio runtime
    pub fn start(config: Config) -> Result<Self> {
        config.validate()?;
        tokio::runtime::Handle::try_current()
            .map_err(|err| CacheError::NoRuntime(err.to_string()))?;

        info!(
            "Starting refresh cache with {} workers, {} job queue size, {} cache maximum and {:?} default TTL",
            config.worker_count, config.queue_capacity, config.max_entries, config.default_ttl
        );

        let store = Arc::new(CacheStore::new());
        let loop_lock = Arc::new(tokio::sync::Mutex::new(()));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (jobs_tx, jobs_rx) = mpsc::channel(config.queue_capacity);

        let workers = WorkerPool::spawn(
            config.worker_count,
            jobs_rx,
            Arc::clone(&store),
            shutdown_rx.clone(),
        );
        let refresh = spawn_refresh_task(
            Arc::clone(&store),
            Arc::clone(&loop_lock),
            jobs_tx,
            config.loop_interval,
            config.refresh_lookahead,
            shutdown_rx.clone(),
        );
        let revoke = spawn_revoke_task(
            Arc::clone(&store),
            loop_lock,
            config.loop_interval,
            shutdown_rx,
        );

        Ok(Self {
            store,
            config,
            insert_lock: Mutex::new(()),
            next_generation: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
            running: Mutex::new(Some(Running {
                shutdown,
                refresh,
                revoke,
                workers,
            })),
        })
    }

    // == Stop ==
    /// Stops both loops, closes the job queue and waits for the workers.
    ///
    /// Jobs a worker already picked up run to completion; queued jobs are
    /// discarded. The store is emptied afterwards. Calling `stop` again is a
    /// no-op.
    pub async fn stop(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(running) = running else {
            return;
        };

        info!("Stopping refresh cache background processing");
        self.stopped.store(true, Ordering::Release);
        running.shutdown.send_replace(true);

        for (name, handle) in [("refresh", running.refresh), ("revoke", running.revoke)] {
            if let Err(err) = handle.await {
                warn!(error = %err, "{} task ended abnormally", name);
            }
        }
        // The refresh task owned the only job sender, so the queue is closed now
        running.workers.join().await;

        {
            let _guard = self.insert_lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.store.clear();
        }
        debug!("Refresh cache stopped");
    }

    // == Put ==
    /// Inserts or replaces an item, stamping its expiry and revoke deadlines.
    ///
    /// When a new key arrives at capacity, the entry with the earliest revoke
    /// deadline is evicted first. Replacing an existing key never evicts.
    ///
    /// # Errors
    /// - `InvalidKey` if the key is empty or longer than `MAX_KEY_LENGTH`
    /// - `Stopped` if the cache has been stopped
    pub fn put(&self, item: CacheItem) -> Result<()> {
        validate_key(&item.key)?;

        let _guard = self.insert_lock.lock().unwrap_or_else(PoisonError::into_inner);
        // Checked under the lock so no write lands after stop clears the store
        if self.stopped.load(Ordering::Acquire) {
            return Err(CacheError::Stopped);
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let entry = CacheEntry::from_item(item, self.config.default_ttl, generation, Instant::now());
        if !self.store.contains(&entry.key) {
            while self.store.count() >= self.config.max_entries {
                evict_one(&self.store);
            }
        }
        self.store.set(entry);
        Ok(())
    }

    // == Get ==
    /// Returns the current value and pushes back the revoke deadline.
    ///
    /// Never waits for a refresh; a stale value is returned until a worker
    /// commits the new one. Also clears the in-flight flag.
    pub fn get(&self, key: &str) -> Option<Arc<[u8]>> {
        let now = Instant::now();
        let value = self.store.update(key, |entry| {
            entry.touch(now);
            entry.updating = false;
            Arc::clone(&entry.value)
        });

        let counters = self.store.counters();
        match value {
            Some(_) => counters.record_hit(),
            None => counters.record_miss(),
        }
        value
    }

    // == Remove ==
    /// Removes an entry by key. Returns true if it was present.
    pub fn remove(&self, key: &str) -> bool {
        self.store.remove(key).is_some()
    }

    // == Peek ==
    /// Returns an entry's timing metadata without counting as an access.
    pub fn peek(&self, key: &str) -> Option<EntryInfo> {
        self.store.get(key).map(|entry| entry.info())
    }

    /// Returns the current number of entries.
    pub fn len(&self) -> usize {
        self.store.count()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Returns true until `stop` has been called.
    pub fn is_running(&self) -> bool {
        !self.stopped.load(Ordering::Acquire)
    }

    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        self.store.stats()
    }

    /// Returns the configuration this cache was started with.
    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl Drop for RefreshCache {
    fn drop(&mut self) {
        // Tasks exit on their own once signalled; nothing to join here
        let running = self
            .running
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(running) = running {
            running.shutdown.send_replace(true);
        }
    }
}

impl std::fmt::Debug for RefreshCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCache")
            .field("config", &self.config)
            .field("entries", &self.store.count())
            .field("running", &self.is_running())
            .finish()
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(CacheError::InvalidKey("Key must not be empty".to_string()));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(CacheError::InvalidKey(format!(
            "Key exceeds maximum length of {} bytes",
            MAX_KEY_LENGTH
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    fn item(key: &str) -> CacheItem {
        CacheItem::new(key, b"value".to_vec(), Duration::from_secs(60), |_| None)
    }

    fn config(max_entries: usize) -> Config {
        Config::new(1, 4, max_entries, Duration::from_secs(60))
    }

    #[test]
    fn test_start_outside_runtime() {
        let result = RefreshCache::start(config(2));
        assert!(matches!(result, Err(CacheError::NoRuntime(_))));
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_config() {
        let result = RefreshCache::start(Config::new(0, 4, 2, Duration::from_secs(1)));
        assert!(matches!(result, Err(CacheError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let cache = assert_ok!(RefreshCache::start(config(10)));

        assert_ok!(cache.put(item("key1")));
        assert_eq!(cache.get("key1").as_deref(), Some(&b"value"[..]));
        assert_eq!(cache.get("missing"), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.total_entries, 1);

        cache.stop().await;
    }

    #[tokio::test]
    async fn test_put_with_unbounded_ttl() {
        let cache = assert_ok!(RefreshCache::start(config(2)));
        let item = CacheItem::new("k", b"v".to_vec(), Duration::from_secs(1), |_| None)
            .with_ttl(Duration::MAX);

        assert_ok!(cache.put(item));
        assert_eq!(cache.get("k").as_deref(), Some(&b"v"[..]));
        assert!(cache.peek("k").unwrap().revoke_at > Instant::now());

        cache.stop().await;
    }

    #[tokio::test]
    async fn test_put_with_unbounded_default_ttl() {
        let cache = assert_ok!(RefreshCache::start(Config::new(
            1,
            1,
            2,
            Duration::from_secs(u64::MAX)
        )));

        assert_ok!(cache.put(item("k")));
        assert!(cache.get("k").is_some());

        cache.stop().await;
    }

    #[tokio::test]
    async fn test_put_rejects_bad_keys() {
        let cache = assert_ok!(RefreshCache::start(config(10)));

        assert!(matches!(cache.put(item("")), Err(CacheError::InvalidKey(_))));
        let long_key = "x".repeat(MAX_KEY_LENGTH + 1);
        assert!(matches!(cache.put(item(&long_key)), Err(CacheError::InvalidKey(_))));
        assert!(cache.is_empty());

        cache.stop().await;
    }

    #[tokio::test]
    async fn test_overwrite_does_not_evict() {
        let cache = assert_ok!(RefreshCache::start(config(2)));

        assert_ok!(cache.put(item("a")));
        assert_ok!(cache.put(item("b")));
        assert_ok!(cache.put(
            CacheItem::new("a", b"second".to_vec(), Duration::from_secs(60), |_| None)
        ));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a").as_deref(), Some(&b"second"[..]));
        assert!(cache.get("b").is_some());
        assert_eq!(cache.stats().evictions, 0);

        cache.stop().await;
    }

    #[tokio::test]
    async fn test_get_clears_updating_flag() {
        let cache = assert_ok!(RefreshCache::start(config(2)));
        assert_ok!(cache.put(item("k")));
        cache.store.update("k", |entry| entry.updating = true);

        assert!(cache.peek("k").unwrap().updating);
        cache.get("k");
        assert!(!cache.peek("k").unwrap().updating);

        cache.stop().await;
    }

    #[tokio::test]
    async fn test_peek_does_not_extend_life() {
        let cache = assert_ok!(RefreshCache::start(config(2)));
        assert_ok!(cache.put(item("k")));

        let first = cache.peek("k").unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = cache.peek("k").unwrap();

        assert_eq!(first.revoke_at, second.revoke_at);
        assert_eq!(cache.stats().hits, 0);

        cache.stop().await;
    }

    #[tokio::test]
    async fn test_remove() {
        let cache = assert_ok!(RefreshCache::start(config(2)));
        assert_ok!(cache.put(item("k")));

        assert!(cache.remove("k"));
        assert!(!cache.remove("k"));
        assert_eq!(cache.get("k"), None);

        cache.stop().await;
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_clears() {
        let cache = assert_ok!(RefreshCache::start(config(2)));
        assert_ok!(cache.put(item("k")));
        assert!(cache.is_running());

        cache.stop().await;
        cache.stop().await;

        assert!(!cache.is_running());
        assert!(cache.is_empty());
        assert_eq!(cache.get("k"), None);
        assert_eq!(assert_err!(cache.put(item("k"))), CacheError::Stopped);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_puts_racing_stop_leave_store_empty() {
        for _ in 0..20 {
            let cache = Arc::new(assert_ok!(RefreshCache::start(config(1000))));

            let writers: Vec<_> = (0..3)
                .map(|t| {
                    let cache = Arc::clone(&cache);
                    tokio::task::spawn_blocking(move || {
                        let mut i = 0u64;
                        loop {
                            match cache.put(item(&format!("t{t}-{i}"))) {
                                Ok(()) => i += 1,
                                Err(err) => return err,
                            }
                        }
                    })
                })
                .collect();

            tokio::task::yield_now().await;
            cache.stop().await;

            for writer in writers {
                assert_eq!(writer.await.unwrap(), CacheError::Stopped);
            }
            assert!(cache.is_empty());
        }
    }

    #[tokio::test]
    async fn test_independent_instances() {
        let first = assert_ok!(RefreshCache::start(config(2)));
        let second = assert_ok!(RefreshCache::start(config(2)));

        assert_ok!(first.put(item("shared")));
        assert!(second.get("shared").is_none());

        first.stop().await;
        assert_ok!(second.put(item("other")));
        assert!(second.get("other").is_some());
        second.stop().await;
    }
}
