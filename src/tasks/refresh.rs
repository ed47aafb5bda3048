//! Refresh Detection Task
//!
//! Background task that periodically marks entries nearing expiry and hands
//! them to the worker pool.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace};

use super::ticker;
use super::workers::RefreshJob;
use crate::cache::CacheStore;

/// Marks every entry due for refresh as updating and returns one job per entry.
///
/// An entry is due once `now` is within `lookahead` of its `expire_at` and no
/// refresh for it is in flight. The check is repeated against the live entry
/// before marking, so an entry replaced since the snapshot is left alone.
pub fn mark_due(store: &CacheStore, now: Instant, lookahead: Duration) -> Vec<RefreshJob> {
    store
        .snapshot()
        .into_iter()
        .filter(|entry| entry.needs_refresh(now, lookahead))
        .filter_map(|seen| {
            store
                .update(&seen.key, |live| {
                    if live.generation != seen.generation || !live.needs_refresh(now, lookahead) {
                        return None;
                    }
                    live.updating = true;
                    trace!(key = %live.key, "Marked entry for refresh");
                    Some(RefreshJob {
                        key: live.key.clone(),
                        generation: live.generation,
                        loader: Arc::clone(&live.loader),
                    })
                })
                .flatten()
        })
        .collect()
}

/// Spawns the loop that detects expiring entries and queues refresh jobs.
///
/// Scanning and marking happen under `loop_lock`. Jobs are submitted after the
/// lock is released, so a full queue only holds back this loop.
///
/// # Arguments
/// * `store` - Shared cache store
/// * `loop_lock` - Mutex serializing the refresh and revoke scans
/// * `jobs` - Sending side of the bounded job queue
/// * `interval` - Time between scans
/// * `lookahead` - How early before expiry a refresh starts
/// * `shutdown` - Flips to true when the loop must stop
///
/// # Returns
/// A JoinHandle that resolves once the loop has stopped. The job sender is
/// dropped with it, which closes the queue.
pub fn spawn_refresh_task(
    store: Arc<CacheStore>,
    loop_lock: Arc<Mutex<()>>,
    jobs: mpsc::Sender<RefreshJob>,
    interval: Duration,
    lookahead: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            "Starting refresh task with interval of {:?} and lookahead of {:?}",
            interval, lookahead
        );
        let mut ticker = ticker(interval);

        'ticks: loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.wait_for(|stopped| *stopped) => break,
            }

            let due = {
                let _guard = loop_lock.lock().await;
                mark_due(&store, Instant::now(), lookahead)
            };

            if due.is_empty() {
                trace!("Refresh scan: nothing to refresh");
                continue;
            }
            debug!("Refresh scan: queueing {} entries", due.len());

            for job in due {
                tokio::select! {
                    sent = jobs.send(job) => {
                        if sent.is_err() {
                            break 'ticks;
                        }
                    }
                    _ = shutdown.wait_for(|stopped| *stopped) => break 'ticks,
                }
            }
        }

        debug!("Refresh task stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheEntry, CacheItem};

    fn entry(key: &str, expiration: Duration, now: Instant) -> CacheEntry {
        let item = CacheItem::new(key, b"v".to_vec(), expiration, |_| Some(b"fresh".to_vec()));
        CacheEntry::from_item(item, Duration::from_secs(60), 0, now)
    }

    #[test]
    fn test_mark_due_selects_expiring_entries() {
        let now = Instant::now();
        let store = CacheStore::new();
        store.set(entry("soon", Duration::from_millis(200), now));
        store.set(entry("later", Duration::from_secs(10), now));

        let jobs = mark_due(&store, now, Duration::from_millis(300));

        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].key, "soon");
        assert!(store.get("soon").unwrap().updating);
        assert!(!store.get("later").unwrap().updating);
    }

    #[test]
    fn test_mark_due_never_double_queues() {
        let now = Instant::now();
        let store = CacheStore::new();
        store.set(entry("k", Duration::ZERO, now));

        assert_eq!(mark_due(&store, now, Duration::ZERO).len(), 1);
        assert!(mark_due(&store, now, Duration::ZERO).is_empty());
    }

    #[test]
    fn test_mark_due_with_unbounded_lookahead() {
        let now = Instant::now();
        let store = CacheStore::new();
        store.set(entry("k", Duration::from_secs(3600), now));

        let jobs = mark_due(&store, now, Duration::MAX);

        assert_eq!(jobs.len(), 1);
        assert!(store.get("k").unwrap().updating);
    }

    #[tokio::test]
    async fn test_refresh_task_survives_unbounded_lookahead() {
        let store = Arc::new(CacheStore::new());
        store.set(entry("k", Duration::from_secs(3600), Instant::now()));
        let (tx, mut rx) = mpsc::channel(4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = spawn_refresh_task(
            Arc::clone(&store),
            Arc::new(Mutex::new(())),
            tx,
            Duration::from_millis(20),
            Duration::MAX,
            shutdown_rx,
        );

        let job = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("a refresh job should be queued")
            .expect("queue should be open");
        assert_eq!(job.key, "k");

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!handle.is_finished(), "Refresh loop must keep running");

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_refresh_task_queues_jobs() {
        let store = Arc::new(CacheStore::new());
        store.set(entry("k", Duration::from_millis(10), Instant::now()));
        let (tx, mut rx) = mpsc::channel(4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = spawn_refresh_task(
            Arc::clone(&store),
            Arc::new(Mutex::new(())),
            tx,
            Duration::from_millis(20),
            Duration::from_millis(300),
            shutdown_rx,
        );

        let job = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("a refresh job should be queued")
            .expect("queue should be open");
        assert_eq!(job.key, "k");
        assert!(store.get("k").unwrap().updating);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
        // Sender dropped with the task
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_refresh_task_stops_while_queue_full() {
        let store = Arc::new(CacheStore::new());
        let now = Instant::now();
        for i in 0..4 {
            store.set(entry(&format!("k{i}"), Duration::ZERO, now));
        }
        // Capacity 1 and nobody receiving: the loop blocks on submission
        let (tx, _rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = spawn_refresh_task(
            store,
            Arc::new(Mutex::new(())),
            tx,
            Duration::from_millis(10),
            Duration::ZERO,
            shutdown_rx,
        );
        tokio::time::sleep(Duration::from_millis(100)).await;

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("refresh task should stop even when the queue is full")
            .unwrap();
    }
}
