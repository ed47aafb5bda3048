//! Revocation Task
//!
//! Background task that periodically removes entries that were not accessed
//! within their retention window.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use super::ticker;
use crate::cache::CacheStore;

/// Removes every entry whose revocation deadline has passed.
///
/// Entries with a refresh in flight are revoked too. Each removal re-checks
/// the live entry, so a read that extended the deadline after the snapshot
/// keeps the entry alive.
///
/// Returns the number of entries removed.
pub fn revoke_due(store: &CacheStore, now: Instant) -> usize {
    let mut revoked = 0;

    for seen in store.snapshot() {
        if !seen.is_revoked(now) {
            continue;
        }
        if let Some(entry) = store.remove_if(&seen.key, |live| live.is_revoked(now)) {
            store.counters().record_revocation();
            info!(
                key = %entry.key,
                "Revoking entry that has not been used in {:?}",
                entry.retention()
            );
            revoked += 1;
        }
    }

    revoked
}

/// Spawns a background task that periodically revokes idle cache entries.
///
/// Each scan runs under `loop_lock` so it never interleaves with a refresh scan.
///
/// # Arguments
/// * `store` - Shared cache store
/// * `loop_lock` - Mutex serializing the refresh and revoke scans
/// * `interval` - Time between scans
/// * `shutdown` - Flips to true when the loop must stop
///
/// # Returns
/// A JoinHandle that resolves once the loop has stopped.
pub fn spawn_revoke_task(
    store: Arc<CacheStore>,
    loop_lock: Arc<Mutex<()>>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Starting revoke task with interval of {:?}", interval);
        let mut ticker = ticker(interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.wait_for(|stopped| *stopped) => break,
            }

            let removed = {
                let _guard = loop_lock.lock().await;
                revoke_due(&store, Instant::now())
            };

            if removed > 0 {
                debug!("Revoke scan: removed {} idle entries", removed);
            }
        }

        debug!("Revoke task stopped");
    })
}
