//! Refresh Worker Pool
//!
//! Fixed set of tasks draining the bounded refresh queue. Each job runs the
//! entry's loader and commits the result back into the store.

use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::cache::{CacheStore, Loader};

// == Refresh Job ==
/// Work item sent from the refresh loop to the pool.
#[derive(Clone)]
pub struct RefreshJob {
    /// Key to refresh
    pub key: String,
    /// Generation of the entry that was marked as updating
    pub generation: u64,
    /// Loader captured at marking time
    pub loader: Loader,
}

impl std::fmt::Debug for RefreshJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshJob")
            .field("key", &self.key)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

// == Refresh Outcome ==
/// What a worker did with a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// New value stored and expiry restarted
    Refreshed,
    /// Loader gave nothing; old value kept, flag cleared
    Failed,
    /// Entry was removed or replaced while the loader ran
    Dropped,
}

// == Worker Pool ==
/// Handles of the running refresh workers.
#[derive(Debug)]
pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `count` workers sharing the receiving end of the job queue.
    ///
    /// Workers exit once every sender is dropped and the queue is drained.
    /// Jobs still queued after `shutdown` flips to true are discarded.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        count: usize,
        jobs: mpsc::Receiver<RefreshJob>,
        store: Arc<CacheStore>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let jobs = Arc::new(Mutex::new(jobs));
        let workers = (1..=count)
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    Arc::clone(&jobs),
                    Arc::clone(&store),
                    shutdown.clone(),
                ))
            })
            .collect();

        Self { workers }
    }

    /// Returns the number of workers in the pool.
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Waits for every worker to finish its current job and exit.
    pub async fn join(self) {
        for handle in self.workers {
            if let Err(err) = handle.await {
                warn!(error = %err, "Refresh worker ended abnormally");
            }
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    jobs: Arc<Mutex<mpsc::Receiver<RefreshJob>>>,
    store: Arc<CacheStore>,
    shutdown: watch::Receiver<bool>,
) {
    debug!(worker_id, "Refresh worker started");

    loop {
        // Lock is released before the job runs
        let job = { jobs.lock().await.recv().await };
        let Some(job) = job else {
            break;
        };

        if *shutdown.borrow() {
            warn!(worker_id, key = %job.key, "Discarding queued refresh job during shutdown");
            continue;
        }

        run_job(worker_id, job, &store).await;
    }

    debug!(worker_id, "Refresh worker exiting");
}

// == Run Job ==
/// Invokes the loader off the async threads and commits its result.
///
/// A loader panic counts as an absent value. The in-flight flag is always
/// cleared on the entry the job was created for.
pub async fn run_job(worker_id: usize, job: RefreshJob, store: &CacheStore) -> RefreshOutcome {
    let RefreshJob {
        key,
        generation,
        loader,
    } = job;

    let load_key = key.clone();
    let loaded = match tokio::task::spawn_blocking(move || loader(&load_key)).await {
        Ok(value) => value,
        Err(err) => {
            warn!(worker_id, key = %key, error = %err, "Loader panicked, keeping previous value");
            None
        }
    };

    let now = Instant::now();
    let outcome = store.update(&key, |entry| {
        if entry.generation != generation {
            return RefreshOutcome::Dropped;
        }
        entry.updating = false;
        match loaded {
            Some(value) => {
                entry.value = Arc::from(value);
                entry.mark_refreshed(now);
                RefreshOutcome::Refreshed
            }
            None => RefreshOutcome::Failed,
        }
    });
    let outcome = outcome.unwrap_or(RefreshOutcome::Dropped);

    match outcome {
        RefreshOutcome::Refreshed => {
            store.counters().record_refresh();
            trace!(worker_id, key = %key, "Refreshed entry");
        }
        RefreshOutcome::Failed => {
            store.counters().record_refresh_failure();
            debug!(worker_id, key = %key, "Loader returned no value, keeping previous value");
        }
        RefreshOutcome::Dropped => {
            debug!(worker_id, key = %key, "Entry removed or replaced during refresh, dropping result");
        }
    }

    outcome
}
