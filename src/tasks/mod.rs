//! Background Tasks Module
//!
//! Contains the tasks that keep the cache fresh while it runs.
//!
//! # Tasks
//! - Refresh: queues entries nearing expiry for reloading
//! - Revoke: removes entries idle past their retention window
//! - Workers: run loaders for queued refresh jobs

mod refresh;
mod revoke;
mod workers;

use std::time::Duration;

use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use crate::cache::deadline_after;

pub use refresh::{mark_due, spawn_refresh_task};
pub use revoke::{revoke_due, spawn_revoke_task};
pub use workers::{run_job, RefreshJob, RefreshOutcome, WorkerPool};

/// Interval whose first tick fires one period from now.
fn ticker(period: Duration) -> Interval {
    let mut ticker = interval_at(deadline_after(Instant::now(), period), period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}
