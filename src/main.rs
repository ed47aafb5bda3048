//! Refresh Cache demo
//!
//! Keeps a handful of simulated pages in the cache, reading them on a fixed
//! cadence the way an HTTP front end would, until interrupted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Context;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use refresh_cache::{CacheItem, Config, RefreshCache};

const PAGES: &[&str] = &[
    "https://example.com/",
    "https://example.com/news",
    "https://example.com/economy",
    "https://example.com/sports",
    "https://example.com/weather",
];

/// How long a page stays fresh before it is reloaded
const PAGE_EXPIRATION: Duration = Duration::from_secs(4);

/// Pause between two page reads
const READ_INTERVAL: Duration = Duration::from_millis(300);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "refresh_cache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let cache = RefreshCache::start(config).context("failed to start cache")?;

    let loads = Arc::new(AtomicU64::new(0));
    let loader = {
        let loads = Arc::clone(&loads);
        move |key: &str| {
            loads.fetch_add(1, Ordering::Relaxed);
            Some(render_page(key))
        }
    };

    tokio::select! {
        _ = read_pages(&cache, loader) => {}
        _ = shutdown_signal() => {}
    }

    cache.stop().await;
    info!("Loader was called {} times", loads.load(Ordering::Relaxed));
    let stats = serde_json::to_string_pretty(&cache.stats()).context("failed to encode stats")?;
    println!("{stats}");
    Ok(())
}

/// Reads every page in turn, inserting the ones the cache does not hold.
async fn read_pages<F>(cache: &RefreshCache, loader: F)
where
    F: Fn(&str) -> Option<Vec<u8>> + Clone + Send + Sync + 'static,
{
    let mut ticker = tokio::time::interval(READ_INTERVAL);
    for &url in PAGES.iter().cycle() {
        ticker.tick().await;

        if cache.get(url).is_some() {
            info!("Got item from cache {}", url);
            continue;
        }

        let value = loader(url).unwrap_or_default();
        let item = CacheItem::new(url, value, PAGE_EXPIRATION, loader.clone());
        match cache.put(item) {
            Ok(()) => info!("{} not found in cache, added", url),
            Err(err) => info!("Could not cache {}: {}", url, err),
        }
    }
}

fn render_page(url: &str) -> Vec<u8> {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    format!("<html><!-- {url} rendered at {millis} --></html>").into_bytes()
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!("Failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
