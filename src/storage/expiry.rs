//! Background Expiry Sweeper
//!
//! Lazy expiry only frees entries that somebody reads again. Most short codes
//! are resolved a handful of times and then forgotten, so a background task
//! periodically reaps whatever has passed its deadline.
//!
//! The sweep interval adapts: it halves while a large share of keys is
//! expiring and doubles while sweeps come back empty, within
//! `[min_interval, max_interval]`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, trace};

use crate::storage::StorageEngine;

/// Sweeper tuning.
#[derive(Debug, Clone)]
pub struct ExpiryConfig {
    /// Starting interval between sweeps
    pub base_interval: Duration,
    pub min_interval: Duration,
    pub max_interval: Duration,
    /// Speed up when more than this fraction of keys expired in one sweep
    pub speedup_threshold: f64,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_secs(1),
            min_interval: Duration::from_millis(50),
            max_interval: Duration::from_secs(60),
            speedup_threshold: 0.25,
        }
    }
}

/// Handle to the running sweeper. Dropping it stops the task.
#[derive(Debug)]
pub struct ExpirySweeper {
    shutdown_tx: watch::Sender<bool>,
}

impl ExpirySweeper {
    /// Spawns the sweeper on the current Tokio runtime.
    pub fn start(engine: Arc<StorageEngine>, config: ExpiryConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(sweep_loop(engine, config, shutdown_rx));
        info!("Expiry sweeper started");
        Self { shutdown_tx }
    }

    pub fn stop(&self) {
        if self.shutdown_tx.send(true).is_ok() {
            info!("Expiry sweeper stopped");
        }
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sweep_loop(
    engine: Arc<StorageEngine>,
    config: ExpiryConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut interval = config.base_interval;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    debug!("Expiry sweeper received shutdown signal");
                    return;
                }
            }
        }

        let keys_before = engine.len();
        let expired = engine.cleanup_expired();

        if expired > 0 {
            let rate = expired as f64 / keys_before.max(1) as f64;
            if rate > config.speedup_threshold {
                interval = (interval / 2).max(config.min_interval);
            }
            debug!(
                expired,
                keys_remaining = engine.len(),
                next_interval_ms = interval.as_millis() as u64,
                "Reaped expired mappings"
            );
        } else {
            interval = (interval * 2).min(config.max_interval);
            trace!(next_interval_ms = interval.as_millis() as u64, "Nothing to reap");
        }
    }
}

/// Starts a sweeper with [`ExpiryConfig::default`].
pub fn start_expiry_sweeper(engine: Arc<StorageEngine>) -> ExpirySweeper {
    ExpirySweeper::start(engine, ExpiryConfig::default())
}
