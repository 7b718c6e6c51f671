//! Background expiration sweeper.
//!
//! Lazy expiration (checking on access) leaves a hole: a key that expires
//! and is never touched again would sit in memory forever. The sweeper
//! closes it with a 1 Hz pass that collects expired keys under the read
//! lock, then deletes them under the write lock with a re-check, and
//! signals the snapshot writer so the eviction eventually reaches disk.

use crate::storage::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// Interval between sweeper passes.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Handle to the running sweeper task. Dropping the handle stops the task.
#[derive(Debug)]
pub struct ExpirySweeper {
    shutdown_tx: watch::Sender<bool>,
}

impl ExpirySweeper {
    /// Spawns the sweeper over `store` and returns its handle.
    pub fn start(store: Arc<Store>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(sweeper_loop(store, shutdown_rx));
        info!("expiration sweeper started");
        Self { shutdown_tx }
    }

    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sweeper_loop(store: Arc<Store>, mut shutdown_rx: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    // The first tick fires immediately; skip it so a fresh server does not
    // sweep before it has served anything.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("expiration sweeper shutting down");
                    return;
                }
            }
        }

        let evicted = store.sweep_expired();
        if evicted > 0 {
            debug!(evicted, "expired keys evicted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn sweeper_evicts_expired_keys() {
        let (tx, _rx) = mpsc::channel(100);
        let store = Arc::new(Store::new(tx));

        for i in 0..5 {
            store.set(&format!("k{}", i), "v", Some(Duration::from_millis(50)));
        }
        store.set("keep", "v", None);

        let _sweeper = ExpirySweeper::start(Arc::clone(&store));

        // The first pass runs one interval after startup.
        tokio::time::sleep(Duration::from_millis(1500)).await;

        let all = store.all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].0, "keep");
    }

    #[tokio::test]
    async fn sweeper_stops_on_drop() {
        let (tx, _rx) = mpsc::channel(100);
        let store = Arc::new(Store::new(tx));

        {
            let _sweeper = ExpirySweeper::start(Arc::clone(&store));
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        store.set("k", "v", Some(Duration::from_millis(10)));
        tokio::time::sleep(Duration::from_millis(50)).await;

        // No sweeper is running, so only lazy expiration applies: the read
        // reports the key as absent and removes it.
        assert!(store.get("k").is_err());
    }
}
