//! Debounced JSON snapshots of the store.
//!
//! A single long-lived task owns the snapshot cadence. It saves when either
//! of two things happens:
//!
//! - the 2-second timer ticks, or
//! - a mutation signals the bounded dirty channel; the task then debounces
//!   by waiting up to 500 ms for one more signal before saving, coalescing
//!   write bursts into one dump.
//!
//! The channel is a pure level trigger: `try_send` from the store, dropped
//! on overflow. Losing a signal is safe because the timer guarantees the
//! next save.
//!
//! A save is atomic on the filesystem: the JSON is written to `<path>.tmp`
//! and renamed over `<path>`, so readers never observe a partial file.
//! Save failures are logged and dropped; the AOF provides the strong
//! guarantee when enabled.

use crate::storage::{Store, Value, ValueData};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Capacity of the dirty-signal channel between the store and the writer.
pub const SIGNAL_QUEUE_SIZE: usize = 100;

/// Periodic save interval.
const SAVE_INTERVAL: Duration = Duration::from_secs(2);

/// How long a signal waits for a follow-up before saving.
const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

/// On-disk form of one entry: `{"type": 0|1|2, "data": ..., "exp": secs}`.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedValue {
    #[serde(rename = "type")]
    kind: u8,
    data: PersistedData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exp: Option<u64>,
}

/// Payload shapes, discriminated by JSON structure.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum PersistedData {
    Str(String),
    List(VecDeque<String>),
    Hash(HashMap<String, String>),
}

impl From<Value> for PersistedValue {
    fn from(value: Value) -> Self {
        let exp = value
            .expires_at
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs());
        let kind = value.data.kind_ordinal();
        let data = match value.data {
            ValueData::Str(s) => PersistedData::Str(s),
            ValueData::List(l) => PersistedData::List(l),
            ValueData::Hash(h) => PersistedData::Hash(h),
        };
        Self { kind, data, exp }
    }
}

/// Serializes the whole store and atomically replaces the snapshot file.
pub fn save(store: &Store, path: &Path) -> io::Result<()> {
    // BTreeMap keeps the dump deterministic, which makes diffs and tests
    // stable.
    let entries: BTreeMap<String, PersistedValue> = store
        .dump()
        .into_iter()
        .map(|(k, v)| (k, PersistedValue::from(v)))
        .collect();

    let json = serde_json::to_vec_pretty(&entries)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    let tmp = tmp_path(path);
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Loads a snapshot into `store`, skipping entries that expired while the
/// server was down and entries whose kind ordinal does not match their
/// payload. An absent file is not an error.
pub fn load(store: &Store, path: &Path) -> io::Result<usize> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let entries: HashMap<String, PersistedValue> = serde_json::from_slice(&bytes)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    let now = SystemTime::now();
    let mut loaded = 0;
    for (key, persisted) in entries {
        let expires_at = persisted.exp.map(|secs| UNIX_EPOCH + Duration::from_secs(secs));
        if let Some(exp) = expires_at {
            if now >= exp {
                continue;
            }
        }

        let data = match (persisted.kind, persisted.data) {
            (0, PersistedData::Str(s)) => ValueData::Str(s),
            (1, PersistedData::List(l)) => ValueData::List(l),
            (2, PersistedData::Hash(h)) => ValueData::Hash(h),
            (kind, _) => {
                warn!(key = %key, kind, "snapshot entry kind does not match payload, skipping");
                continue;
            }
        };

        store.load_entry(key, Value { data, expires_at });
        loaded += 1;
    }

    Ok(loaded)
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".tmp");
    PathBuf::from(os)
}

/// Handle to the snapshot writer task. Dropping the handle stops the task.
#[derive(Debug)]
pub struct SnapshotWriter {
    shutdown_tx: watch::Sender<bool>,
}

impl SnapshotWriter {
    /// Spawns the writer over `store`, saving to `path`, fed by the dirty
    /// signals on `signal_rx`.
    pub fn start(store: Arc<Store>, path: PathBuf, signal_rx: mpsc::Receiver<()>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(writer_loop(store, path, signal_rx, shutdown_rx));
        info!("snapshot writer started");
        Self { shutdown_tx }
    }

    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for SnapshotWriter {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn writer_loop(
    store: Arc<Store>,
    path: PathBuf,
    mut signal_rx: mpsc::Receiver<()>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(SAVE_INTERVAL);
    ticker.tick().await; // the first tick completes immediately

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                save_logged(&store, &path);
            }
            signal = signal_rx.recv() => {
                if signal.is_none() {
                    return; // store dropped
                }
                // Wait briefly for a follow-up signal so a burst of writes
                // becomes one save; save either way.
                tokio::select! {
                    _ = tokio::time::sleep(DEBOUNCE_WINDOW) => {}
                    _ = signal_rx.recv() => {}
                }
                save_logged(&store, &path);
            }
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("snapshot writer shutting down");
                    return;
                }
            }
        }
    }
}

fn save_logged(store: &Store, path: &Path) {
    match save(store, path) {
        Ok(()) => debug!(path = %path.display(), "snapshot saved"),
        Err(e) => warn!(path = %path.display(), error = %e, "snapshot save failed"),
    }
}
