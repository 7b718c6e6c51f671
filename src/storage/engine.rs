//! Typed key-value store with per-key expiration.
//!
//! The store is a single map from key to [`Value`], where a value is one of
//! three kinds: a string, a list of strings, or a hash of string fields.
//! Every value carries an optional absolute expiration instant; an entry
//! whose expiration is in the past is logically absent and is removed
//! either lazily on access or in bulk by the background sweeper.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        Store                             │
//! │            RwLock<HashMap<String, Value>>                │
//! │   readers overlap, writers are exclusive, no per-key     │
//! │   locking                                                │
//! └──────────────────────────────────────────────────────────┘
//!          │                                │
//!          │ try_send (never blocks)        │ append + fsync
//!          ▼                                ▼
//!   snapshot writer task              AOF log (optional)
//! ```
//!
//! A mutation never holds the map lock across I/O: the lock is released
//! first, then the command is appended to the AOF and the snapshot writer
//! is signalled. Lazy expiration on a read path likewise drops the read
//! guard before taking the write lock, so a reader can never deadlock
//! against itself.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, OnceLock, RwLock};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;

use crate::persistence::AofLog;

/// Errors surfaced by store operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Key absent, expired, or (for hashes) field absent.
    #[error("key not found")]
    NotFound,

    /// The existing value has the wrong kind for this operation. The
    /// payload names the kind the operation expected.
    #[error("value is not a {0}")]
    TypeMismatch(&'static str),

    /// List index outside `[-len, len-1]`.
    #[error("index out of range")]
    OutOfRange,
}

/// The payload of a stored value: one of the three supported kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueData {
    Str(String),
    List(VecDeque<String>),
    Hash(HashMap<String, String>),
}

impl ValueData {
    /// Kind ordinal used by the snapshot format (string=0, list=1, hash=2).
    pub fn kind_ordinal(&self) -> u8 {
        match self {
            ValueData::Str(_) => 0,
            ValueData::List(_) => 1,
            ValueData::Hash(_) => 2,
        }
    }
}

/// A stored value with its optional absolute expiration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Value {
    pub data: ValueData,
    pub expires_at: Option<SystemTime>,
}

impl Value {
    pub fn new(data: ValueData) -> Self {
        Self {
            data,
            expires_at: None,
        }
    }

    #[inline]
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .map(|exp| SystemTime::now() >= exp)
            .unwrap_or(false)
    }
}

/// The in-memory database: a typed map guarded by one reader/writer lock,
/// wired to the snapshot writer through a bounded signal channel and to an
/// optional append-only log.
///
/// Construct the store first and install the AOF afterwards with
/// [`Store::install_aof`]; replay goes through the `apply_*` primitives,
/// which neither log nor signal.
pub struct Store {
    data: RwLock<HashMap<String, Value>>,

    /// Level-trigger towards the snapshot writer. `try_send` only; a full
    /// queue drops the signal, which is safe because the writer also saves
    /// on a periodic timer.
    snapshot_tx: mpsc::Sender<()>,

    /// Installed after construction when AOF persistence is enabled.
    aof: OnceLock<Arc<AofLog>>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = self.data.read().unwrap().len();
        f.debug_struct("Store")
            .field("keys", &len)
            .field("aof", &self.aof.get().is_some())
            .finish()
    }
}

impl Store {
    /// Creates an empty store that signals `snapshot_tx` after mutations.
    pub fn new(snapshot_tx: mpsc::Sender<()>) -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            snapshot_tx,
            aof: OnceLock::new(),
        }
    }

    /// Installs the append-only log. Later mutations are logged to it;
    /// calling twice is a no-op.
    pub fn install_aof(&self, aof: Arc<AofLog>) {
        let _ = self.aof.set(aof);
    }

    /// Non-blocking signal to the snapshot writer; dropped on overflow.
    fn notify_dirty(&self) {
        let _ = self.snapshot_tx.try_send(());
    }

    fn log_aof(&self, cmd: &str, args: &[&str]) {
        if let Some(aof) = self.aof.get() {
            if let Err(e) = aof.append(cmd, args) {
                warn!(command = cmd, error = %e, "AOF append failed");
            }
        }
    }

    // ========================================================================
    // String operations
    // ========================================================================

    /// Sets `key` to a string value, replacing any existing value of any
    /// kind. `ttl` of `None` means the key never expires.
    pub fn set(&self, key: &str, value: &str, ttl: Option<Duration>) {
        let expires_at = ttl.map(|d| SystemTime::now() + d);
        {
            let mut data = self.data.write().unwrap();
            data.insert(
                key.to_string(),
                Value {
                    data: ValueData::Str(value.to_string()),
                    expires_at,
                },
            );
        }

        match ttl {
            Some(d) => self.log_aof("SET", &[key, value, &d.as_secs().to_string()]),
            None => self.log_aof("SET", &[key, value]),
        }
        self.notify_dirty();
    }

    /// Returns the string value of `key`. An expired entry is removed and
    /// reported as absent; a list or hash under this key is a type error.
    pub fn get(&self, key: &str) -> Result<String, StoreError> {
        {
            let data = self.data.read().unwrap();
            match data.get(key) {
                None => return Err(StoreError::NotFound),
                Some(value) if value.is_expired() => {} // fall through to removal
                Some(value) => match &value.data {
                    ValueData::Str(s) => return Ok(s.clone()),
                    _ => return Err(StoreError::TypeMismatch("string")),
                },
            }
        }

        // Expired: the read guard is dropped above, so taking the write
        // lock here cannot deadlock against ourselves.
        self.remove_if_expired(key);
        Err(StoreError::NotFound)
    }

    /// Deletes `key` of any kind.
    pub fn del(&self, key: &str) -> Result<(), StoreError> {
        let removed = {
            let mut data = self.data.write().unwrap();
            data.remove(key).is_some()
        };
        if !removed {
            return Err(StoreError::NotFound);
        }

        self.log_aof("DEL", &[key]);
        self.notify_dirty();
        Ok(())
    }

    /// Sets the expiration of `key` to `now + ttl`.
    pub fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        {
            let mut data = self.data.write().unwrap();
            let expired = match data.get(key) {
                None => return Err(StoreError::NotFound),
                Some(value) => value.is_expired(),
            };
            if expired {
                data.remove(key);
                return Err(StoreError::NotFound);
            }
            if let Some(value) = data.get_mut(key) {
                value.expires_at = Some(SystemTime::now() + ttl);
            }
        }

        self.log_aof("EXPIRE", &[key, &ttl.as_secs().to_string()]);
        self.notify_dirty();
        Ok(())
    }

    /// Remaining time to live: `Ok(Some(d))` with a TTL, `Ok(None)` for a
    /// persistent key, `NotFound` for an absent or expired key.
    pub fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let data = self.data.read().unwrap();
        match data.get(key) {
            None => Err(StoreError::NotFound),
            Some(value) if value.is_expired() => Err(StoreError::NotFound),
            Some(value) => match value.expires_at {
                None => Ok(None),
                Some(exp) => Ok(Some(
                    exp.duration_since(SystemTime::now())
                        .unwrap_or(Duration::ZERO),
                )),
            },
        }
    }

    /// Snapshot of every live key and its payload, skipping expired
    /// entries.
    pub fn all(&self) -> Vec<(String, ValueData)> {
        let data = self.data.read().unwrap();
        data.iter()
            .filter(|(_, v)| !v.is_expired())
            .map(|(k, v)| (k.clone(), v.data.clone()))
            .collect()
    }

    // ========================================================================
    // List operations
    // ========================================================================

    /// Prepends values to the list at `key`, creating it if absent. Values
    /// are pushed to the head one by one, so the last argument ends up at
    /// index 0 (Redis semantics).
    pub fn lpush(&self, key: &str, values: &[String]) -> Result<usize, StoreError> {
        let len = {
            let mut data = self.data.write().unwrap();
            let list = take_list_mut(&mut data, key)?;
            for value in values {
                list.push_front(value.clone());
            }
            list.len()
        };

        self.log_list_push("LPUSH", key, values);
        self.notify_dirty();
        Ok(len)
    }

    /// Appends values to the list at `key`, creating it if absent.
    pub fn rpush(&self, key: &str, values: &[String]) -> Result<usize, StoreError> {
        let len = {
            let mut data = self.data.write().unwrap();
            let list = take_list_mut(&mut data, key)?;
            for value in values {
                list.push_back(value.clone());
            }
            list.len()
        };

        self.log_list_push("RPUSH", key, values);
        self.notify_dirty();
        Ok(len)
    }

    fn log_list_push(&self, cmd: &str, key: &str, values: &[String]) {
        let mut args: Vec<&str> = Vec::with_capacity(values.len() + 1);
        args.push(key);
        args.extend(values.iter().map(|s| s.as_str()));
        self.log_aof(cmd, &args);
    }

    /// Removes and returns the head of the list; deletes the key when the
    /// list becomes empty.
    pub fn lpop(&self, key: &str) -> Result<String, StoreError> {
        let item = {
            let mut data = self.data.write().unwrap();
            let list = existing_list_mut(&mut data, key)?;
            let item = list.pop_front().ok_or(StoreError::NotFound)?;
            if list.is_empty() {
                data.remove(key);
            }
            item
        };

        self.log_aof("LPOP", &[key]);
        self.notify_dirty();
        Ok(item)
    }

    /// Removes and returns the tail of the list; deletes the key when the
    /// list becomes empty.
    pub fn rpop(&self, key: &str) -> Result<String, StoreError> {
        let item = {
            let mut data = self.data.write().unwrap();
            let list = existing_list_mut(&mut data, key)?;
            let item = list.pop_back().ok_or(StoreError::NotFound)?;
            if list.is_empty() {
                data.remove(key);
            }
            item
        };

        self.log_aof("RPOP", &[key]);
        self.notify_dirty();
        Ok(item)
    }

    /// Inclusive range of list elements. Negative indices count from the
    /// tail; out-of-bound indices are clamped. Absent key yields an empty
    /// range.
    pub fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, StoreError> {
        let data = self.data.read().unwrap();
        let list = match live_list(&data, key)? {
            Some(list) => list,
            None => return Ok(Vec::new()),
        };

        match clamp_range(list.len(), start, stop) {
            Some((start, stop)) => Ok(list
                .iter()
                .skip(start)
                .take(stop - start + 1)
                .cloned()
                .collect()),
            None => Ok(Vec::new()),
        }
    }

    /// Length of the list, 0 when the key is absent.
    pub fn llen(&self, key: &str) -> Result<usize, StoreError> {
        let data = self.data.read().unwrap();
        Ok(live_list(&data, key)?.map(|l| l.len()).unwrap_or(0))
    }

    /// Element at a signed index.
    pub fn lindex(&self, key: &str, index: i64) -> Result<String, StoreError> {
        let data = self.data.read().unwrap();
        let list = live_list(&data, key)?.ok_or(StoreError::NotFound)?;
        let idx = resolve_index(list.len(), index).ok_or(StoreError::OutOfRange)?;
        Ok(list[idx].clone())
    }

    /// Replaces the element at a signed index.
    pub fn lset(&self, key: &str, index: i64, value: &str) -> Result<(), StoreError> {
        {
            let mut data = self.data.write().unwrap();
            let list = existing_list_mut(&mut data, key)?;
            let idx = resolve_index(list.len(), index).ok_or(StoreError::OutOfRange)?;
            list[idx] = value.to_string();
        }

        self.log_aof("LSET", &[key, &index.to_string(), value]);
        self.notify_dirty();
        Ok(())
    }

    /// Removes elements equal to `value`:
    ///
    /// - `count > 0`: scan head→tail, stop after `count` removals
    /// - `count < 0`: scan tail→head, stop after `|count|`
    /// - `count = 0`: remove every match
    ///
    /// Returns the number removed; deletes the key if the list empties.
    pub fn lrem(&self, key: &str, count: i64, value: &str) -> Result<usize, StoreError> {
        let removed = {
            let mut data = self.data.write().unwrap();
            let list = match live_list_mut(&mut data, key)? {
                Some(list) => list,
                None => return Ok(0),
            };

            let max_remove = if count == 0 {
                usize::MAX
            } else {
                count.unsigned_abs() as usize
            };
            let mut removed = 0usize;

            if count >= 0 {
                let mut i = 0;
                while i < list.len() && removed < max_remove {
                    if list[i] == value {
                        list.remove(i);
                        removed += 1;
                    } else {
                        i += 1;
                    }
                }
            } else {
                let mut i = list.len();
                while i > 0 && removed < max_remove {
                    i -= 1;
                    if list[i] == value {
                        list.remove(i);
                        removed += 1;
                    }
                }
            }

            if list.is_empty() {
                data.remove(key);
            }
            removed
        };

        if removed > 0 {
            self.log_aof("LREM", &[key, &count.to_string(), value]);
            self.notify_dirty();
        }
        Ok(removed)
    }

    /// Trims the list to the inclusive range; an empty result deletes the
    /// key. Trimming an absent key is a no-op.
    pub fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<(), StoreError> {
        {
            let mut data = self.data.write().unwrap();
            let list = match live_list_mut(&mut data, key)? {
                Some(list) => list,
                None => return Ok(()),
            };

            match clamp_range(list.len(), start, stop) {
                Some((start, stop)) => {
                    list.truncate(stop + 1);
                    for _ in 0..start {
                        list.pop_front();
                    }
                }
                None => {
                    data.remove(key);
                }
            }
        }

        self.log_aof("LTRIM", &[key, &start.to_string(), &stop.to_string()]);
        self.notify_dirty();
        Ok(())
    }

    // ========================================================================
    // Hash operations
    // ========================================================================

    /// Sets a hash field, creating the hash if absent. Returns 1 when the
    /// field is new, 0 when it was updated.
    pub fn hset(&self, key: &str, field: &str, value: &str) -> Result<i64, StoreError> {
        let created = {
            let mut data = self.data.write().unwrap();
            let hash = take_hash_mut(&mut data, key)?;
            hash.insert(field.to_string(), value.to_string()).is_none()
        };

        self.log_aof("HSET", &[key, field, value]);
        self.notify_dirty();
        Ok(if created { 1 } else { 0 })
    }

    /// Value of a hash field; absent key or field reports `NotFound`.
    pub fn hget(&self, key: &str, field: &str) -> Result<String, StoreError> {
        let data = self.data.read().unwrap();
        let hash = live_hash(&data, key)?.ok_or(StoreError::NotFound)?;
        hash.get(field).cloned().ok_or(StoreError::NotFound)
    }

    /// Removes fields from a hash; returns the number removed and deletes
    /// the key once the last field is gone.
    pub fn hdel(&self, key: &str, fields: &[String]) -> Result<usize, StoreError> {
        let removed = {
            let mut data = self.data.write().unwrap();
            let hash = match live_hash_mut(&mut data, key)? {
                Some(hash) => hash,
                None => return Ok(0),
            };

            let mut removed = 0usize;
            for field in fields {
                if hash.remove(field).is_some() {
                    removed += 1;
                }
            }
            if hash.is_empty() {
                data.remove(key);
            }
            removed
        };

        if removed > 0 {
            let mut args: Vec<&str> = Vec::with_capacity(fields.len() + 1);
            args.push(key);
            args.extend(fields.iter().map(|s| s.as_str()));
            self.log_aof("HDEL", &args);
            self.notify_dirty();
        }
        Ok(removed)
    }

    pub fn hexists(&self, key: &str, field: &str) -> Result<bool, StoreError> {
        let data = self.data.read().unwrap();
        Ok(live_hash(&data, key)?
            .map(|h| h.contains_key(field))
            .unwrap_or(false))
    }

    pub fn hlen(&self, key: &str) -> Result<usize, StoreError> {
        let data = self.data.read().unwrap();
        Ok(live_hash(&data, key)?.map(|h| h.len()).unwrap_or(0))
    }

    pub fn hkeys(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let data = self.data.read().unwrap();
        Ok(live_hash(&data, key)?
            .map(|h| h.keys().cloned().collect())
            .unwrap_or_default())
    }

    pub fn hvals(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let data = self.data.read().unwrap();
        Ok(live_hash(&data, key)?
            .map(|h| h.values().cloned().collect())
            .unwrap_or_default())
    }

    /// Every field/value pair of the hash; empty for an absent key.
    pub fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>, StoreError> {
        let data = self.data.read().unwrap();
        Ok(live_hash(&data, key)?
            .map(|h| h.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    // ========================================================================
    // Expiration support
    // ========================================================================

    /// Removes `key` if (and only if) it is currently expired.
    fn remove_if_expired(&self, key: &str) {
        let mut data = self.data.write().unwrap();
        if data.get(key).map(|v| v.is_expired()).unwrap_or(false) {
            data.remove(key);
            drop(data);
            self.notify_dirty();
        }
    }

    /// One sweeper pass: collect expired keys under the read lock, then
    /// delete them under the write lock with a re-check. Returns the number
    /// of keys evicted.
    pub fn sweep_expired(&self) -> usize {
        let now = SystemTime::now();
        let candidates: Vec<String> = {
            let data = self.data.read().unwrap();
            data.iter()
                .filter(|(_, v)| matches!(v.expires_at, Some(exp) if now >= exp))
                .map(|(k, _)| k.clone())
                .collect()
        };

        if candidates.is_empty() {
            return 0;
        }

        let mut evicted = 0;
        {
            let mut data = self.data.write().unwrap();
            for key in &candidates {
                if data.get(key).map(|v| v.is_expired()).unwrap_or(false) {
                    data.remove(key);
                    evicted += 1;
                }
            }
        }

        if evicted > 0 {
            self.notify_dirty();
        }
        evicted
    }

    // ========================================================================
    // Replay and snapshot primitives (no logging, no signalling)
    // ========================================================================

    /// Inserts an entry verbatim; used by the snapshot loader.
    pub(crate) fn load_entry(&self, key: String, value: Value) {
        let mut data = self.data.write().unwrap();
        data.insert(key, value);
    }

    /// Clones the entire map, expired entries included; used by the
    /// snapshot writer and the AOF rewrite.
    pub(crate) fn dump(&self) -> Vec<(String, Value)> {
        let data = self.data.read().unwrap();
        data.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    pub(crate) fn apply_set(&self, key: &str, value: &str, ttl: Option<Duration>) {
        let expires_at = ttl.map(|d| SystemTime::now() + d);
        let mut data = self.data.write().unwrap();
        data.insert(
            key.to_string(),
            Value {
                data: ValueData::Str(value.to_string()),
                expires_at,
            },
        );
    }

    pub(crate) fn apply_del(&self, key: &str) {
        let mut data = self.data.write().unwrap();
        data.remove(key);
    }

    pub(crate) fn apply_expire(&self, key: &str, ttl: Duration) {
        let mut data = self.data.write().unwrap();
        if let Some(value) = data.get_mut(key) {
            value.expires_at = Some(SystemTime::now() + ttl);
        }
    }

    pub(crate) fn apply_lpush(&self, key: &str, values: &[String]) {
        let mut data = self.data.write().unwrap();
        if let Ok(list) = take_list_mut(&mut data, key) {
            for value in values {
                list.push_front(value.clone());
            }
        }
    }

    pub(crate) fn apply_rpush(&self, key: &str, values: &[String]) {
        let mut data = self.data.write().unwrap();
        if let Ok(list) = take_list_mut(&mut data, key) {
            for value in values {
                list.push_back(value.clone());
            }
        }
    }

    pub(crate) fn apply_lpop(&self, key: &str) {
        let mut data = self.data.write().unwrap();
        if let Ok(list) = existing_list_mut(&mut data, key) {
            list.pop_front();
            if list.is_empty() {
                data.remove(key);
            }
        }
    }

    pub(crate) fn apply_rpop(&self, key: &str) {
        let mut data = self.data.write().unwrap();
        if let Ok(list) = existing_list_mut(&mut data, key) {
            list.pop_back();
            if list.is_empty() {
                data.remove(key);
            }
        }
    }

    pub(crate) fn apply_lset(&self, key: &str, index: i64, value: &str) {
        let mut data = self.data.write().unwrap();
        if let Ok(list) = existing_list_mut(&mut data, key) {
            if let Some(idx) = resolve_index(list.len(), index) {
                list[idx] = value.to_string();
            }
        }
    }

    pub(crate) fn apply_lrem(&self, key: &str, count: i64, value: &str) {
        let mut data = self.data.write().unwrap();
        if let Ok(Some(list)) = live_list_mut(&mut data, key) {
            let max_remove = if count == 0 {
                usize::MAX
            } else {
                count.unsigned_abs() as usize
            };
            let mut removed = 0usize;
            if count >= 0 {
                let mut i = 0;
                while i < list.len() && removed < max_remove {
                    if list[i] == value {
                        list.remove(i);
                        removed += 1;
                    } else {
                        i += 1;
                    }
                }
            } else {
                let mut i = list.len();
                while i > 0 && removed < max_remove {
                    i -= 1;
                    if list[i] == value {
                        list.remove(i);
                        removed += 1;
                    }
                }
            }
            if list.is_empty() {
                data.remove(key);
            }
        }
    }

    pub(crate) fn apply_ltrim(&self, key: &str, start: i64, stop: i64) {
        let mut data = self.data.write().unwrap();
        if let Ok(Some(list)) = live_list_mut(&mut data, key) {
            match clamp_range(list.len(), start, stop) {
                Some((start, stop)) => {
                    list.truncate(stop + 1);
                    for _ in 0..start {
                        list.pop_front();
                    }
                }
                None => {
                    data.remove(key);
                }
            }
        }
    }

    pub(crate) fn apply_hset(&self, key: &str, field: &str, value: &str) {
        let mut data = self.data.write().unwrap();
        if let Ok(hash) = take_hash_mut(&mut data, key) {
            hash.insert(field.to_string(), value.to_string());
        }
    }

    pub(crate) fn apply_hdel(&self, key: &str, fields: &[String]) {
        let mut data = self.data.write().unwrap();
        if let Ok(Some(hash)) = live_hash_mut(&mut data, key) {
            for field in fields {
                hash.remove(field);
            }
            if hash.is_empty() {
                data.remove(key);
            }
        }
    }
}

// ============================================================================
// Map access helpers
// ============================================================================

/// Resolves a signed index against `len`; negative counts from the tail.
fn resolve_index(len: usize, index: i64) -> Option<usize> {
    let len = len as i64;
    let idx = if index < 0 { len + index } else { index };
    if idx < 0 || idx >= len {
        None
    } else {
        Some(idx as usize)
    }
}

/// Normalizes an inclusive signed range. Returns `None` when the range is
/// empty after clamping.
fn clamp_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    let mut start = if start < 0 { len + start } else { start };
    let mut stop = if stop < 0 { len + stop } else { stop };

    if start < 0 {
        start = 0;
    }
    if stop >= len {
        stop = len - 1;
    }
    if start > stop || start >= len {
        None
    } else {
        Some((start as usize, stop as usize))
    }
}

/// The list at `key`, creating it if absent and resetting it if expired.
/// Fails when the live entry is not a list.
fn take_list_mut<'a>(
    data: &'a mut HashMap<String, Value>,
    key: &str,
) -> Result<&'a mut VecDeque<String>, StoreError> {
    if data.get(key).map(|v| v.is_expired()).unwrap_or(false) {
        data.remove(key);
    }

    let entry = data
        .entry(key.to_string())
        .or_insert_with(|| Value::new(ValueData::List(VecDeque::new())));
    match &mut entry.data {
        ValueData::List(list) => Ok(list),
        _ => Err(StoreError::TypeMismatch("list")),
    }
}

/// The list at `key`, failing when the key is absent or expired.
fn existing_list_mut<'a>(
    data: &'a mut HashMap<String, Value>,
    key: &str,
) -> Result<&'a mut VecDeque<String>, StoreError> {
    if data.get(key).map(|v| v.is_expired()).unwrap_or(false) {
        data.remove(key);
    }
    match data.get_mut(key) {
        None => Err(StoreError::NotFound),
        Some(value) => match &mut value.data {
            ValueData::List(list) => Ok(list),
            _ => Err(StoreError::TypeMismatch("list")),
        },
    }
}

/// The list at `key` under a read guard; `Ok(None)` when absent or expired.
fn live_list<'a>(
    data: &'a HashMap<String, Value>,
    key: &str,
) -> Result<Option<&'a VecDeque<String>>, StoreError> {
    match data.get(key) {
        None => Ok(None),
        Some(value) if value.is_expired() => Ok(None),
        Some(value) => match &value.data {
            ValueData::List(list) => Ok(Some(list)),
            _ => Err(StoreError::TypeMismatch("list")),
        },
    }
}

/// Mutable variant of [`live_list`]; removes the entry if it sits expired.
fn live_list_mut<'a>(
    data: &'a mut HashMap<String, Value>,
    key: &str,
) -> Result<Option<&'a mut VecDeque<String>>, StoreError> {
    if data.get(key).map(|v| v.is_expired()).unwrap_or(false) {
        data.remove(key);
        return Ok(None);
    }
    match data.get_mut(key) {
        None => Ok(None),
        Some(value) => match &mut value.data {
            ValueData::List(list) => Ok(Some(list)),
            _ => Err(StoreError::TypeMismatch("list")),
        },
    }
}

fn take_hash_mut<'a>(
    data: &'a mut HashMap<String, Value>,
    key: &str,
) -> Result<&'a mut HashMap<String, String>, StoreError> {
    if data.get(key).map(|v| v.is_expired()).unwrap_or(false) {
        data.remove(key);
    }

    let entry = data
        .entry(key.to_string())
        .or_insert_with(|| Value::new(ValueData::Hash(HashMap::new())));
    match &mut entry.data {
        ValueData::Hash(hash) => Ok(hash),
        _ => Err(StoreError::TypeMismatch("hash")),
    }
}

fn live_hash<'a>(
    data: &'a HashMap<String, Value>,
    key: &str,
) -> Result<Option<&'a HashMap<String, String>>, StoreError> {
    match data.get(key) {
        None => Ok(None),
        Some(value) if value.is_expired() => Ok(None),
        Some(value) => match &value.data {
            ValueData::Hash(hash) => Ok(Some(hash)),
            _ => Err(StoreError::TypeMismatch("hash")),
        },
    }
}

fn live_hash_mut<'a>(
    data: &'a mut HashMap<String, Value>,
    key: &str,
) -> Result<Option<&'a mut HashMap<String, String>>, StoreError> {
    if data.get(key).map(|v| v.is_expired()).unwrap_or(false) {
        data.remove(key);
        return Ok(None);
    }
    match data.get_mut(key) {
        None => Ok(None),
        Some(value) => match &mut value.data {
            ValueData::Hash(hash) => Ok(Some(hash)),
            _ => Err(StoreError::TypeMismatch("hash")),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_store() -> Store {
        let (tx, _rx) = mpsc::channel(100);
        Store::new(tx)
    }

    #[test]
    fn set_and_get() {
        let store = new_store();
        store.set("name", "harsh", None);
        assert_eq!(store.get("name").unwrap(), "harsh");
    }

    #[test]
    fn get_missing_key() {
        let store = new_store();
        assert_eq!(store.get("nope"), Err(StoreError::NotFound));
    }

    #[test]
    fn set_overwrites_any_kind() {
        let store = new_store();
        store.rpush("k", &["a".to_string()]).unwrap();
        store.set("k", "v", None);
        assert_eq!(store.get("k").unwrap(), "v");
    }

    #[test]
    fn del() {
        let store = new_store();
        store.set("k", "v", None);
        assert!(store.del("k").is_ok());
        assert_eq!(store.del("k"), Err(StoreError::NotFound));
        assert_eq!(store.get("k"), Err(StoreError::NotFound));
    }

    #[test]
    fn expired_key_is_absent() {
        let store = new_store();
        store.set("k", "v", Some(Duration::from_millis(30)));
        assert_eq!(store.get("k").unwrap(), "v");

        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(store.get("k"), Err(StoreError::NotFound));
        // Lazy expiration removed the entry entirely.
        assert!(store.all().is_empty());
    }

    #[test]
    fn ttl_reporting() {
        let store = new_store();
        assert_eq!(store.ttl("missing"), Err(StoreError::NotFound));

        store.set("persistent", "v", None);
        assert_eq!(store.ttl("persistent").unwrap(), None);

        store.set("ephemeral", "v", Some(Duration::from_secs(100)));
        let ttl = store.ttl("ephemeral").unwrap().unwrap();
        assert!(ttl > Duration::ZERO && ttl <= Duration::from_secs(100));
    }

    #[test]
    fn expire_existing_key() {
        let store = new_store();
        store.set("k", "v", None);
        store.expire("k", Duration::from_secs(50)).unwrap();
        assert!(store.ttl("k").unwrap().is_some());

        assert_eq!(
            store.expire("missing", Duration::from_secs(1)),
            Err(StoreError::NotFound)
        );
    }

    #[test]
    fn all_skips_expired() {
        let store = new_store();
        store.set("live", "1", None);
        store.set("dead", "2", Some(Duration::from_millis(10)));
        std::thread::sleep(Duration::from_millis(30));

        let all = store.all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].0, "live");
    }

    #[test]
    fn type_mismatch_leaves_value_unchanged() {
        let store = new_store();
        store.set("s", "hello", None);
        assert_eq!(
            store.lpush("s", &["x".to_string()]),
            Err(StoreError::TypeMismatch("list"))
        );
        assert_eq!(
            store.hset("s", "f", "v"),
            Err(StoreError::TypeMismatch("hash"))
        );
        assert_eq!(store.get("s").unwrap(), "hello");

        store.rpush("l", &["a".to_string()]).unwrap();
        assert_eq!(store.get("l"), Err(StoreError::TypeMismatch("string")));
    }

    #[test]
    fn lpush_reverse_insertion() {
        let store = new_store();
        store
            .rpush("list", &["a".into(), "b".into(), "c".into()])
            .unwrap();
        let len = store.lpush("list", &["x".into(), "y".into()]).unwrap();
        assert_eq!(len, 5);
        assert_eq!(
            store.lrange("list", 0, -1).unwrap(),
            vec!["y", "x", "a", "b", "c"]
        );
    }

    #[test]
    fn rpush_keeps_order() {
        let store = new_store();
        store
            .rpush("k", &["x1".into(), "x2".into(), "x3".into()])
            .unwrap();
        assert_eq!(store.lrange("k", 0, -1).unwrap(), vec!["x1", "x2", "x3"]);
        assert_eq!(store.llen("k").unwrap(), 3);
    }

    #[test]
    fn pop_both_ends_and_empty_deletion() {
        let store = new_store();
        assert_eq!(store.lpop("k"), Err(StoreError::NotFound));

        store
            .rpush("k", &["a".into(), "b".into(), "c".into()])
            .unwrap();
        assert_eq!(store.lpop("k").unwrap(), "a");
        assert_eq!(store.rpop("k").unwrap(), "c");
        assert_eq!(store.lpop("k").unwrap(), "b");

        // Last pop removed the key itself.
        assert!(store.all().is_empty());
        assert_eq!(store.lpop("k"), Err(StoreError::NotFound));
    }

    #[test]
    fn lrange_clamping() {
        let store = new_store();
        store
            .rpush(
                "k",
                &["a".into(), "b".into(), "c".into(), "d".into(), "e".into()],
            )
            .unwrap();

        assert_eq!(store.lrange("k", 1, 3).unwrap(), vec!["b", "c", "d"]);
        assert_eq!(store.lrange("k", -3, -1).unwrap(), vec!["c", "d", "e"]);
        assert_eq!(
            store.lrange("k", 0, 100).unwrap(),
            vec!["a", "b", "c", "d", "e"]
        );
        assert_eq!(store.lrange("k", 3, 1).unwrap(), Vec::<String>::new());
        assert_eq!(store.lrange("k", 9, 12).unwrap(), Vec::<String>::new());
        assert_eq!(store.lrange("missing", 0, -1).unwrap(), Vec::<String>::new());
    }

    #[test]
    fn llen_matches_lrange() {
        let store = new_store();
        store.rpush("k", &["a".into(), "b".into()]).unwrap();
        assert_eq!(
            store.llen("k").unwrap(),
            store.lrange("k", 0, -1).unwrap().len()
        );
        assert_eq!(store.llen("missing").unwrap(), 0);
    }

    #[test]
    fn lindex_signed() {
        let store = new_store();
        store
            .rpush("k", &["a".into(), "b".into(), "c".into()])
            .unwrap();

        assert_eq!(store.lindex("k", 0).unwrap(), "a");
        assert_eq!(store.lindex("k", 2).unwrap(), "c");
        assert_eq!(store.lindex("k", -1).unwrap(), "c");
        assert_eq!(store.lindex("k", -3).unwrap(), "a");
        assert_eq!(store.lindex("k", 3), Err(StoreError::OutOfRange));
        assert_eq!(store.lindex("k", -4), Err(StoreError::OutOfRange));
        assert_eq!(store.lindex("missing", 0), Err(StoreError::NotFound));
    }

    #[test]
    fn lset_signed() {
        let store = new_store();
        store
            .rpush("k", &["a".into(), "b".into(), "c".into()])
            .unwrap();

        store.lset("k", 1, "B").unwrap();
        assert_eq!(store.lindex("k", 1).unwrap(), "B");

        store.lset("k", -1, "C").unwrap();
        assert_eq!(store.lindex("k", -1).unwrap(), "C");

        assert_eq!(store.lset("k", 10, "X"), Err(StoreError::OutOfRange));
        assert_eq!(store.lset("missing", 0, "X"), Err(StoreError::NotFound));
    }

    #[test]
    fn lrem_directions() {
        let store = new_store();

        // Head to tail, bounded.
        store
            .rpush(
                "k",
                &["a".into(), "b".into(), "a".into(), "c".into(), "a".into()],
            )
            .unwrap();
        assert_eq!(store.lrem("k", 2, "a").unwrap(), 2);
        assert_eq!(store.lrange("k", 0, -1).unwrap(), vec!["b", "c", "a"]);
        store.del("k").unwrap();

        // Tail to head, bounded.
        store
            .rpush(
                "k",
                &["a".into(), "b".into(), "a".into(), "c".into(), "a".into()],
            )
            .unwrap();
        assert_eq!(store.lrem("k", -2, "a").unwrap(), 2);
        assert_eq!(store.lrange("k", 0, -1).unwrap(), vec!["a", "b", "c"]);
        store.del("k").unwrap();

        // Count 0 removes all, and the key when it empties.
        store
            .rpush("k", &["a".into(), "a".into(), "a".into()])
            .unwrap();
        assert_eq!(store.lrem("k", 0, "a").unwrap(), 3);
        assert!(store.all().is_empty());

        assert_eq!(store.lrem("missing", 0, "a").unwrap(), 0);
    }

    #[test]
    fn ltrim_and_empty_deletion() {
        let store = new_store();
        store
            .rpush(
                "k",
                &["a".into(), "b".into(), "c".into(), "d".into(), "e".into()],
            )
            .unwrap();

        store.ltrim("k", 1, 3).unwrap();
        assert_eq!(store.lrange("k", 0, -1).unwrap(), vec!["b", "c", "d"]);

        // An empty range deletes the key.
        store.ltrim("k", 5, 10).unwrap();
        assert!(store.all().is_empty());

        // Trimming a missing key is a no-op.
        store.ltrim("missing", 0, 1).unwrap();
    }

    #[test]
    fn hset_hget_update() {
        let store = new_store();
        assert_eq!(store.hset("h", "f", "v").unwrap(), 1);
        assert_eq!(store.hget("h", "f").unwrap(), "v");

        assert_eq!(store.hset("h", "f", "v2").unwrap(), 0);
        assert_eq!(store.hget("h", "f").unwrap(), "v2");

        assert_eq!(store.hget("h", "missing"), Err(StoreError::NotFound));
        assert_eq!(store.hget("missing", "f"), Err(StoreError::NotFound));
    }

    #[test]
    fn hdel_and_empty_deletion() {
        let store = new_store();
        store.hset("h", "f1", "v1").unwrap();
        store.hset("h", "f2", "v2").unwrap();

        assert_eq!(
            store
                .hdel("h", &["f1".to_string(), "nope".to_string()])
                .unwrap(),
            1
        );
        assert_eq!(store.hlen("h").unwrap(), 1);

        assert_eq!(store.hdel("h", &["f2".to_string()]).unwrap(), 1);
        assert!(store.all().is_empty());

        assert_eq!(store.hdel("missing", &["f".to_string()]).unwrap(), 0);
    }

    #[test]
    fn hash_introspection() {
        let store = new_store();
        store.hset("h", "a", "1").unwrap();
        store.hset("h", "b", "2").unwrap();

        assert!(store.hexists("h", "a").unwrap());
        assert!(!store.hexists("h", "z").unwrap());
        assert_eq!(store.hlen("h").unwrap(), 2);

        let mut keys = store.hkeys("h").unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a", "b"]);

        let mut vals = store.hvals("h").unwrap();
        vals.sort();
        assert_eq!(vals, vec!["1", "2"]);

        let mut pairs = store.hgetall("h").unwrap();
        pairs.sort();
        assert_eq!(
            pairs,
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string())
            ]
        );

        assert_eq!(store.hlen("missing").unwrap(), 0);
        assert!(store.hkeys("missing").unwrap().is_empty());
    }

    #[test]
    fn push_on_expired_key_resets_it() {
        let store = new_store();
        store.set("k", "v", Some(Duration::from_millis(10)));
        std::thread::sleep(Duration::from_millis(30));

        // The expired string does not cause a type error; the key is reborn
        // as a list.
        assert_eq!(store.rpush("k", &["a".into()]).unwrap(), 1);
        assert_eq!(store.lrange("k", 0, -1).unwrap(), vec!["a"]);
    }

    #[test]
    fn sweep_expired_evicts_in_bulk() {
        let store = new_store();
        for i in 0..10 {
            store.set(&format!("k{}", i), "v", Some(Duration::from_millis(10)));
        }
        store.set("keep", "v", None);
        std::thread::sleep(Duration::from_millis(40));

        assert_eq!(store.sweep_expired(), 10);
        assert_eq!(store.sweep_expired(), 0);
        let all = store.all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].0, "keep");
    }

    #[test]
    fn mutations_signal_snapshot_writer() {
        let (tx, mut rx) = mpsc::channel(100);
        let store = Store::new(tx);

        store.set("k", "v", None);
        assert!(rx.try_recv().is_ok());

        store.rpush("l", &["a".into()]).unwrap();
        assert!(rx.try_recv().is_ok());

        // Reads do not signal.
        let _ = store.get("k");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn signal_overflow_is_dropped() {
        let (tx, _rx) = mpsc::channel(1);
        let store = Store::new(tx);
        // Channel holds one signal; the rest must be discarded silently.
        for i in 0..50 {
            store.set(&format!("k{}", i), "v", None);
        }
    }

    #[test]
    fn apply_primitives_do_not_signal() {
        let (tx, mut rx) = mpsc::channel(100);
        let store = Store::new(tx);

        store.apply_set("k", "v", None);
        store.apply_rpush("l", &["a".into(), "b".into()]);
        store.apply_hset("h", "f", "v");
        store.apply_expire("k", Duration::from_secs(60));
        store.apply_del("k");

        assert!(rx.try_recv().is_err());
        assert_eq!(store.lrange("l", 0, -1).unwrap(), vec!["a", "b"]);
        assert_eq!(store.hget("h", "f").unwrap(), "v");
        assert_eq!(store.get("k"), Err(StoreError::NotFound));
    }

    #[test]
    fn concurrent_writers() {
        use std::sync::Arc;
        use std::thread;

        let store = Arc::new(new_store());
        let mut handles = vec![];

        for i in 0..8 {
            let store = Arc::clone(&store);
            handles.push(thread::spawn(move || {
                for j in 0..100 {
                    let key = format!("key-{}-{}", i, j);
                    store.set(&key, "value", None);
                    store.get(&key).unwrap();
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.all().len(), 800);
    }
}
