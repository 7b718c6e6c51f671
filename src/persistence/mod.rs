//! Durability: periodic JSON snapshots and the append-only command log.
//!
//! The two mechanisms are independent. The snapshot writer is best-effort
//! and debounced; the AOF, when enabled, is the ordered record that makes
//! acknowledged writes survive a crash. Recovery loads the snapshot first
//! and replays the AOF over it.

pub mod aof;
pub mod snapshot;

pub use aof::{AofLog, SyncPolicy};
pub use snapshot::{SnapshotWriter, SIGNAL_QUEUE_SIZE};
