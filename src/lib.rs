//! # FlexDB - An In-Memory Key-Value Database with Durable Persistence
//!
//! FlexDB is a single-node, in-memory key-value database serving concurrent
//! network clients over two protocols on one TCP port: a line-based text
//! protocol and the Redis wire protocol (RESP). Data lives entirely in RAM;
//! durability comes from two independent mechanisms, periodic JSON
//! snapshots and an optional append-only command log.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                              FlexDB                                │
//! │                                                                    │
//! │  ┌────────────┐   ┌────────────────┐   ┌──────────────────┐        │
//! │  │ TCP Server │──>│ Protocol       │──>│ Command Registry │        │
//! │  │ (Listener) │   │ Detector       │   │ (both protocols) │        │
//! │  └────────────┘   │ text? RESP?    │   └────────┬─────────┘        │
//! │                   └────────────────┘            │                  │
//! │                                                 ▼                  │
//! │  ┌─────────────┐              ┌─────────────────────────────┐      │
//! │  │ RESP Parser │              │            Store            │      │
//! │  │  / Encoder  │              │ RwLock<HashMap<String, V>>  │      │
//! │  └─────────────┘              │  Str | List | Hash (+TTL)   │      │
//! │                               └──────┬───────────────┬──────┘      │
//! │                                      │               │             │
//! │                  signal (bounded)    │               │ append      │
//! │                                      ▼               ▼             │
//! │                         ┌─────────────────┐   ┌────────────┐       │
//! │                         │ Snapshot Writer │   │  AOF Log   │       │
//! │                         │ (2 s + debounce)│   │ (3 fsync   │       │
//! │                         └─────────────────┘   │  policies) │       │
//! │                                               └────────────┘       │
//! │                         ┌─────────────────┐                        │
//! │                         │ Expiry Sweeper  │  (1 Hz eviction)       │
//! │                         └─────────────────┘                        │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Recovery
//!
//! On startup the snapshot is loaded first (an older point in time), then
//! the AOF is replayed over it (the tail of history). Replay goes through
//! mutation primitives that neither re-log nor signal the snapshot
//! writer, so recovery is deterministic and side-effect free.
//!
//! ## Module Overview
//!
//! - [`protocol`]: RESP value types, encoder, and incremental parser
//! - [`storage`]: the typed store and the background expiration sweeper
//! - [`persistence`]: snapshot writer and append-only log
//! - [`commands`]: the command registry serving both protocols
//! - [`connection`]: protocol detection and per-client loops

pub mod commands;
pub mod connection;
pub mod persistence;
pub mod protocol;
pub mod storage;

pub use commands::{CommandRegistry, ServerContext};
pub use connection::{handle_connection, ConnectionStats};
pub use persistence::{AofLog, SnapshotWriter, SyncPolicy};
pub use protocol::{RespParser, RespValue};
pub use storage::{ExpirySweeper, Store, StoreError};

/// Default TCP port.
pub const DEFAULT_PORT: u16 = 9000;

/// Default snapshot file path.
pub const DEFAULT_DB_FILE: &str = "data.json";

/// Default append-only log path.
pub const DEFAULT_AOF_FILE: &str = "flexdb.aof";

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
