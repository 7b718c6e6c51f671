//! In-memory storage: the typed value store and its expiration sweeper.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        Store                             │
//! │            RwLock<HashMap<String, Value>>                │
//! │         Value = Str | List | Hash (+ optional TTL)       │
//! └──────────────────────────────────────────────────────────┘
//!                            ▲
//!                            │ sweep_expired() at 1 Hz
//!              ┌─────────────┴─────────────┐
//!              │       ExpirySweeper       │
//!              │   (background tokio task) │
//!              └───────────────────────────┘
//! ```
//!
//! Expired keys are removed two ways: lazily, when an access notices the
//! expiration, and in bulk by the sweeper for keys that are never touched
//! again.

pub mod engine;
pub mod expiry;

pub use engine::{Store, StoreError, Value, ValueData};
pub use expiry::ExpirySweeper;
