//! Client connections: protocol auto-detection and the per-client loops.
//!
//! Every accepted socket gets its own task running
//! [`handle_connection`]. The first byte decides whether the client
//! speaks RESP or the line-based text protocol; both end up dispatching
//! through the shared command registry.

pub mod handler;

pub use handler::{handle_connection, ConnectionError, ConnectionStats};
