//! Command registry: upper-cased name → handler function.
//!
//! One registry serves both protocols. The RESP loop hands the parsed
//! array straight to [`CommandRegistry::execute`]; the text loop wraps its
//! line tokens as bulk strings first. Handlers are plain functions over
//! shared server state, so the table is built once per server and shared
//! by every connection.

use crate::commands::{core, hash, list};
use crate::persistence::AofLog;
use crate::protocol::RespValue;
use crate::storage::{Store, StoreError};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Shared state handlers operate on.
pub struct ServerContext {
    pub store: Arc<Store>,
    /// Snapshot file path, used by `FLUSH`.
    pub db_path: PathBuf,
    /// Present when AOF persistence is enabled; used by `BGREWRITEAOF`.
    pub aof: Option<Arc<AofLog>>,
}

/// A command handler: server state and arguments in, reply out.
pub type HandlerFn = fn(&ServerContext, &[RespValue]) -> RespValue;

/// Name → handler table.
pub struct CommandRegistry {
    commands: HashMap<&'static str, HandlerFn>,
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRegistry {
    /// Builds the registry with every supported command installed.
    pub fn new() -> Self {
        let mut registry = Self {
            commands: HashMap::new(),
        };
        core::register(&mut registry);
        list::register(&mut registry);
        hash::register(&mut registry);
        registry
    }

    pub fn register(&mut self, name: &'static str, handler: HandlerFn) {
        self.commands.insert(name, handler);
    }

    /// Looks up `name` (case-insensitively) and runs its handler.
    pub fn dispatch(&self, ctx: &ServerContext, name: &str, args: &[RespValue]) -> RespValue {
        let upper = name.to_uppercase();
        match self.commands.get(upper.as_str()) {
            Some(handler) => handler(ctx, args),
            None => RespValue::error(format!("ERR unknown command '{}'", upper)),
        }
    }

    /// Executes a full command frame: an array whose first element is the
    /// command name.
    pub fn execute(&self, ctx: &ServerContext, command: RespValue) -> RespValue {
        let args = match command {
            RespValue::Array(args) => args,
            _ => return RespValue::error("ERR invalid command format"),
        };
        if args.is_empty() {
            return RespValue::error("ERR empty command");
        }

        let name = match args[0].as_str() {
            Some(name) => name.to_string(),
            None => return RespValue::error("ERR invalid command name"),
        };

        self.dispatch(ctx, &name, &args[1..])
    }
}

// ============================================================================
// Shared handler helpers
// ============================================================================

/// String form of an argument (bulk or simple string).
pub(crate) fn arg_str(value: &RespValue) -> Option<String> {
    value.as_str().map(|s| s.to_string())
}

/// Integer form of an argument; bulk/simple strings are parsed.
pub(crate) fn arg_int(value: &RespValue) -> Option<i64> {
    match value {
        RespValue::Integer(n) => Some(*n),
        other => other.as_str().and_then(|s| s.parse().ok()),
    }
}

pub(crate) fn err_arity(cmd: &str) -> RespValue {
    RespValue::error(format!("ERR wrong number of arguments for '{}'", cmd))
}

pub(crate) fn err_not_integer() -> RespValue {
    RespValue::error("ERR value is not an integer or out of range")
}

/// Maps a store error to its wire form: absence is a null bulk, the rest
/// are `-ERR` replies.
pub(crate) fn store_reply(e: StoreError) -> RespValue {
    match e {
        StoreError::NotFound => RespValue::Null,
        other => RespValue::error(format!("ERR {}", other)),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use bytes::Bytes;
    use tokio::sync::mpsc;

    /// Context over a fresh store, no AOF, snapshot path in a throwaway
    /// temp directory.
    pub fn new_context() -> (ServerContext, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = mpsc::channel(100);
        let ctx = ServerContext {
            store: Arc::new(Store::new(tx)),
            db_path: dir.path().join("data.json"),
            aof: None,
        };
        (ctx, dir)
    }

    pub fn command(args: &[&str]) -> RespValue {
        RespValue::Array(
            args.iter()
                .map(|s| RespValue::bulk_string(Bytes::from(s.to_string())))
                .collect(),
        )
    }
}
