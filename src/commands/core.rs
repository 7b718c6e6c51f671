//! Core commands: strings, expiration, persistence control, introspection.

use crate::commands::registry::{
    arg_int, arg_str, err_arity, err_not_integer, store_reply, CommandRegistry, ServerContext,
};
use crate::persistence::snapshot;
use crate::protocol::RespValue;
use crate::storage::ValueData;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// One summary line per command, served by `HELP`.
pub const COMMAND_SUMMARIES: &[&str] = &[
    "SET key value [EX seconds | PX millis] - Set a string key with optional TTL",
    "GET key               - Get the value of a string key",
    "DEL key [key ...]     - Delete keys",
    "EXPIRE key seconds    - Set a TTL on a key",
    "TTL key               - Remaining TTL in seconds, -1 if none",
    "ALL                   - List all keys and values",
    "FLUSH                 - Force a snapshot save to disk",
    "BGREWRITEAOF          - Compact the append-only log in the background",
    "PING [message]        - Ping the server",
    "LPUSH key v [v ...]   - Prepend values to a list",
    "RPUSH key v [v ...]   - Append values to a list",
    "LPOP key / RPOP key   - Pop from the head / tail of a list",
    "LRANGE key start stop - Inclusive list slice, negative indices allowed",
    "LLEN key              - Length of a list",
    "LINDEX key index      - Element at a signed index",
    "LSET key index value  - Replace the element at a signed index",
    "LREM key count value  - Remove occurrences of value",
    "LTRIM key start stop  - Trim a list to a range",
    "HSET key field value  - Set a hash field",
    "HGET key field        - Get a hash field",
    "HDEL key field [f ...] - Delete hash fields",
    "HGETALL key           - All fields and values of a hash",
    "HEXISTS key field     - Whether a hash field exists",
    "HLEN key              - Number of fields in a hash",
    "HKEYS key / HVALS key - Field names / values of a hash",
    "HELP                  - Show this help message",
    "EXIT                  - Close the connection",
];

pub fn register(registry: &mut CommandRegistry) {
    registry.register("PING", cmd_ping);
    registry.register("SET", cmd_set);
    registry.register("GET", cmd_get);
    registry.register("DEL", cmd_del);
    registry.register("EXPIRE", cmd_expire);
    registry.register("TTL", cmd_ttl);
    registry.register("ALL", cmd_all);
    registry.register("FLUSH", cmd_flush);
    registry.register("BGREWRITEAOF", cmd_bgrewriteaof);
    registry.register("HELP", cmd_help);
}

/// PING [message]
fn cmd_ping(_ctx: &ServerContext, args: &[RespValue]) -> RespValue {
    match args.first() {
        None => RespValue::pong(),
        Some(msg) => msg.clone(),
    }
}

/// SET key value [EX seconds | PX milliseconds]
fn cmd_set(ctx: &ServerContext, args: &[RespValue]) -> RespValue {
    if args.len() < 2 {
        return err_arity("SET");
    }

    let key = match arg_str(&args[0]) {
        Some(k) => k,
        None => return RespValue::error("ERR invalid key"),
    };
    let value = match arg_str(&args[1]) {
        Some(v) => v,
        None => return RespValue::error("ERR invalid value"),
    };

    let mut ttl: Option<Duration> = None;
    let mut i = 2;
    while i < args.len() {
        let option = match arg_str(&args[i]) {
            Some(s) => s.to_uppercase(),
            None => return RespValue::error("ERR syntax error"),
        };

        match option.as_str() {
            "EX" => {
                i += 1;
                match args.get(i).and_then(arg_int) {
                    Some(secs) if secs > 0 => ttl = Some(Duration::from_secs(secs as u64)),
                    _ => return RespValue::error("ERR invalid expire time in 'set' command"),
                }
            }
            "PX" => {
                i += 1;
                match args.get(i).and_then(arg_int) {
                    Some(ms) if ms > 0 => ttl = Some(Duration::from_millis(ms as u64)),
                    _ => return RespValue::error("ERR invalid expire time in 'set' command"),
                }
            }
            _ => return RespValue::error("ERR syntax error"),
        }
        i += 1;
    }

    ctx.store.set(&key, &value, ttl);
    RespValue::ok()
}

/// GET key
fn cmd_get(ctx: &ServerContext, args: &[RespValue]) -> RespValue {
    if args.len() != 1 {
        return err_arity("GET");
    }
    let key = match arg_str(&args[0]) {
        Some(k) => k,
        None => return RespValue::error("ERR invalid key"),
    };

    match ctx.store.get(&key) {
        Ok(value) => RespValue::bulk_string(Bytes::from(value)),
        Err(e) => store_reply(e),
    }
}

/// DEL key [key ...]
fn cmd_del(ctx: &ServerContext, args: &[RespValue]) -> RespValue {
    if args.is_empty() {
        return err_arity("DEL");
    }

    for arg in args {
        if let Some(key) = arg_str(arg) {
            // Deleting an absent key is not an error for the client.
            let _ = ctx.store.del(&key);
        }
    }
    RespValue::ok()
}

/// EXPIRE key seconds
fn cmd_expire(ctx: &ServerContext, args: &[RespValue]) -> RespValue {
    if args.len() != 2 {
        return err_arity("EXPIRE");
    }
    let key = match arg_str(&args[0]) {
        Some(k) => k,
        None => return RespValue::error("ERR invalid key"),
    };
    let secs = match arg_int(&args[1]) {
        Some(s) if s >= 0 => s as u64,
        _ => return err_not_integer(),
    };

    match ctx.store.expire(&key, Duration::from_secs(secs)) {
        Ok(()) => RespValue::ok(),
        Err(e) => store_reply(e),
    }
}

/// TTL key — remaining seconds, -1 when the key has no TTL or is absent.
fn cmd_ttl(ctx: &ServerContext, args: &[RespValue]) -> RespValue {
    if args.len() != 1 {
        return err_arity("TTL");
    }
    let key = match arg_str(&args[0]) {
        Some(k) => k,
        None => return RespValue::error("ERR invalid key"),
    };

    match ctx.store.ttl(&key) {
        Ok(Some(remaining)) => RespValue::integer(remaining.as_secs() as i64),
        Ok(None) => RespValue::integer(-1),
        Err(_) => RespValue::integer(-1),
    }
}

/// ALL — every live key rendered as a `key : value` bulk string, sorted by
/// key so the output is stable.
fn cmd_all(ctx: &ServerContext, _args: &[RespValue]) -> RespValue {
    let mut entries = ctx.store.all();
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let values = entries
        .into_iter()
        .map(|(key, data)| {
            RespValue::bulk_string(Bytes::from(format!("{} : {}", key, render_data(&data))))
        })
        .collect();
    RespValue::array(values)
}

/// Human rendering of a payload for `ALL`.
fn render_data(data: &ValueData) -> String {
    match data {
        ValueData::Str(s) => s.clone(),
        ValueData::List(list) => {
            let items: Vec<&str> = list.iter().map(|s| s.as_str()).collect();
            format!("[{}]", items.join(", "))
        }
        ValueData::Hash(hash) => {
            let mut pairs: Vec<String> =
                hash.iter().map(|(f, v)| format!("{}: {}", f, v)).collect();
            pairs.sort();
            format!("{{{}}}", pairs.join(", "))
        }
    }
}

/// FLUSH — force a snapshot save now.
fn cmd_flush(ctx: &ServerContext, _args: &[RespValue]) -> RespValue {
    if let Err(e) = snapshot::save(&ctx.store, &ctx.db_path) {
        warn!(error = %e, "forced snapshot save failed");
    }
    RespValue::ok()
}

/// BGREWRITEAOF — kick off a rewrite task and ack immediately.
fn cmd_bgrewriteaof(ctx: &ServerContext, _args: &[RespValue]) -> RespValue {
    let aof = match &ctx.aof {
        Some(aof) => Arc::clone(aof),
        None => return RespValue::error("ERR AOF is not enabled"),
    };

    let store = Arc::clone(&ctx.store);
    tokio::spawn(async move {
        if let Err(e) = aof.rewrite(&store) {
            warn!(error = %e, "AOF rewrite failed");
        }
    });

    RespValue::simple_string("Background rewrite started")
}

/// HELP — one bulk string per command summary.
fn cmd_help(_ctx: &ServerContext, _args: &[RespValue]) -> RespValue {
    RespValue::array(
        COMMAND_SUMMARIES
            .iter()
            .map(|line| RespValue::bulk_string(Bytes::from(*line)))
            .collect(),
    )
}
