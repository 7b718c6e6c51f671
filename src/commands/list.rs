//! List commands.

use crate::commands::registry::{
    arg_int, arg_str, err_arity, err_not_integer, store_reply, CommandRegistry, ServerContext,
};
use crate::protocol::RespValue;
use bytes::Bytes;

pub fn register(registry: &mut CommandRegistry) {
    registry.register("LPUSH", cmd_lpush);
    registry.register("RPUSH", cmd_rpush);
    registry.register("LPOP", cmd_lpop);
    registry.register("RPOP", cmd_rpop);
    registry.register("LRANGE", cmd_lrange);
    registry.register("LLEN", cmd_llen);
    registry.register("LINDEX", cmd_lindex);
    registry.register("LSET", cmd_lset);
    registry.register("LREM", cmd_lrem);
    registry.register("LTRIM", cmd_ltrim);
}

/// Key plus the remaining arguments as plain strings.
fn key_and_values(cmd: &str, args: &[RespValue], min_values: usize) -> Result<(String, Vec<String>), RespValue> {
    if args.len() < min_values + 1 {
        return Err(err_arity(cmd));
    }
    let key = arg_str(&args[0]).ok_or_else(|| RespValue::error("ERR invalid key"))?;
    let mut values = Vec::with_capacity(args.len() - 1);
    for arg in &args[1..] {
        values.push(arg_str(arg).ok_or_else(|| RespValue::error("ERR invalid value"))?);
    }
    Ok((key, values))
}

/// LPUSH key value [value ...]
fn cmd_lpush(ctx: &ServerContext, args: &[RespValue]) -> RespValue {
    let (key, values) = match key_and_values("LPUSH", args, 1) {
        Ok(parsed) => parsed,
        Err(reply) => return reply,
    };
    match ctx.store.lpush(&key, &values) {
        Ok(len) => RespValue::integer(len as i64),
        Err(e) => store_reply(e),
    }
}

/// RPUSH key value [value ...]
fn cmd_rpush(ctx: &ServerContext, args: &[RespValue]) -> RespValue {
    let (key, values) = match key_and_values("RPUSH", args, 1) {
        Ok(parsed) => parsed,
        Err(reply) => return reply,
    };
    match ctx.store.rpush(&key, &values) {
        Ok(len) => RespValue::integer(len as i64),
        Err(e) => store_reply(e),
    }
}

/// LPOP key
fn cmd_lpop(ctx: &ServerContext, args: &[RespValue]) -> RespValue {
    if args.len() != 1 {
        return err_arity("LPOP");
    }
    let key = match arg_str(&args[0]) {
        Some(k) => k,
        None => return RespValue::error("ERR invalid key"),
    };
    match ctx.store.lpop(&key) {
        Ok(item) => RespValue::bulk_string(Bytes::from(item)),
        Err(e) => store_reply(e),
    }
}

/// RPOP key
fn cmd_rpop(ctx: &ServerContext, args: &[RespValue]) -> RespValue {
    if args.len() != 1 {
        return err_arity("RPOP");
    }
    let key = match arg_str(&args[0]) {
        Some(k) => k,
        None => return RespValue::error("ERR invalid key"),
    };
    match ctx.store.rpop(&key) {
        Ok(item) => RespValue::bulk_string(Bytes::from(item)),
        Err(e) => store_reply(e),
    }
}

/// LRANGE key start stop
fn cmd_lrange(ctx: &ServerContext, args: &[RespValue]) -> RespValue {
    if args.len() != 3 {
        return err_arity("LRANGE");
    }
    let key = match arg_str(&args[0]) {
        Some(k) => k,
        None => return RespValue::error("ERR invalid key"),
    };
    let (start, stop) = match (arg_int(&args[1]), arg_int(&args[2])) {
        (Some(start), Some(stop)) => (start, stop),
        _ => return err_not_integer(),
    };

    match ctx.store.lrange(&key, start, stop) {
        Ok(items) => RespValue::array(
            items
                .into_iter()
                .map(|item| RespValue::bulk_string(Bytes::from(item)))
                .collect(),
        ),
        Err(e) => store_reply(e),
    }
}

/// LLEN key
fn cmd_llen(ctx: &ServerContext, args: &[RespValue]) -> RespValue {
    if args.len() != 1 {
        return err_arity("LLEN");
    }
    let key = match arg_str(&args[0]) {
        Some(k) => k,
        None => return RespValue::error("ERR invalid key"),
    };
    match ctx.store.llen(&key) {
        Ok(len) => RespValue::integer(len as i64),
        Err(e) => store_reply(e),
    }
}

/// LINDEX key index
fn cmd_lindex(ctx: &ServerContext, args: &[RespValue]) -> RespValue {
    if args.len() != 2 {
        return err_arity("LINDEX");
    }
    let key = match arg_str(&args[0]) {
        Some(k) => k,
        None => return RespValue::error("ERR invalid key"),
    };
    let index = match arg_int(&args[1]) {
        Some(i) => i,
        None => return err_not_integer(),
    };

    match ctx.store.lindex(&key, index) {
        Ok(item) => RespValue::bulk_string(Bytes::from(item)),
        Err(e) => store_reply(e),
    }
}

/// LSET key index value
fn cmd_lset(ctx: &ServerContext, args: &[RespValue]) -> RespValue {
    if args.len() != 3 {
        return err_arity("LSET");
    }
    let key = match arg_str(&args[0]) {
        Some(k) => k,
        None => return RespValue::error("ERR invalid key"),
    };
    let index = match arg_int(&args[1]) {
        Some(i) => i,
        None => return err_not_integer(),
    };
    let value = match arg_str(&args[2]) {
        Some(v) => v,
        None => return RespValue::error("ERR invalid value"),
    };

    match ctx.store.lset(&key, index, &value) {
        Ok(()) => RespValue::ok(),
        Err(e) => store_reply(e),
    }
}

/// LREM key count value
fn cmd_lrem(ctx: &ServerContext, args: &[RespValue]) -> RespValue {
    if args.len() != 3 {
        return err_arity("LREM");
    }
    let key = match arg_str(&args[0]) {
        Some(k) => k,
        None => return RespValue::error("ERR invalid key"),
    };
    let count = match arg_int(&args[1]) {
        Some(c) => c,
        None => return err_not_integer(),
    };
    let value = match arg_str(&args[2]) {
        Some(v) => v,
        None => return RespValue::error("ERR invalid value"),
    };

    match ctx.store.lrem(&key, count, &value) {
        Ok(removed) => RespValue::integer(removed as i64),
        Err(e) => store_reply(e),
    }
}

/// LTRIM key start stop
fn cmd_ltrim(ctx: &ServerContext, args: &[RespValue]) -> RespValue {
    if args.len() != 3 {
        return err_arity("LTRIM");
    }
    let key = match arg_str(&args[0]) {
        Some(k) => k,
        None => return RespValue::error("ERR invalid key"),
    };
    let (start, stop) = match (arg_int(&args[1]), arg_int(&args[2])) {
        (Some(start), Some(stop)) => (start, stop),
        _ => return err_not_integer(),
    };

    match ctx.store.ltrim(&key, start, stop) {
        Ok(()) => RespValue::ok(),
        Err(e) => store_reply(e),
    }
}
