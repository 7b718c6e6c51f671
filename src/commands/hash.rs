//! Hash commands.

use crate::commands::registry::{
    arg_str, err_arity, store_reply, CommandRegistry, ServerContext,
};
use crate::protocol::RespValue;
use bytes::Bytes;

pub fn register(registry: &mut CommandRegistry) {
    registry.register("HSET", cmd_hset);
    registry.register("HGET", cmd_hget);
    registry.register("HDEL", cmd_hdel);
    registry.register("HGETALL", cmd_hgetall);
    registry.register("HEXISTS", cmd_hexists);
    registry.register("HLEN", cmd_hlen);
    registry.register("HKEYS", cmd_hkeys);
    registry.register("HVALS", cmd_hvals);
}

fn key_arg(args: &[RespValue]) -> Result<String, RespValue> {
    arg_str(&args[0]).ok_or_else(|| RespValue::error("ERR invalid key"))
}

/// HSET key field value — 1 when the field is new, 0 on update.
fn cmd_hset(ctx: &ServerContext, args: &[RespValue]) -> RespValue {
    if args.len() != 3 {
        return err_arity("HSET");
    }
    let key = match key_arg(args) {
        Ok(k) => k,
        Err(reply) => return reply,
    };
    let (field, value) = match (arg_str(&args[1]), arg_str(&args[2])) {
        (Some(f), Some(v)) => (f, v),
        _ => return RespValue::error("ERR invalid value"),
    };

    match ctx.store.hset(&key, &field, &value) {
        Ok(created) => RespValue::integer(created),
        Err(e) => store_reply(e),
    }
}

/// HGET key field
fn cmd_hget(ctx: &ServerContext, args: &[RespValue]) -> RespValue {
    if args.len() != 2 {
        return err_arity("HGET");
    }
    let key = match key_arg(args) {
        Ok(k) => k,
        Err(reply) => return reply,
    };
    let field = match arg_str(&args[1]) {
        Some(f) => f,
        None => return RespValue::error("ERR invalid field"),
    };

    match ctx.store.hget(&key, &field) {
        Ok(value) => RespValue::bulk_string(Bytes::from(value)),
        Err(e) => store_reply(e),
    }
}

/// HDEL key field [field ...] — number of fields removed.
fn cmd_hdel(ctx: &ServerContext, args: &[RespValue]) -> RespValue {
    if args.len() < 2 {
        return err_arity("HDEL");
    }
    let key = match key_arg(args) {
        Ok(k) => k,
        Err(reply) => return reply,
    };
    let mut fields = Vec::with_capacity(args.len() - 1);
    for arg in &args[1..] {
        match arg_str(arg) {
            Some(f) => fields.push(f),
            None => return RespValue::error("ERR invalid field"),
        }
    }

    match ctx.store.hdel(&key, &fields) {
        Ok(removed) => RespValue::integer(removed as i64),
        Err(e) => store_reply(e),
    }
}

/// HGETALL key — alternating field/value bulk strings.
fn cmd_hgetall(ctx: &ServerContext, args: &[RespValue]) -> RespValue {
    if args.len() != 1 {
        return err_arity("HGETALL");
    }
    let key = match key_arg(args) {
        Ok(k) => k,
        Err(reply) => return reply,
    };

    match ctx.store.hgetall(&key) {
        Ok(mut pairs) => {
            // Hash iteration order is arbitrary; sort for a stable reply.
            pairs.sort();
            let mut values = Vec::with_capacity(pairs.len() * 2);
            for (field, value) in pairs {
                values.push(RespValue::bulk_string(Bytes::from(field)));
                values.push(RespValue::bulk_string(Bytes::from(value)));
            }
            RespValue::array(values)
        }
        Err(e) => store_reply(e),
    }
}

/// HEXISTS key field
fn cmd_hexists(ctx: &ServerContext, args: &[RespValue]) -> RespValue {
    if args.len() != 2 {
        return err_arity("HEXISTS");
    }
    let key = match key_arg(args) {
        Ok(k) => k,
        Err(reply) => return reply,
    };
    let field = match arg_str(&args[1]) {
        Some(f) => f,
        None => return RespValue::error("ERR invalid field"),
    };

    match ctx.store.hexists(&key, &field) {
        Ok(exists) => RespValue::integer(if exists { 1 } else { 0 }),
        Err(e) => store_reply(e),
    }
}

/// HLEN key
fn cmd_hlen(ctx: &ServerContext, args: &[RespValue]) -> RespValue {
    if args.len() != 1 {
        return err_arity("HLEN");
    }
    let key = match key_arg(args) {
        Ok(k) => k,
        Err(reply) => return reply,
    };

    match ctx.store.hlen(&key) {
        Ok(len) => RespValue::integer(len as i64),
        Err(e) => store_reply(e),
    }
}

/// HKEYS key
fn cmd_hkeys(ctx: &ServerContext, args: &[RespValue]) -> RespValue {
    if args.len() != 1 {
        return err_arity("HKEYS");
    }
    let key = match key_arg(args) {
        Ok(k) => k,
        Err(reply) => return reply,
    };

    match ctx.store.hkeys(&key) {
        Ok(mut keys) => {
            keys.sort();
            RespValue::array(
                keys.into_iter()
                    .map(|k| RespValue::bulk_string(Bytes::from(k)))
                    .collect(),
            )
        }
        Err(e) => store_reply(e),
    }
}

/// HVALS key
fn cmd_hvals(ctx: &ServerContext, args: &[RespValue]) -> RespValue {
    if args.len() != 1 {
        return err_arity("HVALS");
    }
    let key = match key_arg(args) {
        Ok(k) => k,
        Err(reply) => return reply,
    };

    match ctx.store.hvals(&key) {
        Ok(mut vals) => {
            vals.sort();
            RespValue::array(
                vals.into_iter()
                    .map(|v| RespValue::bulk_string(Bytes::from(v)))
                    .collect(),
            )
        }
        Err(e) => store_reply(e),
    }
}
