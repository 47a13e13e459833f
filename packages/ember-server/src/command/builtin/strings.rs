//! String-value commands: `SET`, `GET`, `MSET`, `MGET`, `INCR`, `DECR`.

use bytes::Bytes;
use ember_core::{Error, RespValue, Value};

use crate::keyspace::ExpiryCondition;

use super::super::{CommandKind, CommandSpec, HandlerContext};

struct SetOptions {
    expire_at: Option<u64>,
    nx: bool,
    xx: bool,
}

fn parse_set_options(args: &[Bytes], now: u64) -> Result<SetOptions, Error> {
    let mut opts = SetOptions {
        expire_at: None,
        nx: false,
        xx: false,
    };
    let mut i = 0;
    while i < args.len() {
        let flag = args[i].to_ascii_uppercase();
        match flag.as_slice() {
            b"NX" => opts.nx = true,
            b"XX" => opts.xx = true,
            b"EX" | b"PX" => {
                let value = args
                    .get(i + 1)
                    .and_then(|b| std::str::from_utf8(b).ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .ok_or_else(|| Error::protocol("invalid expire time in 'set' command"))?;
                let millis = if flag.as_slice() == b"EX" { value * 1000 } else { value };
                opts.expire_at = Some(now + millis);
                i += 1;
            }
            _ => return Err(Error::protocol("syntax error")),
        }
        i += 1;
    }
    if opts.nx && opts.xx {
        return Err(Error::protocol("syntax error"));
    }
    Ok(opts)
}

fn set(ctx: &HandlerContext, args: &[Bytes]) -> Result<RespValue, Error> {
    let [key, value, rest @ ..] = args else {
        return Err(Error::protocol("wrong number of arguments for 'set' command"));
    };
    let now = ctx.keyspace.now_for_sampler();
    let opts = parse_set_options(rest, now)?;

    let exists = ctx
        .keyspace
        .keys_exist(ctx.database, std::slice::from_ref(key))
        .get(key)
        .copied()
        .unwrap_or(false);
    if opts.nx && exists {
        return Ok(RespValue::Null);
    }
    if opts.xx && !exists {
        return Ok(RespValue::Null);
    }

    ctx.keyspace
        .set_values(ctx.database, vec![(key.clone(), Value::String(value.clone()))])?;
    if let Some(expire_at) = opts.expire_at {
        ctx.keyspace
            .set_expiry(ctx.database, key, expire_at, ExpiryCondition::None, true);
    }
    Ok(RespValue::ok())
}

fn get(ctx: &HandlerContext, args: &[Bytes]) -> Result<RespValue, Error> {
    let [key] = args else {
        return Err(Error::protocol("wrong number of arguments for 'get' command"));
    };
    let values = ctx.keyspace.get_values(ctx.database, std::slice::from_ref(key));
    match values.get(key).cloned().flatten() {
        Some(Value::String(b)) => Ok(RespValue::Bulk(b)),
        Some(Value::Int(i)) => Ok(RespValue::Bulk(Bytes::from(i.to_string()))),
        None => Ok(RespValue::Null),
    }
}

fn mset(ctx: &HandlerContext, args: &[Bytes]) -> Result<RespValue, Error> {
    if args.is_empty() || args.len() % 2 != 0 {
        return Err(Error::protocol("wrong number of arguments for 'mset' command"));
    }
    let entries = args
        .chunks_exact(2)
        .map(|pair| (pair[0].clone(), Value::String(pair[1].clone())))
        .collect();
    ctx.keyspace.set_values(ctx.database, entries)?;
    Ok(RespValue::ok())
}

fn mget(ctx: &HandlerContext, args: &[Bytes]) -> Result<RespValue, Error> {
    if args.is_empty() {
        return Err(Error::protocol("wrong number of arguments for 'mget' command"));
    }
    let values = ctx.keyspace.get_values(ctx.database, args);
    let items = args
        .iter()
        .map(|key| match values.get(key).cloned().flatten() {
            Some(v) => RespValue::Bulk(v.as_bytes()),
            None => RespValue::Null,
        })
        .collect();
    Ok(RespValue::Array(items))
}

fn incr_by(ctx: &HandlerContext, key: &Bytes, delta: i64) -> Result<i64, Error> {
    let current = match ctx.keyspace.get_values(ctx.database, std::slice::from_ref(key)).get(key).cloned().flatten() {
        Some(Value::Int(i)) => i,
        Some(Value::String(b)) => std::str::from_utf8(&b)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(Error::wrong_type)?,
        None => 0,
    };
    let next = current.checked_add(delta).ok_or_else(|| Error::protocol("increment or decrement would overflow"))?;
    ctx.keyspace.set_values(ctx.database, vec![(key.clone(), Value::Int(next))])?;
    Ok(next)
}

fn incr(ctx: &HandlerContext, args: &[Bytes]) -> Result<RespValue, Error> {
    let [key] = args else {
        return Err(Error::protocol("wrong number of arguments for 'incr' command"));
    };
    Ok(RespValue::Integer(incr_by(ctx, key, 1)?))
}

fn decr(ctx: &HandlerContext, args: &[Bytes]) -> Result<RespValue, Error> {
    let [key] = args else {
        return Err(Error::protocol("wrong number of arguments for 'decr' command"));
    };
    Ok(RespValue::Integer(incr_by(ctx, key, -1)?))
}

pub fn specs() -> Vec<CommandSpec> {
    vec![
        CommandSpec::simple("SET", CommandKind::Write, "string", set),
        CommandSpec::simple("GET", CommandKind::Read, "string", get),
        CommandSpec::simple("MSET", CommandKind::Write, "string", mset),
        CommandSpec::simple("MGET", CommandKind::Read, "string", mget),
        CommandSpec::simple("INCR", CommandKind::Write, "string", incr),
        CommandSpec::simple("DECR", CommandKind::Write, "string", decr),
    ]
}
