//! Generic key commands: `DEL`, `EXISTS`, `EXPIRE`/`PEXPIRE`, `TTL`/`PTTL`,
//! `PERSIST`, `TYPE`.

use bytes::Bytes;
use ember_core::{Error, RespValue};

use crate::keyspace::ExpiryCondition;

use super::super::{CommandKind, CommandSpec, HandlerContext};

fn del(ctx: &HandlerContext, args: &[Bytes]) -> Result<RespValue, Error> {
    if args.is_empty() {
        return Err(Error::protocol("wrong number of arguments for 'del' command"));
    }
    let deleted = args.iter().filter(|key| ctx.keyspace.delete_key(ctx.database, key)).count();
    Ok(RespValue::Integer(deleted as i64))
}

fn exists(ctx: &HandlerContext, args: &[Bytes]) -> Result<RespValue, Error> {
    if args.is_empty() {
        return Err(Error::protocol("wrong number of arguments for 'exists' command"));
    }
    let presence = ctx.keyspace.keys_exist(ctx.database, args);
    let count = args.iter().filter(|key| presence.get(*key).copied().unwrap_or(false)).count();
    Ok(RespValue::Integer(count as i64))
}

fn parse_condition(flag: &[u8]) -> Result<ExpiryCondition, Error> {
    match flag {
        b"NX" => Ok(ExpiryCondition::Nx),
        b"XX" => Ok(ExpiryCondition::Xx),
        b"GT" => Ok(ExpiryCondition::Gt),
        b"LT" => Ok(ExpiryCondition::Lt),
        _ => Err(Error::protocol("unsupported option")),
    }
}

fn expire_generic(ctx: &HandlerContext, args: &[Bytes], unit_millis: u64) -> Result<RespValue, Error> {
    let [key, amount, rest @ ..] = args else {
        return Err(Error::protocol("wrong number of arguments"));
    };
    let amount: i64 = std::str::from_utf8(amount)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::protocol("value is not an integer or out of range"))?;
    let condition = match rest {
        [] => ExpiryCondition::None,
        [flag] => parse_condition(&flag.to_ascii_uppercase())?,
        _ => return Err(Error::protocol("syntax error")),
    };
    let now = ctx.keyspace.now_for_sampler();
    let millis = amount
        .checked_mul(unit_millis as i64)
        .and_then(|delta| i64::try_from(now).ok()?.checked_add(delta))
        .ok_or_else(|| Error::protocol("invalid expire time, must be representable as a 64-bit integer"))?;
    let expire_at = millis.max(0) as u64;
    let set = ctx.keyspace.set_expiry(ctx.database, key, expire_at, condition, true);
    Ok(RespValue::Integer(i64::from(set)))
}

fn expire(ctx: &HandlerContext, args: &[Bytes]) -> Result<RespValue, Error> {
    expire_generic(ctx, args, 1000)
}

fn pexpire(ctx: &HandlerContext, args: &[Bytes]) -> Result<RespValue, Error> {
    expire_generic(ctx, args, 1)
}

fn ttl_generic(ctx: &HandlerContext, args: &[Bytes], divisor: u64) -> Result<RespValue, Error> {
    let [key] = args else {
        return Err(Error::protocol("wrong number of arguments"));
    };
    match ctx.keyspace.ttl_millis(ctx.database, key) {
        None => Ok(RespValue::Integer(-2)),
        Some(None) => Ok(RespValue::Integer(-1)),
        Some(Some(millis)) => Ok(RespValue::Integer((millis / divisor) as i64)),
    }
}

fn ttl(ctx: &HandlerContext, args: &[Bytes]) -> Result<RespValue, Error> {
    ttl_generic(ctx, args, 1000)
}

fn pttl(ctx: &HandlerContext, args: &[Bytes]) -> Result<RespValue, Error> {
    ttl_generic(ctx, args, 1)
}

fn persist(ctx: &HandlerContext, args: &[Bytes]) -> Result<RespValue, Error> {
    let [key] = args else {
        return Err(Error::protocol("wrong number of arguments for 'persist' command"));
    };
    Ok(RespValue::Integer(i64::from(ctx.keyspace.persist(ctx.database, key))))
}

fn type_cmd(ctx: &HandlerContext, args: &[Bytes]) -> Result<RespValue, Error> {
    let [key] = args else {
        return Err(Error::protocol("wrong number of arguments for 'type' command"));
    };
    match ctx.keyspace.type_name(ctx.database, key) {
        Some(name) => Ok(RespValue::Simple(name.to_string())),
        None => Ok(RespValue::Simple("none".to_string())),
    }
}

pub fn specs() -> Vec<CommandSpec> {
    vec![
        CommandSpec::simple("DEL", CommandKind::Write, "generic", del),
        CommandSpec::simple("EXISTS", CommandKind::Read, "generic", exists),
        CommandSpec::simple("EXPIRE", CommandKind::Write, "generic", expire),
        CommandSpec::simple("PEXPIRE", CommandKind::Write, "generic", pexpire),
        CommandSpec::simple("TTL", CommandKind::Read, "generic", ttl),
        CommandSpec::simple("PTTL", CommandKind::Read, "generic", pttl),
        CommandSpec::simple("PERSIST", CommandKind::Write, "generic", persist),
        CommandSpec::simple("TYPE", CommandKind::Read, "generic", type_cmd),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_condition_rejects_unknown_flag() {
        assert!(parse_condition(b"FOO").is_err());
    }

    #[test]
    fn expire_rejects_an_amount_whose_millis_conversion_overflows() {
        use crate::config::ServerConfig;
        use crate::connection::ConnectionRegistry;
        use crate::keyspace::Keyspace;
        use ember_core::TestClock;
        use std::sync::atomic::AtomicBool;
        use std::sync::Arc;

        let ctx = HandlerContext {
            keyspace: Arc::new(Keyspace::new(Arc::new(TestClock::new(0)), Arc::new(ServerConfig::default()), None)),
            connections: Arc::new(ConnectionRegistry::new()),
            conn: None,
            database: 0,
            protocol: crate::connection::Protocol::Resp2,
            embedded: true,
            config: Arc::new(ServerConfig::default()),
            persistence: None,
            command_count: 0,
            state_copy: Arc::new(AtomicBool::new(false)),
            clustered: false,
            is_leader: true,
        };
        let err = expire(&ctx, &[Bytes::from_static(b"k"), Bytes::from_static(b"9223372036854775807")]).unwrap_err();
        assert_eq!(err.kind, ember_core::ErrorKind::ProtocolError);
    }
}
