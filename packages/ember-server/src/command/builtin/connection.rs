//! Connection-lifecycle and session commands: `PING`, `ECHO`, `QUIT`,
//! `HELLO`, `SELECT`, `SWAPDB`, `CLIENT`.

use bytes::Bytes;
use ember_core::{Error, RespValue};

use crate::connection::Protocol;

use super::super::{CommandKind, CommandSpec, HandlerContext, SubcommandSpec};

fn ping(_ctx: &HandlerContext, args: &[Bytes]) -> Result<RespValue, Error> {
    match args {
        [] => Ok(RespValue::Simple("PONG".to_string())),
        [msg] => Ok(RespValue::Bulk(msg.clone())),
        _ => Err(Error::protocol("wrong number of arguments for 'ping' command")),
    }
}

fn echo(_ctx: &HandlerContext, args: &[Bytes]) -> Result<RespValue, Error> {
    match args {
        [msg] => Ok(RespValue::Bulk(msg.clone())),
        _ => Err(Error::protocol("wrong number of arguments for 'echo' command")),
    }
}

fn quit(_ctx: &HandlerContext, _args: &[Bytes]) -> Result<RespValue, Error> {
    // Never actually reached: the dispatcher intercepts QUIT at the token
    // level before resolving a command. Kept so
    // introspection (`COMMAND COUNT`) sees a registered QUIT.
    Err(Error::eof())
}

/// `RespValue::Map`'s encoder already renders a RESP2 connection as a flat
/// `2*len`-element array and a RESP3 connection as a real map, so the seven
/// fields below need no protocol-specific branching here.
fn hello(ctx: &HandlerContext, args: &[Bytes]) -> Result<RespValue, Error> {
    let protocol = match args.first() {
        Some(v) if v.as_ref() == b"3" => Protocol::Resp3,
        Some(v) if v.as_ref() == b"2" => Protocol::Resp2,
        None => ctx.protocol,
        Some(_) => return Err(Error::not_supported("NOPROTO unsupported protocol version")),
    };
    if let Some(conn) = ctx.conn {
        ctx.connections.set(conn, None, Some(protocol), None);
    }
    let proto_num = if protocol == Protocol::Resp3 { 3 } else { 2 };
    let id = ctx.conn.map_or(0, |c| i64::try_from(c).unwrap_or(i64::MAX));
    let mode = if ctx.clustered { "cluster" } else { "standalone" };
    let role = if ctx.is_leader { "master" } else { "replica" };
    Ok(RespValue::Map(vec![
        (RespValue::bulk_from(b"server".to_vec()), RespValue::bulk_from(b"emberdb".to_vec())),
        (RespValue::bulk_from(b"version".to_vec()), RespValue::bulk_from(env!("CARGO_PKG_VERSION").as_bytes().to_vec())),
        (RespValue::bulk_from(b"proto".to_vec()), RespValue::Integer(proto_num)),
        (RespValue::bulk_from(b"id".to_vec()), RespValue::Integer(id)),
        (RespValue::bulk_from(b"mode".to_vec()), RespValue::bulk_from(mode.as_bytes().to_vec())),
        (RespValue::bulk_from(b"role".to_vec()), RespValue::bulk_from(role.as_bytes().to_vec())),
        (RespValue::bulk_from(b"modules".to_vec()), RespValue::Array(Vec::new())),
    ]))
}

fn select(ctx: &HandlerContext, args: &[Bytes]) -> Result<RespValue, Error> {
    let [db_bytes] = args else {
        return Err(Error::protocol("wrong number of arguments for 'select' command"));
    };
    let db = parse_db_index(db_bytes)?;
    ctx.keyspace.create_database(db);
    if let Some(conn) = ctx.conn {
        ctx.connections.select(conn, db);
    }
    Ok(RespValue::ok())
}

fn swapdb(ctx: &HandlerContext, args: &[Bytes]) -> Result<RespValue, Error> {
    let [a_bytes, b_bytes] = args else {
        return Err(Error::protocol("wrong number of arguments for 'swapdb' command"));
    };
    let a = parse_db_index(a_bytes)?;
    let b = parse_db_index(b_bytes)?;
    ctx.keyspace.swap(a, b);
    ctx.connections.swap_databases(a, b);
    Ok(RespValue::ok())
}

fn parse_db_index(bytes: &Bytes) -> Result<u64, Error> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::protocol("invalid database index"))
}

fn client_setname(ctx: &HandlerContext, args: &[Bytes]) -> Result<RespValue, Error> {
    let [name] = args else {
        return Err(Error::protocol("wrong number of arguments for 'client|setname' command"));
    };
    if let Some(conn) = ctx.conn {
        let name = String::from_utf8_lossy(name).into_owned();
        ctx.connections.set(conn, Some(name), None, None);
    }
    Ok(RespValue::ok())
}

fn client_getname(ctx: &HandlerContext, _args: &[Bytes]) -> Result<RespValue, Error> {
    let name = ctx
        .conn
        .and_then(|c| ctx.connections.get(c))
        .map(|info| info.name)
        .unwrap_or_default();
    if name.is_empty() {
        Ok(RespValue::Null)
    } else {
        Ok(RespValue::Bulk(Bytes::from(name)))
    }
}

fn client_id(ctx: &HandlerContext, _args: &[Bytes]) -> Result<RespValue, Error> {
    match ctx.conn {
        Some(id) => Ok(RespValue::Integer(i64::try_from(id).unwrap_or(i64::MAX))),
        None => Ok(RespValue::Integer(0)),
    }
}

pub fn specs() -> Vec<CommandSpec> {
    vec![
        CommandSpec::simple("PING", CommandKind::Read, "connection", ping),
        CommandSpec::simple("ECHO", CommandKind::Read, "connection", echo),
        CommandSpec::simple("QUIT", CommandKind::Read, "connection", quit),
        CommandSpec::simple("HELLO", CommandKind::Read, "connection", hello),
        CommandSpec::simple("SELECT", CommandKind::Read, "connection", select),
        CommandSpec::simple("SWAPDB", CommandKind::Write, "connection", swapdb),
        CommandSpec::with_subcommands(
            "CLIENT",
            "connection",
            vec![
                SubcommandSpec::new("SETNAME", client_setname, CommandKind::Read),
                SubcommandSpec::new("GETNAME", client_getname, CommandKind::Read),
                SubcommandSpec::new("ID", client_id, CommandKind::Read),
            ],
        ),
    ]
}
