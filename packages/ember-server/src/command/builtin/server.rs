//! Server-wide commands: `DBSIZE`, `FLUSHDB`, `FLUSHALL`, `SAVE`/`BGSAVE`,
//! `COMMAND`, `CONFIG GET`.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use bytes::Bytes;
use ember_core::{Error, RespValue};

use super::super::{CommandKind, CommandSpec, HandlerContext, SubcommandSpec};

fn dbsize(ctx: &HandlerContext, _args: &[Bytes]) -> Result<RespValue, Error> {
    Ok(RespValue::Integer(ctx.keyspace.dbsize(ctx.database) as i64))
}

fn flushdb(ctx: &HandlerContext, _args: &[Bytes]) -> Result<RespValue, Error> {
    ctx.keyspace.flush_db(ctx.database);
    Ok(RespValue::ok())
}

fn flushall(ctx: &HandlerContext, _args: &[Bytes]) -> Result<RespValue, Error> {
    ctx.keyspace.flush_all();
    Ok(RespValue::ok())
}

/// Flips the write barrier for the duration of a foreground rewrite, so
/// concurrent writes spin in the dispatcher until it clears.
fn save(ctx: &HandlerContext, _args: &[Bytes]) -> Result<RespValue, Error> {
    match &ctx.persistence {
        Some(persistence) => {
            ctx.state_copy.store(true, Ordering::Release);
            let result = persistence.save_blocking();
            ctx.state_copy.store(false, Ordering::Release);
            result?;
            Ok(RespValue::ok())
        }
        None => Err(Error::not_supported("persistence is not configured")),
    }
}

/// Flips the write barrier before handing the rewrite to the blocking pool;
/// the spawned task clears it once the rewrite finishes.
fn bgsave(ctx: &HandlerContext, _args: &[Bytes]) -> Result<RespValue, Error> {
    match &ctx.persistence {
        Some(persistence) => {
            ctx.state_copy.store(true, Ordering::Release);
            persistence.save_background(Arc::clone(&ctx.state_copy));
            Ok(RespValue::Simple("Background saving started".to_string()))
        }
        None => Err(Error::not_supported("persistence is not configured")),
    }
}

fn command_count(ctx: &HandlerContext, _args: &[Bytes]) -> Result<RespValue, Error> {
    Ok(RespValue::Integer(ctx.command_count as i64))
}

/// Stub: real command introspection (arity, flags, key specs) is out of
/// scope; this returns an empty array so clients that probe `COMMAND DOCS`
/// on connect don't fail.
fn command_docs(_ctx: &HandlerContext, _args: &[Bytes]) -> Result<RespValue, Error> {
    Ok(RespValue::Array(Vec::new()))
}

fn config_get(ctx: &HandlerContext, args: &[Bytes]) -> Result<RespValue, Error> {
    let [param] = args else {
        return Err(Error::protocol("wrong number of arguments for 'config|get' command"));
    };
    let value = match param.to_ascii_lowercase().as_slice() {
        b"maxmemory" => Some(ctx.config.max_memory.to_string()),
        b"maxmemory-policy" => Some(format!("{:?}", ctx.config.eviction_policy).to_lowercase()),
        b"appendfsync" => Some(format!("{:?}", ctx.config.aof_sync_strategy).to_lowercase()),
        b"dir" => Some(ctx.config.data_dir.display().to_string()),
        _ => None,
    };
    match value {
        Some(v) => Ok(RespValue::Array(vec![RespValue::Bulk(param.clone()), RespValue::bulk_from(v)])),
        None => Ok(RespValue::Array(Vec::new())),
    }
}

pub fn specs() -> Vec<CommandSpec> {
    vec![
        CommandSpec::simple("DBSIZE", CommandKind::Read, "server", dbsize),
        CommandSpec::simple("FLUSHDB", CommandKind::Write, "server", flushdb),
        CommandSpec::simple("FLUSHALL", CommandKind::Write, "server", flushall),
        CommandSpec::simple("SAVE", CommandKind::Write, "server", save),
        CommandSpec::simple("BGSAVE", CommandKind::Write, "server", bgsave),
        CommandSpec::with_subcommands(
            "COMMAND",
            "server",
            vec![
                SubcommandSpec::new("COUNT", command_count, CommandKind::Read),
                SubcommandSpec::new("DOCS", command_docs, CommandKind::Read),
            ],
        ),
        CommandSpec::with_subcommands(
            "CONFIG",
            "server",
            vec![SubcommandSpec::new("GET", config_get, CommandKind::Read)],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::connection::ConnectionRegistry;
    use crate::keyspace::Keyspace;
    use ember_core::TestClock;
    use std::sync::Arc;

    fn ctx() -> HandlerContext {
        HandlerContext {
            keyspace: Arc::new(Keyspace::new(Arc::new(TestClock::new(0)), Arc::new(ServerConfig::default()), None)),
            connections: Arc::new(ConnectionRegistry::new()),
            conn: None,
            database: 0,
            protocol: crate::connection::Protocol::Resp2,
            embedded: true,
            config: Arc::new(ServerConfig::default()),
            persistence: None,
            command_count: 42,
            state_copy: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            clustered: false,
            is_leader: true,
        }
    }

    #[test]
    fn command_count_reports_registry_snapshot() {
        let c = ctx();
        assert_eq!(command_count(&c, &[]).unwrap(), RespValue::Integer(42));
    }

    #[test]
    fn config_get_unknown_param_is_empty_array() {
        let c = ctx();
        match config_get(&c, &[Bytes::from_static(b"no-such-param")]).unwrap() {
            RespValue::Array(items) => assert!(items.is_empty()),
            other => panic!("expected array, got {other:?}"),
        }
    }

    #[test]
    fn save_without_persistence_is_not_supported() {
        let c = ctx();
        let err = save(&c, &[]).unwrap_err();
        assert_eq!(err.kind, ember_core::ErrorKind::NotSupported);
    }

    #[tokio::test]
    async fn save_holds_the_write_barrier_for_the_duration_of_the_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let keyspace = Arc::new(Keyspace::new(Arc::new(TestClock::new(0)), Arc::new(ServerConfig::default()), None));
        let preamble = Arc::new(crate::aof::PreambleStore::open(dir.path().join("emberdb.preamble")).unwrap());
        let append_log = Arc::new(
            crate::aof::AppendLog::open(dir.path().join("emberdb.aof"), crate::config::AofSyncStrategy::No).unwrap(),
        );
        let persistence = Arc::new(crate::aof::PersistenceController::new(preamble, append_log, Arc::clone(&keyspace)));

        let mut c = ctx();
        c.keyspace = keyspace;
        c.persistence = Some(persistence);

        assert!(!c.state_copy.load(Ordering::Acquire));
        save(&c, &[]).unwrap();
        assert!(!c.state_copy.load(Ordering::Acquire), "SAVE must clear the barrier before returning");
    }

    #[tokio::test]
    async fn bgsave_holds_the_write_barrier_until_the_background_rewrite_finishes() {
        let dir = tempfile::tempdir().unwrap();
        let keyspace = Arc::new(Keyspace::new(Arc::new(TestClock::new(0)), Arc::new(ServerConfig::default()), None));
        let preamble = Arc::new(crate::aof::PreambleStore::open(dir.path().join("emberdb.preamble")).unwrap());
        let append_log = Arc::new(
            crate::aof::AppendLog::open(dir.path().join("emberdb.aof"), crate::config::AofSyncStrategy::No).unwrap(),
        );
        let persistence = Arc::new(crate::aof::PersistenceController::new(preamble, append_log, Arc::clone(&keyspace)));

        let mut c = ctx();
        c.keyspace = keyspace;
        c.persistence = Some(persistence);

        bgsave(&c, &[]).unwrap();
        // `save_background` only schedules the rewrite on the blocking pool;
        // the barrier is still held the instant `bgsave` returns.
        assert!(c.state_copy.load(Ordering::Acquire));

        for _ in 0..200 {
            if !c.state_copy.load(Ordering::Acquire) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(!c.state_copy.load(Ordering::Acquire), "barrier must clear once the background rewrite finishes");
    }
}
