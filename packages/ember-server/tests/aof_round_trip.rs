//! AOF durability round-trip: commands written through the dispatcher are
//! enqueued to the append log, and replaying that log through a fresh
//! dispatcher reproduces the keyspace state.

use std::sync::Arc;

use bytes::Bytes;
use ember_core::TestClock;
use ember_server::aof::{log_store::spawn_writer, preamble::PreambleStore, AppendLog, PersistenceController};
use ember_server::command::{builtin, CommandRegistry};
use ember_server::config::{AofSyncStrategy, ServerConfig};
use ember_server::{ConnectionRegistry, Dispatcher, Keyspace};

fn cmd(args: &[&str]) -> Vec<Bytes> {
    args.iter().map(|a| Bytes::copy_from_slice(a.as_bytes())).collect()
}

fn registry() -> CommandRegistry {
    let mut registry = CommandRegistry::new();
    builtin::register_all(&mut registry).unwrap();
    registry
}

#[tokio::test]
async fn replaying_the_append_log_reproduces_keyspace_state() {
    let dir = tempfile::tempdir().unwrap();
    let aof_path = dir.path().join("emberdb.aof");

    let config = Arc::new(ServerConfig::default());
    let keyspace = Arc::new(Keyspace::new(Arc::new(TestClock::new(0)), Arc::clone(&config), None));
    let connections = Arc::new(ConnectionRegistry::new());
    let append_log = Arc::new(AppendLog::open(&aof_path, AofSyncStrategy::Always).unwrap());
    let aof_writer = spawn_writer(Arc::clone(&append_log), 16);

    let dispatcher = Dispatcher::new(
        registry(),
        Arc::clone(&keyspace),
        Arc::clone(&connections),
        Arc::clone(&config),
        Some(aof_writer),
        None,
        None,
        None,
    );
    let conn = connections.register();

    dispatcher.handle(cmd(&["SET", "alpha", "1"]), Some(conn), false, false).await.unwrap();
    dispatcher.handle(cmd(&["SET", "beta", "2"]), Some(conn), false, false).await.unwrap();
    dispatcher.handle(cmd(&["DEL", "alpha"]), Some(conn), false, false).await.unwrap();
    // GET is a read, it must not be appended.
    dispatcher.handle(cmd(&["GET", "beta"]), Some(conn), false, false).await.unwrap();

    // Give the writer task a chance to drain the queue before reopening the file.
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    drop(dispatcher);

    let replay_log = AppendLog::open(&aof_path, AofSyncStrategy::No).unwrap();
    let fresh_keyspace = Arc::new(Keyspace::new(Arc::new(TestClock::new(0)), Arc::clone(&config), None));
    let fresh_connections = Arc::new(ConnectionRegistry::new());
    let fresh_dispatcher = Dispatcher::new(registry(), Arc::clone(&fresh_keyspace), fresh_connections, config, None, None, None, None);

    let mut codec = ember_core::RespCodec::new();
    use tokio_util::codec::Decoder;
    replay_log
        .restore(|record| {
            let mut buf = bytes::BytesMut::from(record);
            let tokens = codec
                .decode(&mut buf)?
                .ok_or_else(|| ember_core::Error::protocol("incomplete aof record"))?;
            futures::executor::block_on(fresh_dispatcher.handle(tokens, None, true, true)).map(|_| ())
        })
        .unwrap();

    assert_eq!(fresh_keyspace.dbsize(0), 1);
    let values = fresh_keyspace.get_values(0, &[Bytes::from_static(b"beta")]);
    assert!(values.get(&Bytes::from_static(b"beta")).unwrap().is_some());
    let values = fresh_keyspace.get_values(0, &[Bytes::from_static(b"alpha")]);
    assert!(values.get(&Bytes::from_static(b"alpha")).unwrap().is_none());
}

#[tokio::test]
async fn save_then_restore_through_preamble_round_trips_state() {
    let dir = tempfile::tempdir().unwrap();
    let config = Arc::new(ServerConfig::default());
    let keyspace = Arc::new(Keyspace::new(Arc::new(TestClock::new(0)), Arc::clone(&config), None));
    keyspace.set_values(0, vec![(Bytes::from_static(b"k"), ember_core::Value::String(Bytes::from_static(b"v")))]).unwrap();

    let preamble = Arc::new(PreambleStore::open(dir.path().join("emberdb.preamble")).unwrap());
    preamble.create_preamble(&keyspace).unwrap();

    let restored = Arc::new(Keyspace::new(Arc::new(TestClock::new(0)), config, None));
    preamble.restore(&restored).unwrap();

    assert_eq!(restored.dbsize(0), 1);
}
