//! The dispatcher: resolves a decoded command against the
//! registry, authorizes it, serializes it against the write barrier, and
//! routes it to a handler, the cluster, or the AOF.

mod pipeline;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use ember_core::{encode_command, Command, Error, RespValue};
use parking_lot::RwLock as PLRwLock;

use crate::aof::{AofWriter, PersistenceController};
use crate::cluster::{Authorizer, Cluster};
use crate::command::{CommandKind, CommandRegistry, HandlerContext};
use crate::config::ServerConfig;
use crate::connection::{ConnectionId, ConnectionRegistry, Protocol};
use crate::keyspace::Keyspace;

pub use pipeline::{DispatchMetrics, WriteLoadShed};

/// Bound on the write-barrier spin before it logs a warning and keeps
/// waiting anyway.
const WRITE_BARRIER_WARN_AFTER: u32 = 10_000;

/// Everything the dispatcher needs, assembled once at startup and shared
/// across every connection task.
pub struct Dispatcher {
    registry: PLRwLock<CommandRegistry>,
    keyspace: Arc<Keyspace>,
    connections: Arc<ConnectionRegistry>,
    config: Arc<ServerConfig>,
    aof: Option<AofWriter>,
    persistence: Option<Arc<PersistenceController>>,
    authorizer: Option<Arc<dyn Authorizer>>,
    cluster: Option<Arc<dyn Cluster>>,
    /// A preamble rewrite excludes concurrent writes, and vice versa. Shared
    /// with `HandlerContext` so `SAVE`/`BGSAVE` can flip it around the
    /// rewrite without the handler needing a `Dispatcher` reference.
    state_copy_in_progress: Arc<AtomicBool>,
    metrics: DispatchMetrics,
    load_shed: WriteLoadShed,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        registry: CommandRegistry,
        keyspace: Arc<Keyspace>,
        connections: Arc<ConnectionRegistry>,
        config: Arc<ServerConfig>,
        aof: Option<AofWriter>,
        persistence: Option<Arc<PersistenceController>>,
        authorizer: Option<Arc<dyn Authorizer>>,
        cluster: Option<Arc<dyn Cluster>>,
    ) -> Self {
        let load_shed = WriteLoadShed::new(config.max_concurrent_writes);
        Self {
            registry: PLRwLock::new(registry),
            keyspace,
            connections,
            config,
            aof,
            persistence,
            authorizer,
            cluster,
            state_copy_in_progress: Arc::new(AtomicBool::new(false)),
            metrics: DispatchMetrics::default(),
            load_shed,
        }
    }

    /// Marks a preamble rewrite as starting/finished, so new write commands
    /// spin until it clears.
    pub fn begin_state_copy(&self) {
        self.state_copy_in_progress.store(true, Ordering::Release);
    }

    pub fn end_state_copy(&self) {
        self.state_copy_in_progress.store(false, Ordering::Release);
    }

    #[must_use]
    pub fn command_count(&self) -> usize {
        self.registry.read().len()
    }

    /// `handle(ctx, raw_bytes, conn, replay, embedded) -> bytes`.
    /// `tokens` is the already-decoded command line; the framing decode
    /// itself happens once in the connection/embedded read path via the
    /// shared wire codec, which is the concrete mechanism backing this
    /// step's "Decode raw_bytes -> tokens".
    pub async fn handle(&self, tokens: Command, conn: Option<ConnectionId>, replay: bool, embedded: bool) -> Result<Vec<u8>, Error> {
        if tokens.is_empty() {
            return Err(Error::protocol("empty command"));
        }
        if tokens[0].eq_ignore_ascii_case(b"QUIT") {
            return Err(Error::eof());
        }

        let (database, protocol) = self.bind_connection_fields(conn, embedded);

        let name = String::from_utf8_lossy(&tokens[0]).into_owned();
        let registry = self.registry.read();
        let Some(spec) = registry.get(&name) else {
            return Err(Error::not_supported(format!("command {name} not supported")));
        };

        let (handler, kind, synced, subcommand) = if spec.subcommands.is_empty() {
            (spec.handler, spec.kind, spec.synced, None)
        } else {
            let sub_name = tokens
                .get(1)
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .ok_or_else(|| Error::not_supported(format!("command {name} not supported")))?;
            let Some(sub) = spec.find_subcommand(&sub_name) else {
                return Err(Error::not_supported(format!("command {name} {sub_name} not supported")));
            };
            (sub.handler, sub.kind, sub.synced, Some(sub_name))
        };
        drop(registry);

        if let (Some(conn), Some(authorizer)) = (conn, self.authorizer.as_ref()) {
            if !embedded {
                authorizer.authorize(conn, &tokens, &name, subcommand.as_deref())?;
            }
        }

        let is_write = kind == CommandKind::Write;
        let _load_shed_permit = if is_write {
            Some(self.load_shed.try_acquire()?)
        } else {
            None
        };
        if is_write {
            self.wait_for_write_barrier().await;
        }
        let started_at = std::time::Instant::now();
        let result = self
            .dispatch(&tokens, handler, is_write, synced, database, protocol, conn, embedded, replay)
            .await;
        self.metrics.record(&name, result.is_ok());
        self.metrics.record_latency(&name, started_at.elapsed());
        result
    }

    fn bind_connection_fields(&self, conn: Option<ConnectionId>, embedded: bool) -> (u64, Protocol) {
        if embedded {
            let info = self.connections.embedded();
            return (info.database, info.protocol);
        }
        match conn.and_then(|c| self.connections.get(c)) {
            Some(info) => (info.database, info.protocol),
            None => (0, Protocol::Resp2),
        }
    }

    async fn wait_for_write_barrier(&self) {
        let mut spins: u32 = 0;
        while self.state_copy_in_progress.load(Ordering::Acquire) {
            spins += 1;
            if spins == WRITE_BARRIER_WARN_AFTER {
                tracing::warn!("write barrier spin exceeded expected bound; still waiting on state copy");
            }
            tokio::task::yield_now().await;
        }
    }

    /// Routes per spec.md's dispatch step: a non-synced command (every read,
    /// plus any write not marked `synced`) always invokes the handler
    /// locally, regardless of whether a cluster is configured. Only a
    /// synced command under an active cluster goes through
    /// `cluster.apply`/`forward`/`NotLeader`.
    #[allow(clippy::too_many_arguments)]
    async fn dispatch(
        &self,
        tokens: &[Bytes],
        handler: crate::command::Handler,
        is_write: bool,
        synced: bool,
        database: u64,
        protocol: Protocol,
        conn: Option<ConnectionId>,
        embedded: bool,
        replay: bool,
    ) -> Result<Vec<u8>, Error> {
        let route = match &self.cluster {
            Some(cluster) if synced => Some(cluster.is_leader()),
            _ => None,
        };

        match route {
            None => {
                let ctx = self.handler_context(conn, database, protocol, embedded);
                let value = handler(&ctx, &tokens[1..])?;
                if is_write && !replay {
                    self.enqueue_aof(tokens).await;
                }
                Ok(value.encode(protocol_version(protocol)))
            }
            Some(true) => {
                let cluster = self.cluster.as_ref().expect("checked Some above");
                let value = cluster.apply(tokens).await?;
                Ok(value.to_vec())
            }
            Some(false) => {
                if self.config.forward_command {
                    let cluster = self.cluster.as_ref().expect("checked Some above");
                    let _ = cluster.forward(conn.unwrap_or(0), &encode_command(tokens)).await?;
                    Ok(RespValue::ok().encode(protocol_version(protocol)))
                } else {
                    Err(Error::not_leader())
                }
            }
        }
    }

    fn handler_context(&self, conn: Option<ConnectionId>, database: u64, protocol: Protocol, embedded: bool) -> HandlerContext {
        HandlerContext {
            keyspace: Arc::clone(&self.keyspace),
            connections: Arc::clone(&self.connections),
            conn,
            database,
            protocol,
            embedded,
            config: Arc::clone(&self.config),
            persistence: self.persistence.clone(),
            command_count: self.command_count(),
            state_copy: Arc::clone(&self.state_copy_in_progress),
            clustered: self.cluster.is_some(),
            is_leader: self.cluster.as_ref().map_or(true, |c| c.is_leader()),
        }
    }

    async fn enqueue_aof(&self, tokens: &[Bytes]) {
        if let Some(aof) = &self.aof {
            aof.enqueue(encode_command(tokens)).await;
        }
    }

    pub fn registry_mut(&self) -> parking_lot::RwLockWriteGuard<'_, CommandRegistry> {
        self.registry.write()
    }
}

fn protocol_version(protocol: Protocol) -> u8 {
    if protocol == Protocol::Resp3 {
        3
    } else {
        2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::builtin;
    use ember_core::TestClock;

    fn dispatcher() -> Dispatcher {
        let mut registry = CommandRegistry::new();
        builtin::register_all(&mut registry).unwrap();
        let keyspace = Arc::new(Keyspace::new(Arc::new(TestClock::new(0)), Arc::new(ServerConfig::default()), None));
        let connections = Arc::new(ConnectionRegistry::new());
        Dispatcher::new(
            registry,
            keyspace,
            connections,
            Arc::new(ServerConfig::default()),
            None,
            None,
            None,
            None,
        )
    }

    #[tokio::test]
    async fn empty_command_is_protocol_error() {
        let d = dispatcher();
        let err = d.handle(vec![], None, false, true).await.unwrap_err();
        assert_eq!(err.kind, ember_core::ErrorKind::ProtocolError);
    }

    #[tokio::test]
    async fn quit_is_eof() {
        let d = dispatcher();
        let err = d.handle(vec![Bytes::from_static(b"QUIT")], None, false, true).await.unwrap_err();
        assert!(err.is_eof());
    }

    #[tokio::test]
    async fn unknown_command_is_not_supported() {
        let d = dispatcher();
        let err = d
            .handle(vec![Bytes::from_static(b"BOGUS")], None, false, true)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ember_core::ErrorKind::NotSupported);
    }

    #[tokio::test]
    async fn unknown_subcommand_reports_both_names() {
        let d = dispatcher();
        let err = d
            .handle(
                vec![Bytes::from_static(b"CLIENT"), Bytes::from_static(b"BOGUS")],
                None,
                false,
                true,
            )
            .await
            .unwrap_err();
        assert!(err.message.contains("CLIENT") && err.message.contains("BOGUS"));
    }

    #[tokio::test]
    async fn set_then_get_round_trips_through_dispatcher() {
        let d = dispatcher();
        d.handle(
            vec![Bytes::from_static(b"SET"), Bytes::from_static(b"k"), Bytes::from_static(b"v")],
            None,
            false,
            true,
        )
        .await
        .unwrap();
        let response = d
            .handle(vec![Bytes::from_static(b"GET"), Bytes::from_static(b"k")], None, false, true)
            .await
            .unwrap();
        assert_eq!(response, b"$1\r\nv\r\n");
    }

    /// A cluster that never considers itself leader; `apply`/`forward` panic
    /// if called, since a correct non-synced route never reaches them.
    struct NeverLeader;

    #[async_trait::async_trait]
    impl Cluster for NeverLeader {
        fn is_leader(&self) -> bool {
            false
        }

        async fn apply(&self, _tokens: &[Bytes]) -> Result<Bytes, Error> {
            unreachable!("non-synced command must not reach cluster.apply")
        }

        async fn forward(&self, _conn: ConnectionId, _raw_bytes: &[u8]) -> Result<Bytes, Error> {
            unreachable!("forward_command=false must short-circuit before cluster.forward")
        }
    }

    fn clustered_dispatcher(forward_command: bool) -> Dispatcher {
        let mut registry = CommandRegistry::new();
        builtin::register_all(&mut registry).unwrap();
        let keyspace = Arc::new(Keyspace::new(Arc::new(TestClock::new(0)), Arc::new(ServerConfig::default()), None));
        let connections = Arc::new(ConnectionRegistry::new());
        let config = ServerConfig {
            forward_command,
            ..ServerConfig::default()
        };
        Dispatcher::new(
            registry,
            keyspace,
            connections,
            Arc::new(config),
            None,
            None,
            None,
            Some(Arc::new(NeverLeader)),
        )
    }

    #[tokio::test]
    async fn non_synced_read_answers_locally_even_when_clustered_and_not_leader() {
        let d = clustered_dispatcher(false);
        let response = d
            .handle(vec![Bytes::from_static(b"PING")], None, false, true)
            .await
            .unwrap();
        assert_eq!(response, b"+PONG\r\n");
    }

    #[tokio::test]
    async fn synced_write_reports_not_leader_when_clustered_not_leader_and_forward_disabled() {
        let d = clustered_dispatcher(false);
        let err = d
            .handle(
                vec![Bytes::from_static(b"SET"), Bytes::from_static(b"k"), Bytes::from_static(b"v")],
                None,
                false,
                true,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ember_core::ErrorKind::NotLeader);
    }
}
