//! Standalone `emberdb-server` binary: parses configuration, restores
//! durable state, wires the keyspace/dispatcher/AOF stack, and serves until
//! a shutdown signal arrives.

use std::sync::Arc;

use clap::Parser;
use ember_core::SystemClock;
use ember_server::aof::{preamble::PreambleStore, spawn_everysec_fsync, spawn_writer, AppendLog, PersistenceController};
use ember_server::command::{builtin, CommandRegistry};
use ember_server::config::AofSyncStrategy;
use ember_server::{ConnectionRegistry, Dispatcher, Keyspace, ServerConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Arc::new(ServerConfig::parse());

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Some(addr) = config.metrics_addr {
        let builder = metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(addr);
        builder.install()?;
        tracing::info!(%addr, "metrics exporter listening");
    }

    std::fs::create_dir_all(&config.data_dir)?;

    let clock = Arc::new(SystemClock);
    let keyspace = Arc::new(Keyspace::new(clock, Arc::clone(&config), None));
    let connections = Arc::new(ConnectionRegistry::new());

    let append_log = Arc::new(AppendLog::open(config.data_dir.join("emberdb.aof"), config.aof_sync_strategy)?);
    let preamble = Arc::new(PreambleStore::open(config.data_dir.join("emberdb.preamble"))?);
    let persistence = Arc::new(PersistenceController::new(Arc::clone(&preamble), Arc::clone(&append_log), Arc::clone(&keyspace)));

    let mut registry = CommandRegistry::new();
    builtin::register_all(&mut registry)?;

    let aof_writer = spawn_writer(Arc::clone(&append_log), config.aof_queue_capacity);
    if config.aof_sync_strategy == AofSyncStrategy::Everysec {
        spawn_everysec_fsync(Arc::clone(&append_log));
    }

    let dispatcher = Arc::new(Dispatcher::new(
        registry,
        Arc::clone(&keyspace),
        Arc::clone(&connections),
        Arc::clone(&config),
        Some(aof_writer),
        Some(Arc::clone(&persistence)),
        None,
        None,
    ));

    if config.restore_snapshot || config.restore_aof {
        restore_on_startup(&config, &persistence, &dispatcher).await?;
    }

    let sampler = ember_server::keyspace::sampler::TtlSampler::new(
        Arc::clone(&keyspace),
        config.eviction_interval,
        config.eviction_sample as usize,
    );
    tokio::spawn(sampler.run());

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        tracing::info!("received shutdown signal");
        let _ = shutdown_tx.send(());
    });

    ember_server::net::serve(&config.bind_addr, config.port, dispatcher, connections, shutdown_rx).await?;
    Ok(())
}

/// Preamble first, append log second, for crash-consistent recovery. Each
/// replayed record re-enters the dispatcher with `replay=true` so it doesn't
/// get re-appended to the log it came from.
async fn restore_on_startup(config: &ServerConfig, persistence: &Arc<PersistenceController>, dispatcher: &Arc<Dispatcher>) -> anyhow::Result<()> {
    if !config.restore_snapshot {
        return Ok(());
    }
    let records = persistence.restore_preamble_and_read_records()?;
    if !config.restore_aof {
        return Ok(());
    }
    for record in records {
        let tokens = decode_record(&record)?;
        dispatcher.handle(tokens, None, true, true).await?;
    }
    Ok(())
}

/// Waits for Ctrl-C or, on unix, `SIGTERM` -- whichever arrives first.
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn decode_record(record: &[u8]) -> Result<ember_core::Command, ember_core::Error> {
    use tokio_util::codec::Decoder;
    let mut codec = ember_core::RespCodec::new();
    let mut buf = bytes::BytesMut::from(record);
    codec
        .decode(&mut buf)?
        .ok_or_else(|| ember_core::Error::protocol("incomplete aof record"))
}
