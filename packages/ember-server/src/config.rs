//! Server-level configuration.
//!
//! A single typed `ServerConfig` drives every subsystem -- constructible
//! programmatically (embedding, tests) or via `clap` derive for the
//! standalone binary. Loading from a config *file*, TLS/mTLS certificate
//! provisioning, and module dynamic loading are handed to the outer process;
//! this struct still carries their fields so the rest of the core is driven
//! by one value.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// AOF fsync strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum AofSyncStrategy {
    /// fsync after every record.
    Always,
    /// background task fsyncs at a 1s cadence.
    Everysec,
    /// no explicit fsync.
    No,
}

/// Eviction policy selecting which cache (LFU/LRU) and key population
/// (all keys / only volatile keys) backs eviction, or disables it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum EvictionPolicy {
    Noeviction,
    AllkeysLfu,
    AllkeysLru,
    VolatileLfu,
    VolatileLru,
    AllkeysRandom,
    VolatileRandom,
}

impl EvictionPolicy {
    #[must_use]
    pub fn is_volatile_only(self) -> bool {
        matches!(
            self,
            EvictionPolicy::VolatileLfu | EvictionPolicy::VolatileLru | EvictionPolicy::VolatileRandom
        )
    }

    #[must_use]
    pub fn is_noeviction(self) -> bool {
        matches!(self, EvictionPolicy::Noeviction)
    }
}

/// Full server configuration, covering every externally configurable field:
/// networking, durability, memory/eviction, access control, and clustering.
#[derive(Debug, Clone, Parser)]
#[command(name = "emberdb-server", about = "In-memory multi-database key-value store")]
pub struct ServerConfig {
    #[arg(long, default_value = "0.0.0.0")]
    pub bind_addr: String,
    #[arg(long, default_value_t = 0)]
    pub port: u16,
    #[arg(long, default_value_t = false)]
    pub tls: bool,
    #[arg(long, default_value_t = false)]
    pub mtls: bool,
    #[arg(skip)]
    pub cert_key_pairs: Vec<(PathBuf, PathBuf)>,
    #[arg(skip)]
    pub client_cas: Vec<PathBuf>,

    #[arg(long, default_value = "./data")]
    pub data_dir: PathBuf,
    #[arg(long, default_value_t = true)]
    pub restore_aof: bool,
    #[arg(long, default_value_t = true)]
    pub restore_snapshot: bool,
    #[arg(long, value_enum, default_value_t = AofSyncStrategy::Everysec)]
    pub aof_sync_strategy: AofSyncStrategy,

    #[arg(long, default_value_t = 10_000)]
    pub snapshot_threshold: u64,
    #[arg(skip)]
    pub snapshot_interval: Duration,

    #[arg(long, default_value_t = 0)]
    pub max_memory: u64,
    #[arg(long, value_enum, default_value_t = EvictionPolicy::Noeviction)]
    pub eviction_policy: EvictionPolicy,
    #[arg(long, default_value_t = 5)]
    pub eviction_sample: u32,
    #[arg(skip)]
    pub eviction_interval: Duration,

    #[arg(long, default_value_t = false)]
    pub require_pass: bool,
    #[arg(long, default_value = "")]
    pub password: String,
    #[arg(skip)]
    pub acl_config: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    pub bootstrap_cluster: bool,
    #[arg(skip)]
    pub join_addr: Option<String>,
    #[arg(long, default_value = "0.0.0.0")]
    pub raft_bind_addr: String,
    #[arg(long, default_value_t = 0)]
    pub raft_bind_port: u16,
    #[arg(long, default_value_t = 0)]
    pub discovery_port: u16,
    #[arg(long, default_value_t = true)]
    pub forward_command: bool,
    #[arg(long, default_value = "")]
    pub server_id: String,

    /// Bound on concurrent in-flight write commands (write-gate / load-shed).
    #[arg(long, default_value_t = 1000)]
    pub max_concurrent_writes: u32,
    /// Capacity of the AOF writer's in-memory queue.
    #[arg(long, default_value_t = 4096)]
    pub aof_queue_capacity: usize,
    /// Optional address for the Prometheus metrics exporter.
    #[arg(skip)]
    pub metrics_addr: Option<std::net::SocketAddr>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 0,
            tls: false,
            mtls: false,
            cert_key_pairs: Vec::new(),
            client_cas: Vec::new(),
            data_dir: PathBuf::from("./data"),
            restore_aof: true,
            restore_snapshot: true,
            aof_sync_strategy: AofSyncStrategy::Everysec,
            snapshot_threshold: 10_000,
            snapshot_interval: Duration::from_secs(3600),
            max_memory: 0,
            eviction_policy: EvictionPolicy::Noeviction,
            eviction_sample: 5,
            eviction_interval: Duration::from_millis(100),
            require_pass: false,
            password: String::new(),
            acl_config: None,
            bootstrap_cluster: false,
            join_addr: None,
            raft_bind_addr: "0.0.0.0".to_string(),
            raft_bind_port: 0,
            discovery_port: 0,
            forward_command: true,
            server_id: String::new(),
            max_concurrent_writes: 1000,
            aof_queue_capacity: 4096,
            metrics_addr: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_standalone_dev_friendly() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.port, 0);
        assert!(!cfg.tls);
        assert!(cfg.eviction_policy.is_noeviction());
        assert_eq!(cfg.max_memory, 0);
    }

    #[test]
    fn eviction_policy_classifies_volatile_variants() {
        assert!(EvictionPolicy::VolatileLfu.is_volatile_only());
        assert!(EvictionPolicy::VolatileLru.is_volatile_only());
        assert!(!EvictionPolicy::AllkeysLfu.is_volatile_only());
        assert!(!EvictionPolicy::Noeviction.is_volatile_only());
    }
}
