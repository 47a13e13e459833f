//! Connection context registry: a thread-safe mapping from
//! connection handle to `ConnectionInfo`, plus a single embedded-caller slot.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

/// Monotonically increasing connection identifier assigned by the TCP
/// acceptor.
pub type ConnectionId = u64;

/// Wire protocol version negotiated via `HELLO`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    #[default]
    Resp2,
    Resp3,
}

/// Per-connection state the dispatcher binds into its context on every
/// request.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub name: String,
    pub protocol: Protocol,
    pub database: u64,
}

impl Default for ConnectionInfo {
    fn default() -> Self {
        Self {
            name: String::new(),
            protocol: Protocol::Resp2,
            database: 0,
        }
    }
}

/// Thread-safe connection registry. `DashMap` gives per-shard locking so a
/// lookup on one connection never contends with a lookup on another, which
/// is the concurrent analogue of the "own read/write lock held briefly per
/// lookup" requirement.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, ConnectionInfo>,
    embedded: ConnectionInfo,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns the next monotonically increasing connection id and registers
    /// a default `ConnectionInfo` for it.
    pub fn register(&self) -> ConnectionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.connections.insert(id, ConnectionInfo::default());
        id
    }

    pub fn deregister(&self, conn: ConnectionId) {
        self.connections.remove(&conn);
    }

    #[must_use]
    pub fn get(&self, conn: ConnectionId) -> Option<ConnectionInfo> {
        self.connections.get(&conn).map(|r| r.clone())
    }

    #[must_use]
    pub fn embedded(&self) -> ConnectionInfo {
        self.embedded.clone()
    }

    pub fn set(&self, conn: ConnectionId, name: Option<String>, protocol: Option<Protocol>, database: Option<u64>) {
        if let Some(mut entry) = self.connections.get_mut(&conn) {
            if let Some(name) = name {
                entry.name = name;
            }
            if let Some(protocol) = protocol {
                entry.protocol = protocol;
            }
            if let Some(database) = database {
                entry.database = database;
            }
        }
    }

    /// `select(conn, db)`: updates only that connection's database. The
    /// caller is responsible for materializing `db` in the keyspace first.
    pub fn select(&self, conn: ConnectionId, db: u64) {
        self.set(conn, None, None, Some(db));
    }

    /// `swap_databases(a,b)`: reassigns every connection currently on `a` to
    /// `b` and vice versa, leaving all others untouched. Materializing
    /// either database is the caller's responsibility.
    pub fn swap_databases(&self, a: u64, b: u64) {
        if a == b {
            return;
        }
        for mut entry in self.connections.iter_mut() {
            if entry.database == a {
                entry.database = b;
            } else if entry.database == b {
                entry.database = a;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_assigns_increasing_ids() {
        let registry = ConnectionRegistry::new();
        let a = registry.register();
        let b = registry.register();
        assert!(b > a);
    }

    #[test]
    fn select_updates_only_that_connection() {
        let registry = ConnectionRegistry::new();
        let a = registry.register();
        let b = registry.register();
        registry.select(a, 3);
        assert_eq!(registry.get(a).unwrap().database, 3);
        assert_eq!(registry.get(b).unwrap().database, 0);
    }

    #[test]
    fn swap_databases_only_touches_matching_connections() {
        let registry = ConnectionRegistry::new();
        let a = registry.register();
        let b = registry.register();
        let c = registry.register();
        registry.select(a, 1);
        registry.select(b, 2);
        registry.select(c, 5);

        registry.swap_databases(1, 2);

        assert_eq!(registry.get(a).unwrap().database, 2);
        assert_eq!(registry.get(b).unwrap().database, 1);
        assert_eq!(registry.get(c).unwrap().database, 5);
    }

    #[test]
    fn deregister_removes_connection() {
        let registry = ConnectionRegistry::new();
        let a = registry.register();
        registry.deregister(a);
        assert!(registry.get(a).is_none());
    }
}
