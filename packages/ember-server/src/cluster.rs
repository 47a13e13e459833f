//! External collaborator traits the dispatcher and keyspace consult but never
//! implement: cluster replication and command authorization. Both are owned
//! by whatever embeds this crate; the core only defines the seam.

use async_trait::async_trait;
use bytes::Bytes;
use ember_core::Error;

use crate::connection::ConnectionId;

/// Replication seam consulted by the dispatcher (for write commands) and the
/// keyspace (for lazily-expired-key deletes). A standalone deployment runs
/// with no `Cluster` at all.
#[async_trait]
pub trait Cluster: Send + Sync {
    /// Whether this node currently believes itself to be the leader.
    fn is_leader(&self) -> bool;

    /// Applies an already-decoded command's tokens through consensus,
    /// returning the encoded response once committed.
    async fn apply(&self, tokens: &[Bytes]) -> Result<Bytes, Error>;

    /// Forwards the raw request bytes to the current leader, returning its
    /// raw response bytes.
    async fn forward(&self, conn: ConnectionId, raw_bytes: &[u8]) -> Result<Bytes, Error>;
}

/// Authorization seam consulted by the dispatcher for every non-embedded
/// command. `tokens` is the full decoded command line (command name first).
pub trait Authorizer: Send + Sync {
    fn authorize(
        &self,
        conn: ConnectionId,
        tokens: &[Bytes],
        command: &str,
        subcommand: Option<&str>,
    ) -> Result<(), Error>;
}
