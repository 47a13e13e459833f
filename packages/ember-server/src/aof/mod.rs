//! Durability: the append log, the preamble snapshot, and the controller
//! that ties `SAVE`/`BGSAVE` to both.

pub mod log_store;
pub mod preamble;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ember_core::Error;

pub use log_store::{spawn_everysec_fsync, spawn_writer, AofWriter, AppendLog};
pub use preamble::PreambleStore;

use crate::keyspace::Keyspace;

/// Bundles the preamble and append log the way `SAVE`/`BGSAVE` need them:
/// write a fresh preamble, then truncate the log, atomically with respect to
/// other concurrent rewrite attempts.
pub struct PersistenceController {
    preamble: Arc<PreambleStore>,
    append_log: Arc<AppendLog>,
    keyspace: Arc<Keyspace>,
}

impl PersistenceController {
    #[must_use]
    pub fn new(preamble: Arc<PreambleStore>, append_log: Arc<AppendLog>, keyspace: Arc<Keyspace>) -> Self {
        Self {
            preamble,
            append_log,
            keyspace,
        }
    }

    /// `SAVE`: blocking rewrite on the calling task. Foreground saves are
    /// rare (an operator action or a threshold trip), so blocking the
    /// handler's worker thread for the duration is an accepted tradeoff.
    pub fn save_blocking(&self) -> Result<(), Error> {
        self.preamble.create_preamble(&self.keyspace)?;
        self.append_log
            .truncate()
            .map_err(|err| Error::protocol(format!("aof truncate failed: {err}")))
    }

    /// `BGSAVE`: runs the same rewrite on a blocking-pool thread so the
    /// caller's connection isn't held up. Clears `state_copy` once the
    /// rewrite finishes, whether it succeeded or failed.
    pub fn save_background(self: &Arc<Self>, state_copy: Arc<AtomicBool>) {
        let this = Arc::clone(self);
        tokio::task::spawn_blocking(move || {
            if let Err(err) = this.save_blocking() {
                tracing::error!(%err, "background save failed");
            }
            state_copy.store(false, Ordering::Release);
        });
    }

    /// Restores on startup: preamble first, then the append log replayed
    /// through `apply` with `replay=true`.
    pub fn restore(&self, apply: impl FnMut(&[u8]) -> Result<(), Error>) -> Result<(), Error> {
        self.preamble.restore(&self.keyspace)?;
        self.append_log
            .restore(apply)
            .map_err(|err| Error::protocol(format!("aof restore failed: {err}")))
    }

    /// Preamble restore plus the append log's parsed records, for callers
    /// that need to replay each record through an async dispatcher call
    /// rather than a synchronous closure.
    pub fn restore_preamble_and_read_records(&self) -> Result<Vec<Vec<u8>>, Error> {
        self.preamble.restore(&self.keyspace)?;
        self.append_log
            .read_records()
            .map_err(|err| Error::protocol(format!("aof read failed: {err}")))
    }
}
