//! Preamble store: a deterministic full-state snapshot written
//! ahead of the append log so replay is bounded.
//!
//! Crash consistency contract: on startup the preamble is restored *before*
//! the append log is replayed, reproducing the pre-rewrite state exactly.
//! At most one rewrite may run at a time; concurrent rewrites fail `Busy`.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use ember_core::Error;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::keyspace::{ExpiryCondition, Keyspace};

#[derive(Serialize, Deserialize)]
struct PreambleRecord {
    db: u64,
    #[serde(with = "serde_bytes")]
    key: Vec<u8>,
    value: ember_core::Value,
    expire_at: Option<u64>,
}

/// The preamble's on-disk file plus the single-rewrite-at-a-time guard.
pub struct PreambleStore {
    path: PathBuf,
    file: Mutex<File>,
    rewrite_in_progress: AtomicBool,
}

impl PreambleStore {
    pub fn open(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().create(true).read(true).write(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
            rewrite_in_progress: AtomicBool::new(false),
        })
    }

    /// Serializes the entire live keyspace deterministically, truncating and
    /// rewriting the file from offset 0, then fsyncing. Runs under the
    /// rewrite-in-progress flag; a concurrent call fails with `Busy`.
    pub fn create_preamble(&self, keyspace: &Keyspace) -> Result<(), Error> {
        if self
            .rewrite_in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::busy("BUSY a preamble rewrite is already in progress"));
        }
        let result = self.write_snapshot(keyspace);
        self.rewrite_in_progress.store(false, Ordering::Release);
        result
    }

    fn write_snapshot(&self, keyspace: &Keyspace) -> Result<(), Error> {
        let mut snapshot = keyspace.snapshot();
        // Deterministic ordering: sort by (db, key) so two runs over the same
        // state produce byte-identical preambles.
        snapshot.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

        let records: Vec<PreambleRecord> = snapshot
            .into_iter()
            .map(|(db, key, kd)| PreambleRecord {
                db,
                key: key.to_vec(),
                value: kd.value,
                expire_at: kd.expire_at,
            })
            .collect();
        let encoded = rmp_serde::to_vec(&records).map_err(|err| Error::protocol(format!("preamble encode failed: {err}")))?;

        let mut file = self.file.lock();
        file.set_len(0).map_err(io_err)?;
        file.seek(SeekFrom::Start(0)).map_err(io_err)?;
        file.write_all(&encoded).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        Ok(())
    }

    /// Materializes each `(db, key, value, expire_at)` through the
    /// keyspace's `set_values`/`set_expiry` pair.
    pub fn restore(&self, keyspace: &Keyspace) -> Result<(), Error> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(0)).map_err(io_err)?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).map_err(io_err)?;
        drop(file);
        if buf.is_empty() {
            return Ok(());
        }
        let records: Vec<PreambleRecord> =
            rmp_serde::from_slice(&buf).map_err(|err| Error::protocol(format!("preamble decode failed: {err}")))?;

        for record in records {
            keyspace.create_database(record.db);
            let key = Bytes::from(record.key);
            keyspace.set_values(record.db, vec![(key.clone(), record.value)])?;
            if let Some(expire_at) = record.expire_at {
                keyspace.set_expiry(record.db, &key, expire_at, ExpiryCondition::None, true);
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn io_err(err: std::io::Error) -> Error {
    Error::protocol(format!("preamble io error: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use ember_core::{TestClock, Value};
    use std::sync::Arc;

    #[test]
    fn create_then_restore_round_trips_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preamble.bin");

        let clock = Arc::new(TestClock::new(1000));
        let ks = Keyspace::new(clock.clone(), Arc::new(ServerConfig::default()), None);
        ks.set_values(0, vec![(Bytes::from_static(b"k1"), Value::Int(42))]).unwrap();
        ks.set_expiry(0, &Bytes::from_static(b"k1"), 5000, ExpiryCondition::None, true);

        let store = PreambleStore::open(&path).unwrap();
        store.create_preamble(&ks).unwrap();

        let ks2 = Keyspace::new(clock, Arc::new(ServerConfig::default()), None);
        store.restore(&ks2).unwrap();

        let got = ks2.get_values(0, &[Bytes::from_static(b"k1")]);
        assert_eq!(got.get(&Bytes::from_static(b"k1")).unwrap(), &Some(Value::Int(42)));
        assert_eq!(ks2.ttl_millis(0, &Bytes::from_static(b"k1")), Some(Some(4000)));
    }

    #[test]
    fn concurrent_create_preamble_is_busy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preamble.bin");
        let store = PreambleStore::open(&path).unwrap();
        store.rewrite_in_progress.store(true, Ordering::SeqCst);

        let ks = Keyspace::new(Arc::new(TestClock::new(0)), Arc::new(ServerConfig::default()), None);
        let err = store.create_preamble(&ks).unwrap_err();
        assert_eq!(err.kind, ember_core::ErrorKind::Busy);
    }

    #[test]
    fn restore_on_empty_file_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preamble.bin");
        let store = PreambleStore::open(&path).unwrap();
        let ks = Keyspace::new(Arc::new(TestClock::new(0)), Arc::new(ServerConfig::default()), None);
        store.restore(&ks).unwrap();
        assert_eq!(ks.dbsize(0), 0);
    }
}
