//! Append-only log store.
//!
//! A single-consumer writer task drains a bounded in-memory queue filled by
//! the dispatcher; once the queue is full, `enqueue` makes write commands
//! wait for space rather than growing without bound. Three sync strategies
//! govern when the underlying file is fsynced: `always` after every record,
//! `everysec` on a background 1s ticker, `no` never explicitly.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::config::AofSyncStrategy;

/// Producer handle held by the dispatcher. Cloned into every connection
/// task. Backed by a bounded channel: once the queue is full, `enqueue`
/// waits for the writer task to drain space rather than growing unbounded.
#[derive(Clone)]
pub struct AofWriter {
    sender: mpsc::Sender<Vec<u8>>,
}

impl AofWriter {
    /// Enqueues a raw command record for durable append. Waits for queue
    /// space once the bounded channel is full, applying backpressure to the
    /// write path.
    pub async fn enqueue(&self, record: Vec<u8>) {
        // The receiver only disappears if the writer task has already shut
        // down (process exit); dropping the record at that point is correct.
        let _ = self.sender.send(record).await;
    }
}

/// The append log's on-disk file plus its sync strategy.
pub struct AppendLog {
    path: PathBuf,
    file: Mutex<File>,
    strategy: AofSyncStrategy,
}

impl AppendLog {
    pub fn open(path: impl Into<PathBuf>, strategy: AofSyncStrategy) -> std::io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
            strategy,
        })
    }

    /// Appends one record followed by a blank-line boundary marker, so
    /// `restore()` can find record boundaries even across null-byte padding.
    fn write(&self, record: &[u8]) -> std::io::Result<()> {
        let mut file = self.file.lock();
        file.write_all(record)?;
        file.write_all(b"\n\n")?;
        if self.strategy == AofSyncStrategy::Always {
            file.sync_data()?;
        }
        Ok(())
    }

    pub fn sync(&self) -> std::io::Result<()> {
        self.file.lock().sync_data()
    }

    /// Truncates to zero length, used immediately after a preamble write.
    pub fn truncate(&self) -> std::io::Result<()> {
        let mut file = self.file.lock();
        file.set_len(0)?;
        use std::io::Seek;
        file.seek(std::io::SeekFrom::Start(0))?;
        Ok(())
    }

    /// Replays every record in the log, feeding each one to `apply`. A
    /// record that fails aborts restore with the underlying error.
    /// Tolerates leading null-byte padding around records (a crash mid-write
    /// can leave zero-filled tail bytes on some filesystems).
    pub fn restore(&self, mut apply: impl FnMut(&[u8]) -> Result<(), ember_core::Error>) -> std::io::Result<()> {
        for record in self.read_records()? {
            if let Err(err) = apply(&record) {
                error!(%err, "aof restore aborted on malformed record");
                return Err(std::io::Error::other(err));
            }
        }
        Ok(())
    }

    /// Parses record boundaries without applying them, for callers (the
    /// standalone binary) that need to `.await` an async `apply` per record
    /// rather than calling it from a synchronous closure.
    ///
    /// Scans the raw bytes for the `\n\n` marker `write()` appends after
    /// each record, rather than splitting into text lines: every RESP
    /// record already contains internal `\r\n` sequences, and line-oriented
    /// splitting would shatter those and drop the `\r` bytes on reassembly.
    /// Since a written record always itself ends in `\r\n`, the boundary
    /// between two records is a run of three consecutive `\n` bytes (the
    /// record's own plus the two-byte marker); only the marker's two are
    /// consumed as a separator, so the record keeps its own trailing `\n`.
    pub fn read_records(&self) -> std::io::Result<Vec<Vec<u8>>> {
        let bytes = std::fs::read(&self.path)?;
        let mut records = Vec::new();
        let mut start = 0usize;
        let mut i = 0usize;
        while i < bytes.len() {
            if bytes[i] != b'\n' {
                i += 1;
                continue;
            }
            let run_start = i;
            while i < bytes.len() && bytes[i] == b'\n' {
                i += 1;
            }
            let run_len = i - run_start;
            if run_len >= 2 {
                push_record(&mut records, &bytes[start..run_start + (run_len - 2)]);
                start = i;
            }
        }
        push_record(&mut records, &bytes[start..]);
        Ok(records)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Trims leading/trailing null-byte padding (a crash mid-write can leave
/// zero-filled tail bytes on some filesystems) and, if anything real
/// remains, appends it to `records`.
fn push_record(records: &mut Vec<Vec<u8>>, raw: &[u8]) {
    let start = raw.iter().position(|&b| b != 0).unwrap_or(raw.len());
    let end = raw.iter().rposition(|&b| b != 0).map_or(start, |p| p + 1);
    if start < end {
        records.push(raw[start..end].to_vec());
    }
}

/// Spawns the writer task: drains `receiver`, appending each record to
/// `log`. Runs for the lifetime of the process. `capacity` bounds the
/// in-memory queue; once full, `AofWriter::enqueue` waits for the writer
/// task to make room.
pub fn spawn_writer(log: std::sync::Arc<AppendLog>, capacity: usize) -> AofWriter {
    let capacity = if capacity == 0 {
        warn!("aof queue capacity of 0 is invalid; using 1");
        1
    } else {
        capacity
    };
    let (sender, mut receiver) = mpsc::channel::<Vec<u8>>(capacity);
    tokio::spawn(async move {
        while let Some(record) = receiver.recv().await {
            if let Err(err) = log.write(&record) {
                error!(%err, "failed to append aof record");
            }
        }
    });
    AofWriter { sender }
}

/// Spawns the `everysec` fsync ticker. One per process when the configured
/// strategy is `everysec`.
pub fn spawn_everysec_fsync(log: std::sync::Arc<AppendLog>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(1));
        loop {
            ticker.tick().await;
            if let Err(err) = log.sync() {
                error!(%err, "everysec aof fsync failed");
            }
        }
    });
}
