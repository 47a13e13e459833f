//! TTL sampler: a ticker-driven sweep that actively expires keys instead of
//! waiting for a lazy read to discover them.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rand::seq::SliceRandom;
use tracing::debug;

use super::Keyspace;

/// Drives periodic active expiration as its own background task.
pub struct TtlSampler {
    keyspace: Arc<Keyspace>,
    interval: Duration,
    sample_size: usize,
}

impl TtlSampler {
    #[must_use]
    pub fn new(keyspace: Arc<Keyspace>, interval: Duration, sample_size: usize) -> Self {
        Self {
            keyspace,
            interval,
            sample_size,
        }
    }

    /// Runs the ticker loop until the process exits. Intended to be spawned
    /// as a long-lived tokio task.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            for db in self.keyspace.database_indices() {
                self.sweep(db).await;
            }
        }
    }

    /// One sweep pass for a single database, recursing immediately while the
    /// deletion hit rate stays at or above 20%.
    async fn sweep(&self, db: u64) {
        if self
            .keyspace
            .cluster()
            .is_some_and(|c| !c.is_leader())
        {
            return;
        }

        loop {
            let index = self.keyspace.ttl_index_snapshot(db);
            if index.is_empty() {
                return;
            }
            let sample_size = self.sample_size.min(index.len());
            let sampled = sample_without_replacement(&index, sample_size);

            let now = self.keyspace.now_for_sampler();
            let mut deleted = 0usize;
            for key in &sampled {
                if self.keyspace.is_expired_at(db, key, now) {
                    self.keyspace.delete_key(db, key);
                    deleted += 1;
                }
            }

            debug!(db, sampled = sample_size, deleted, "ttl sampler pass");

            if sample_size == 0 || deleted * 5 < sample_size {
                // deleted/sample_size < 20%
                return;
            }
        }
    }
}

/// Reservoir-free sampling without replacement: small sample sizes relative
/// to the index, so a partial Fisher-Yates shuffle is simplest and exact.
fn sample_without_replacement(pool: &[Bytes], n: usize) -> Vec<Bytes> {
    let mut indices: Vec<usize> = (0..pool.len()).collect();
    indices.partial_shuffle(&mut rand::rng(), n);
    indices.into_iter().take(n).map(|i| pool[i].clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_without_replacement_respects_size_and_uniqueness() {
        let pool: Vec<Bytes> = (0..10).map(|i| Bytes::from(i.to_string())).collect();
        let sampled = sample_without_replacement(&pool, 4);
        assert_eq!(sampled.len(), 4);
        let unique: std::collections::HashSet<_> = sampled.iter().collect();
        assert_eq!(unique.len(), 4);
    }

    #[test]
    fn sample_size_clamped_to_pool_len() {
        let pool: Vec<Bytes> = (0..2).map(|i| Bytes::from(i.to_string())).collect();
        let sampled = sample_without_replacement(&pool, 2.min(pool.len()));
        assert_eq!(sampled.len(), 2);
    }
}
