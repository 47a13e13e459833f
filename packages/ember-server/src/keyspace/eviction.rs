//! Per-database LFU and LRU eviction caches.
//!
//! Each is a heap keyed by the cache's own ordering (frequency for LFU,
//! last-access instant for LRU) with `O(log n)` update/pop/delete. Deletion
//! without rebuilding the heap uses lazy invalidation: a side table records
//! the authoritative value for each key, and a popped heap entry is
//! discarded if it's stale (doesn't match the side table) rather than
//! physically removed from the heap at delete time.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use bytes::Bytes;
use dashmap::DashMap;

/// Min-heap over access frequency: `update` increments a key's counter,
/// `pop` removes the least-frequently-used key.
#[derive(Debug, Default)]
pub struct LfuCache {
    heap: BinaryHeap<Reverse<(u64, u64, Bytes)>>,
    current: DashMap<Bytes, u64>,
    seq: u64,
}

impl LfuCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments `key`'s frequency counter and pushes a fresh heap entry.
    pub fn update(&mut self, key: Bytes) {
        let freq = self.current.entry(key.clone()).or_insert(0);
        *freq += 1;
        self.seq += 1;
        self.heap.push(Reverse((*freq, self.seq, key)));
    }

    /// Removes `key` from consideration entirely. Stale heap entries for
    /// this key are discarded lazily on the next `pop`.
    pub fn delete(&mut self, key: &Bytes) {
        self.current.remove(key);
    }

    /// Pops and returns the least-frequently-used live key, or `None` if empty.
    pub fn pop(&mut self) -> Option<Bytes> {
        while let Some(Reverse((freq, _, key))) = self.heap.pop() {
            if self.current.get(&key).is_some_and(|f| *f == freq) {
                self.current.remove(&key);
                return Some(key);
            }
            // Stale entry (key deleted, or since superseded by a newer update).
        }
        None
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }
}

/// Max-heap over last-access instant: `update` refreshes a key's timestamp,
/// `pop` removes the oldest (least-recently-used) key.
#[derive(Debug, Default)]
pub struct LruCache {
    heap: BinaryHeap<Reverse<(Reverse<u64>, u64, Bytes)>>,
    current: DashMap<Bytes, u64>,
    seq: u64,
}

impl LruCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Refreshes `key`'s last-access instant to `now_millis`.
    pub fn update(&mut self, key: Bytes, now_millis: u64) {
        self.current.insert(key.clone(), now_millis);
        self.seq += 1;
        // Max-heap on timestamp: wrap in Reverse twice so `Reverse<(Reverse<ts>,..)>`
        // makes the *smallest* timestamp pop first out of the underlying min-heap.
        self.heap.push(Reverse((Reverse(now_millis), self.seq, key)));
    }

    pub fn delete(&mut self, key: &Bytes) {
        self.current.remove(key);
    }

    /// Pops and returns the least-recently-used live key (oldest timestamp), or `None`.
    pub fn pop(&mut self) -> Option<Bytes> {
        while let Some(Reverse((Reverse(ts), _, key))) = self.heap.pop() {
            if self.current.get(&key).is_some_and(|t| *t == ts) {
                self.current.remove(&key);
                return Some(key);
            }
        }
        None
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }
}
