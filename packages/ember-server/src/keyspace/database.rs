//! A single numbered database: its key/value store, TTL index, and
//! eviction caches.

use std::collections::{HashMap, HashSet};

use bytes::Bytes;
use ember_core::KeyData;
use parking_lot::Mutex;

use super::eviction::{LfuCache, LruCache};

/// Composable expiry flags for `set_expiry`. `Nx`/`Xx` and
/// `Gt`/`Lt` are mutually exclusive pairs; `None` applies unconditionally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpiryCondition {
    #[default]
    None,
    /// Only set if the key has no current expiry.
    Nx,
    /// Only set if the key has an existing expiry.
    Xx,
    /// Only set if the new expiry is greater than the current one.
    Gt,
    /// Only set if the new expiry is less than the current one.
    Lt,
}

/// One numbered database. The entry map itself lives under the owning
/// [`super::Keyspace`]'s single coarse `RwLock`; the TTL index and the two
/// eviction caches each have their own `Mutex`, acquired in the order
/// store -> ttl-index -> lfu -> lru.
pub struct Database {
    pub index: u64,
    pub entries: HashMap<Bytes, KeyData>,
    pub ttl_index: Mutex<HashSet<Bytes>>,
    pub lfu: Mutex<LfuCache>,
    pub lru: Mutex<LruCache>,
}

impl Database {
    #[must_use]
    pub fn new(index: u64) -> Self {
        Self {
            index,
            entries: HashMap::new(),
            ttl_index: Mutex::new(HashSet::new()),
            lfu: Mutex::new(LfuCache::new()),
            lru: Mutex::new(LruCache::new()),
        }
    }

    /// Removes a key from the store, the TTL index, and the eviction caches.
    /// Returns `true` if the key existed.
    pub fn remove_key(&mut self, key: &Bytes) -> bool {
        let existed = self.entries.remove(key).is_some();
        if existed {
            self.ttl_index.lock().remove(key);
            self.lfu.lock().delete(key);
            self.lru.lock().delete(key);
        }
        existed
    }

    pub fn dbsize(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.ttl_index.lock().clear();
        *self.lfu.lock() = LfuCache::new();
        *self.lru.lock() = LruCache::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_core::Value;

    #[test]
    fn remove_key_clears_ttl_and_caches() {
        let mut db = Database::new(0);
        let key = Bytes::from_static(b"k");
        db.entries.insert(key.clone(), KeyData::with_expiry(Value::Int(1), 1000));
        db.ttl_index.lock().insert(key.clone());
        db.lfu.lock().update(key.clone());
        db.lru.lock().update(key.clone(), 500);

        assert!(db.remove_key(&key));
        assert!(!db.entries.contains_key(&key));
        assert!(!db.ttl_index.lock().contains(&key));
        assert!(db.lfu.lock().is_empty());
        assert!(db.lru.lock().is_empty());
        assert!(!db.remove_key(&key));
    }

    #[test]
    fn dbsize_and_clear() {
        let mut db = Database::new(0);
        db.entries.insert(Bytes::from_static(b"a"), KeyData::persistent(Value::Int(1)));
        db.entries.insert(Bytes::from_static(b"b"), KeyData::persistent(Value::Int(2)));
        assert_eq!(db.dbsize(), 2);
        db.clear();
        assert_eq!(db.dbsize(), 0);
    }
}
