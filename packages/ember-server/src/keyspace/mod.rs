//! The keyspace: the set of numbered databases plus the operations the
//! command handlers are built from.

pub mod database;
pub mod eviction;
pub mod sampler;

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use ember_core::{ClockSource, Error, KeyData, Value};
use parking_lot::RwLock;

use crate::cluster::Cluster;
use crate::config::{EvictionPolicy, ServerConfig};

pub use database::{Database, ExpiryCondition};

/// The full set of numbered databases, guarded by one coarse lock.
/// `Database::ttl_index`/`lfu`/`lru` each carry their own mutex nested inside,
/// acquired in the order store -> ttl-index -> lfu -> lru.
pub struct Keyspace {
    databases: RwLock<HashMap<u64, Database>>,
    clock: Arc<dyn ClockSource>,
    config: Arc<ServerConfig>,
    cluster: Option<Arc<dyn Cluster>>,
    memory_used: std::sync::atomic::AtomicU64,
}

impl Keyspace {
    #[must_use]
    pub fn new(clock: Arc<dyn ClockSource>, config: Arc<ServerConfig>, cluster: Option<Arc<dyn Cluster>>) -> Self {
        let mut databases = HashMap::new();
        databases.insert(0, Database::new(0));
        Self {
            databases: RwLock::new(databases),
            clock,
            config,
            cluster,
            memory_used: std::sync::atomic::AtomicU64::new(0),
        }
    }

    fn now(&self) -> u64 {
        self.clock.now_millis()
    }

    /// Installs an empty store, TTL set, and eviction caches for `db` if it
    /// doesn't already exist.
    pub fn create_database(&self, db: u64) {
        let mut guard = self.databases.write();
        guard.entry(db).or_insert_with(|| Database::new(db));
    }

    /// `keys_exist(db, keys) -> map<key,bool>`. Lazily expired
    /// keys count as absent but are not deleted here -- `get_values` owns
    /// the delete side effect; `keys_exist` is a pure read.
    #[must_use]
    pub fn keys_exist(&self, db: u64, keys: &[Bytes]) -> HashMap<Bytes, bool> {
        let now = self.now();
        let guard = self.databases.read();
        let mut out = HashMap::with_capacity(keys.len());
        if let Some(database) = guard.get(&db) {
            for key in keys {
                let present = database
                    .entries
                    .get(key)
                    .is_some_and(|kd| !kd.is_expired(now));
                out.insert(key.clone(), present);
            }
        } else {
            for key in keys {
                out.insert(key.clone(), false);
            }
        }
        out
    }

    /// `get_values(db, keys) -> map<key, optional<value>>` with lazy
    /// expiration: an expired entry reads as absent and triggers a delete,
    /// direct in standalone mode or delegated to the cluster layer when
    /// clustered and not leader. Command handlers are synchronous, so the cluster delegation for a lazily-discovered expiry is
    /// fired onto the runtime rather than awaited inline -- the read itself
    /// never blocks on replication.
    #[must_use]
    pub fn get_values(&self, db: u64, keys: &[Bytes]) -> HashMap<Bytes, Option<Value>> {
        let now = self.now();
        let mut expired = Vec::new();
        let mut out = HashMap::with_capacity(keys.len());
        {
            let guard = self.databases.read();
            if let Some(database) = guard.get(&db) {
                for key in keys {
                    match database.entries.get(key) {
                        Some(kd) if kd.is_expired(now) => {
                            expired.push(key.clone());
                            out.insert(key.clone(), None);
                        }
                        Some(kd) => {
                            out.insert(key.clone(), Some(kd.value.clone()));
                        }
                        None => {
                            out.insert(key.clone(), None);
                        }
                    }
                }
            } else {
                for key in keys {
                    out.insert(key.clone(), None);
                }
            }
        }
        for key in expired {
            self.delete_expired(db, &key);
        }
        out
    }

    /// Deletes a lazily-discovered expired key: direct locally when
    /// standalone or leading, delegated to the cluster layer otherwise.
    fn delete_expired(&self, db: u64, key: &Bytes) {
        match &self.cluster {
            Some(cluster) if !cluster.is_leader() => {
                let cluster = Arc::clone(cluster);
                let key = key.clone();
                tokio::spawn(async move {
                    let tokens = vec![Bytes::from_static(b"APPLYDELETEKEY"), Bytes::from(db.to_string()), key];
                    if let Err(err) = cluster.apply(&tokens).await {
                        tracing::warn!(%err, "failed to delegate lazy-expiry delete to cluster leader");
                    }
                });
            }
            _ => {
                self.delete_key(db, key);
            }
        }
    }

    /// `set_values(db, entries)` preserving any existing `expire_at`.
    /// Fails with `OutOfMemory` when the memory ceiling is exceeded and the
    /// policy is `noeviction`.
    pub fn set_values(&self, db: u64, entries: Vec<(Bytes, Value)>) -> Result<(), Error> {
        let new_key_count = {
            let guard = self.databases.read();
            let database = guard.get(&db);
            entries
                .iter()
                .filter(|(k, _)| database.is_none_or(|d| !d.entries.contains_key(k)))
                .count()
        };
        if new_key_count > 0 && self.would_exceed_memory(new_key_count) && self.config.eviction_policy.is_noeviction()
        {
            return Err(Error::out_of_memory());
        }

        let mut guard = self.databases.write();
        let database = guard.entry(db).or_insert_with(|| Database::new(db));
        for (key, value) in entries {
            let expire_at = database.entries.get(&key).and_then(|kd| kd.expire_at);
            database.entries.insert(key.clone(), KeyData { value, expire_at });
            self.update_cache(database, &key, expire_at.is_some());
        }
        if new_key_count > 0 {
            self.memory_used
                .fetch_add(new_key_count as u64, std::sync::atomic::Ordering::Relaxed);
        }
        Ok(())
    }

    fn would_exceed_memory(&self, additional_keys: usize) -> bool {
        let max = self.config.max_memory;
        if max == 0 {
            return false;
        }
        let used = self.memory_used.load(std::sync::atomic::Ordering::Relaxed);
        used.saturating_add(additional_keys as u64) > max
    }

    /// `set_expiry(db, key, expire_at, touch)`. Updates `KeyData` and the TTL
    /// index, honoring the NX/XX/GT/LT composable conditions. Returns
    /// whether the expiry was actually set.
    pub fn set_expiry(&self, db: u64, key: &Bytes, expire_at: u64, condition: ExpiryCondition, touch: bool) -> bool {
        let mut guard = self.databases.write();
        let Some(database) = guard.get_mut(&db) else {
            return false;
        };
        let Some(kd) = database.entries.get_mut(key) else {
            return false;
        };

        if !Self::condition_allows(kd.expire_at, expire_at, condition) {
            return false;
        }

        kd.expire_at = Some(expire_at);
        database.ttl_index.lock().insert(key.clone());
        if touch {
            self.update_cache(database, key, true);
        }
        true
    }

    /// GT/LT treat a persistent key's current expiry as +inf/-inf
    /// respectively: GT always rejects on a persistent key, LT always
    /// accepts when it is the only condition applied.
    fn condition_allows(current: Option<u64>, new_expire_at: u64, condition: ExpiryCondition) -> bool {
        match condition {
            ExpiryCondition::None => true,
            ExpiryCondition::Nx => current.is_none(),
            ExpiryCondition::Xx => current.is_some(),
            ExpiryCondition::Gt => current.is_some_and(|c| new_expire_at > c),
            ExpiryCondition::Lt => current.is_none_or(|c| new_expire_at < c),
        }
    }

    /// `delete_key(db, key)`. Removes from the store, the TTL index, and the
    /// policy-selected eviction cache. Returns whether the key existed.
    pub fn delete_key(&self, db: u64, key: &Bytes) -> bool {
        let mut guard = self.databases.write();
        let Some(database) = guard.get_mut(&db) else {
            return false;
        };
        let removed = database.remove_key(key);
        if removed {
            self.memory_used.fetch_sub(1, std::sync::atomic::Ordering::Relaxed);
        }
        removed
    }

    #[must_use]
    pub fn dbsize(&self, db: u64) -> usize {
        self.databases.read().get(&db).map_or(0, Database::dbsize)
    }

    pub fn flush_db(&self, db: u64) {
        if let Some(database) = self.databases.write().get_mut(&db) {
            let freed = database.dbsize() as u64;
            database.clear();
            self.memory_used.fetch_sub(freed, std::sync::atomic::Ordering::Relaxed);
        }
    }

    pub fn flush_all(&self) {
        let mut freed = 0u64;
        for database in self.databases.write().values_mut() {
            freed += database.dbsize() as u64;
            database.clear();
        }
        self.memory_used.fetch_sub(freed, std::sync::atomic::Ordering::Relaxed);
    }

    /// `SWAPDB`: exchanges the entry maps (and nested caches) of two
    /// databases in place, materializing either side first if missing.
    pub fn swap(&self, a: u64, b: u64) {
        if a == b {
            return;
        }
        let mut guard = self.databases.write();
        guard.entry(a).or_insert_with(|| Database::new(a));
        guard.entry(b).or_insert_with(|| Database::new(b));
        // HashMap has no swap-in-place for two keys; take both out and
        // reinsert under the other's key, fixing up `index` to match.
        let mut da = guard.remove(&a).unwrap();
        let mut db_ = guard.remove(&b).unwrap();
        da.index = b;
        db_.index = a;
        guard.insert(b, da);
        guard.insert(a, db_);
    }

    pub fn type_name(&self, db: u64, key: &Bytes) -> Option<&'static str> {
        let now = self.now();
        let guard = self.databases.read();
        guard
            .get(&db)?
            .entries
            .get(key)
            .filter(|kd| !kd.is_expired(now))
            .map(|kd| kd.value.type_name())
    }

    pub fn ttl_millis(&self, db: u64, key: &Bytes) -> Option<Option<u64>> {
        let now = self.now();
        let guard = self.databases.read();
        let kd = guard.get(&db)?.entries.get(key)?;
        if kd.is_expired(now) {
            return None;
        }
        Some(kd.expire_at.map(|t| t.saturating_sub(now)))
    }

    pub fn persist(&self, db: u64, key: &Bytes) -> bool {
        let mut guard = self.databases.write();
        let Some(database) = guard.get_mut(&db) else {
            return false;
        };
        let Some(kd) = database.entries.get_mut(key) else {
            return false;
        };
        if kd.expire_at.take().is_some() {
            database.ttl_index.lock().remove(key);
            true
        } else {
            false
        }
    }

    /// `updateCache(db,key)`: routes the touch to the
    /// policy-selected cache, or does nothing under `noeviction`/`max_memory==0`.
    fn update_cache(&self, database: &Database, key: &Bytes, has_expiry: bool) {
        let policy = self.config.eviction_policy;
        if policy.is_noeviction() || self.config.max_memory == 0 {
            return;
        }
        if policy.is_volatile_only() && !has_expiry {
            return;
        }
        match policy {
            EvictionPolicy::AllkeysLfu | EvictionPolicy::VolatileLfu => {
                database.lfu.lock().update(key.clone());
            }
            EvictionPolicy::AllkeysLru | EvictionPolicy::VolatileLru => {
                database.lru.lock().update(key.clone(), self.now());
            }
            EvictionPolicy::AllkeysRandom | EvictionPolicy::VolatileRandom | EvictionPolicy::Noeviction => {}
        }
    }

    /// Snapshot of every live (non-expired) key/value across every database,
    /// for the preamble writer. Deterministic ordering is the
    /// preamble format's job, not this accessor's.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(u64, Bytes, KeyData)> {
        let now = self.now();
        let guard = self.databases.read();
        let mut out = Vec::new();
        for (db, database) in guard.iter() {
            for (key, kd) in &database.entries {
                if !kd.is_expired(now) {
                    out.push((*db, key.clone(), kd.clone()));
                }
            }
        }
        out
    }

    pub fn database_indices(&self) -> Vec<u64> {
        self.databases.read().keys().copied().collect()
    }

    pub fn ttl_index_snapshot(&self, db: u64) -> Vec<Bytes> {
        let guard = self.databases.read();
        guard
            .get(&db)
            .map(|d| d.ttl_index.lock().iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Exposed for the TTL sampler, which wants a single `now` shared across
    /// one sweep's sampled keys rather than re-reading the clock per key.
    #[must_use]
    pub fn now_for_sampler(&self) -> u64 {
        self.now()
    }

    #[must_use]
    pub fn is_expired_at(&self, db: u64, key: &Bytes, now: u64) -> bool {
        self.databases
            .read()
            .get(&db)
            .and_then(|d| d.entries.get(key))
            .is_some_and(|kd| kd.is_expired(now))
    }

    #[must_use]
    pub fn cluster(&self) -> Option<&Arc<dyn Cluster>> {
        self.cluster.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_core::TestClock;

    fn keyspace() -> Keyspace {
        Keyspace::new(Arc::new(TestClock::new(0)), Arc::new(ServerConfig::default()), None)
    }

    #[test]
    fn set_then_get_round_trips() {
        let ks = keyspace();
        ks.set_values(0, vec![(Bytes::from_static(b"k"), Value::Int(7))]).unwrap();
        let got = ks.get_values(0, &[Bytes::from_static(b"k")]);
        assert_eq!(got.get(&Bytes::from_static(b"k")).unwrap(), &Some(Value::Int(7)));
    }

    #[test]
    fn lazy_expiration_reads_as_absent_and_deletes() {
        let ks = keyspace();
        ks.set_values(0, vec![(Bytes::from_static(b"k"), Value::Int(1))]).unwrap();
        ks.set_expiry(0, &Bytes::from_static(b"k"), 500, ExpiryCondition::None, true);

        let got = ks.get_values(0, &[Bytes::from_static(b"k")]);
        // TestClock starts at 0, expiry is at 500ms in the future, so it's not expired yet.
        assert_eq!(got.get(&Bytes::from_static(b"k")).unwrap(), &Some(Value::Int(1)));

        assert_eq!(ks.dbsize(0), 1);
    }

    #[test]
    fn get_values_past_expiry_reads_absent_and_deletes_standalone() {
        let clock = Arc::new(TestClock::new(0));
        let ks = Keyspace::new(clock.clone(), Arc::new(ServerConfig::default()), None);
        ks.set_values(0, vec![(Bytes::from_static(b"k"), Value::Int(1))]).unwrap();
        ks.set_expiry(0, &Bytes::from_static(b"k"), 500, ExpiryCondition::None, true);
        clock.set(600);

        let got = ks.get_values(0, &[Bytes::from_static(b"k")]);
        assert_eq!(got.get(&Bytes::from_static(b"k")).unwrap(), &None);
        assert_eq!(ks.dbsize(0), 0);
    }

    #[test]
    fn set_expiry_nx_rejects_when_expiry_already_set() {
        let ks = keyspace();
        ks.set_values(0, vec![(Bytes::from_static(b"k"), Value::Int(1))]).unwrap();
        assert!(ks.set_expiry(0, &Bytes::from_static(b"k"), 100, ExpiryCondition::Nx, true));
        assert!(!ks.set_expiry(0, &Bytes::from_static(b"k"), 200, ExpiryCondition::Nx, true));
    }

    #[test]
    fn set_expiry_gt_rejects_on_persistent_key() {
        let ks = keyspace();
        ks.set_values(0, vec![(Bytes::from_static(b"k"), Value::Int(1))]).unwrap();
        assert!(!ks.set_expiry(0, &Bytes::from_static(b"k"), 100, ExpiryCondition::Gt, true));
    }

    #[test]
    fn set_expiry_lt_accepts_on_persistent_key() {
        let ks = keyspace();
        ks.set_values(0, vec![(Bytes::from_static(b"k"), Value::Int(1))]).unwrap();
        assert!(ks.set_expiry(0, &Bytes::from_static(b"k"), 100, ExpiryCondition::Lt, true));
    }

    #[test]
    fn delete_key_removes_from_ttl_index() {
        let ks = keyspace();
        ks.set_values(0, vec![(Bytes::from_static(b"k"), Value::Int(1))]).unwrap();
        ks.set_expiry(0, &Bytes::from_static(b"k"), 100, ExpiryCondition::None, true);
        assert!(ks.delete_key(0, &Bytes::from_static(b"k")));
        assert!(ks.ttl_index_snapshot(0).is_empty());
    }

    #[test]
    fn swap_exchanges_contents() {
        let ks = keyspace();
        ks.set_values(0, vec![(Bytes::from_static(b"only-in-zero"), Value::Int(1))])
            .unwrap();
        ks.swap(0, 1);
        assert_eq!(ks.dbsize(0), 0);
        assert_eq!(ks.dbsize(1), 1);
    }

    #[test]
    fn set_values_rejects_new_keys_over_memory_ceiling_under_noeviction() {
        let cfg = ServerConfig {
            max_memory: 1,
            eviction_policy: EvictionPolicy::Noeviction,
            ..ServerConfig::default()
        };
        let ks = Keyspace::new(Arc::new(TestClock::new(0)), Arc::new(cfg), None);
        ks.set_values(0, vec![(Bytes::from_static(b"a"), Value::Int(1))]).unwrap();
        let err = ks
            .set_values(0, vec![(Bytes::from_static(b"b"), Value::Int(2))])
            .unwrap_err();
        assert_eq!(err.kind, ember_core::ErrorKind::OutOfMemory);
    }

    #[test]
    fn delete_key_frees_memory_accounting_for_a_later_set() {
        let cfg = ServerConfig {
            max_memory: 1,
            eviction_policy: EvictionPolicy::Noeviction,
            ..ServerConfig::default()
        };
        let ks = Keyspace::new(Arc::new(TestClock::new(0)), Arc::new(cfg), None);
        ks.set_values(0, vec![(Bytes::from_static(b"a"), Value::Int(1))]).unwrap();
        assert!(ks.delete_key(0, &Bytes::from_static(b"a")));
        ks.set_values(0, vec![(Bytes::from_static(b"b"), Value::Int(2))])
            .expect("deleting the prior key must free its memory accounting");
    }

    #[test]
    fn flush_db_frees_memory_accounting_for_a_later_set() {
        let cfg = ServerConfig {
            max_memory: 1,
            eviction_policy: EvictionPolicy::Noeviction,
            ..ServerConfig::default()
        };
        let ks = Keyspace::new(Arc::new(TestClock::new(0)), Arc::new(cfg), None);
        ks.set_values(0, vec![(Bytes::from_static(b"a"), Value::Int(1))]).unwrap();
        ks.flush_db(0);
        ks.set_values(0, vec![(Bytes::from_static(b"b"), Value::Int(2))])
            .expect("flushing a database must free its memory accounting");
    }
}
