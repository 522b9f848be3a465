//! Read-through cache over a typed store.
//!
//! Hits are served from memory. Misses and writes for one key are serialized
//! by a per-key gate: concurrent misses are answered by a single store read
//! once it succeeds, and a failed read is retried by the next waiter, never in
//! parallel. Distinct keys never contend. Gates live as long as the cache, one
//! per key ever requested.
//!
//! Writes go to the store first; the memory entry is replaced only when the
//! write succeeded, so the cache never holds a value the store rejected.
//! Coherence assumes this cache is the only writer for its keys.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::codec::{Storable, StoreKey};
use crate::error::StoreResult;
use crate::store::{KeyValueStore, TypedStore};

pub struct Cache<S: ?Sized, V> {
    store: Arc<S>,
    entries: DashMap<Vec<u8>, Arc<V>>,
    gates: DashMap<Vec<u8>, Arc<Mutex<()>>>,
}

impl<S, V> Cache<S, V>
where
    S: KeyValueStore + ?Sized,
    V: Storable,
{
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            entries: DashMap::new(),
            gates: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Returns the value for `key`, loading it from the store on a miss.
    ///
    /// A failed load (including `NotFound`) is returned to every waiter and
    /// leaves nothing cached.
    pub fn get<K: StoreKey + ?Sized>(&self, key: &K) -> StoreResult<Arc<V>> {
        let key = key.key_bytes();
        if let Some(hit) = self.cached_raw(&key) {
            return Ok(hit);
        }

        let gate = self.gate(&key);
        let _loading = gate.lock();
        if let Some(hit) = self.cached_raw(&key) {
            return Ok(hit);
        }

        let loaded = self.store.get::<[u8], V>(&key).map(Arc::new);
        if let Ok(value) = &loaded {
            self.entries.insert(key.to_vec(), Arc::clone(value));
        }
        loaded
    }

    /// Writes `value` through to the store, then caches it.
    pub fn set<K: StoreKey + ?Sized>(&self, key: &K, value: V) -> StoreResult<Arc<V>> {
        let key = key.key_bytes();
        let gate = self.gate(&key);
        let _writing = gate.lock();

        let written = self.store.set::<[u8], V>(&key, &value).map(|()| Arc::new(value));
        if let Ok(value) = &written {
            self.entries.insert(key.to_vec(), Arc::clone(value));
        }
        written
    }

    /// Memory-only lookup; never touches the store.
    pub fn cached<K: StoreKey + ?Sized>(&self, key: &K) -> Option<Arc<V>> {
        self.cached_raw(&key.key_bytes())
    }

    /// Drops the memory entry so the next `get` reloads from the store.
    pub fn invalidate<K: StoreKey + ?Sized>(&self, key: &K) {
        self.entries.remove(key.key_bytes().as_ref());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn cached_raw(&self, key: &[u8]) -> Option<Arc<V>> {
        self.entries.get(key).map(|entry| Arc::clone(entry.value()))
    }

    fn gate(&self, key: &[u8]) -> Arc<Mutex<()>> {
        Arc::clone(self.gates.entry(key.to_vec()).or_default().value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    /// In-memory store that counts reads and can be told to fail writes.
    #[derive(Default)]
    struct CountingStore {
        data: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
        reads: AtomicUsize,
        reading: AtomicUsize,
        max_reading: AtomicUsize,
        read_delay: Option<Duration>,
        fail_writes: bool,
    }

    impl KeyValueStore for CountingStore {
        fn get_raw(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            let now = self.reading.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_reading.fetch_max(now, Ordering::SeqCst);
            if let Some(delay) = self.read_delay {
                thread::sleep(delay);
            }
            let value = self.data.lock().get(key).cloned();
            self.reading.fetch_sub(1, Ordering::SeqCst);
            Ok(value)
        }

        fn set_raw(&self, key: &[u8], value: &[u8]) -> StoreResult<()> {
            if self.fail_writes {
                return Err(StoreError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "disk full",
                )));
            }
            self.data.lock().insert(key.to_vec(), value.to_vec());
            Ok(())
        }
    }

    fn seeded(key: &str, value: u64) -> CountingStore {
        let store = CountingStore::default();
        store.set(key, &value).unwrap();
        store
    }

    #[test]
    fn second_get_is_served_from_memory() {
        let cache: Cache<_, u64> = Cache::new(Arc::new(seeded("k", 7)));

        assert_eq!(*cache.get("k").unwrap(), 7);
        assert_eq!(*cache.get("k").unwrap(), 7);
        assert_eq!(cache.store().reads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_misses_share_one_load() {
        let store = CountingStore {
            read_delay: Some(Duration::from_millis(50)),
            ..seeded("k", 11)
        };
        let cache: Arc<Cache<_, u64>> = Arc::new(Cache::new(Arc::new(store)));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    *cache.get("k").unwrap()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 11);
        }
        assert_eq!(cache.store().reads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_misses_of_absent_key_never_read_in_parallel() {
        let store = CountingStore {
            read_delay: Some(Duration::from_millis(10)),
            ..Default::default()
        };
        let cache: Arc<Cache<_, u64>> = Arc::new(Cache::new(Arc::new(store)));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cache.get("missing").unwrap_err().is_not_found()
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert_eq!(cache.store().reads.load(Ordering::SeqCst), 8);
        assert_eq!(cache.store().max_reading.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn set_is_visible_to_later_get_without_reading() {
        let cache: Cache<_, u64> = Cache::new(Arc::new(CountingStore::default()));

        cache.set("k", 3).unwrap();
        assert_eq!(*cache.get("k").unwrap(), 3);
        assert_eq!(cache.store().reads.load(Ordering::SeqCst), 0);

        let persisted: u64 = cache.store().get("k").unwrap();
        assert_eq!(persisted, 3);
    }

    #[test]
    fn failed_write_leaves_cache_untouched() {
        let store = CountingStore {
            fail_writes: true,
            ..Default::default()
        };
        let cache: Cache<_, u64> = Cache::new(Arc::new(store));

        assert!(cache.set("k", 5).is_err());
        assert!(cache.cached("k").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn not_found_is_not_cached() {
        let cache: Cache<_, u64> = Cache::new(Arc::new(CountingStore::default()));

        assert!(cache.get("missing").unwrap_err().is_not_found());
        assert!(cache.get("missing").unwrap_err().is_not_found());
        assert_eq!(cache.store().reads.load(Ordering::SeqCst), 2);

        cache.store().set("missing", &9u64).unwrap();
        assert_eq!(*cache.get("missing").unwrap(), 9);
    }

    #[test]
    fn invalidate_forces_reload() {
        let cache: Cache<_, u64> = Cache::new(Arc::new(seeded("k", 1)));
        cache.get("k").unwrap();
        cache.invalidate("k");
        cache.get("k").unwrap();
        assert_eq!(cache.store().reads.load(Ordering::SeqCst), 2);
    }
}
