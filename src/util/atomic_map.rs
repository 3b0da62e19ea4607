use std::hash::Hash;
use std::sync::{Arc, PoisonError, RwLock};
use rustc_hash::FxHashMap;

/// A copy-on-write map for data that is read on every packet but changes rarely (circuits per
///  endpoint, decoders per message id). Readers get a snapshot and never hold a lock while
///  working with it; writers clone the map, modify the clone and swap it in.
pub struct AtomicMap<K,V> {
    map: RwLock<Arc<FxHashMap<K,V>>>,
}
impl <K: Hash+Eq+Clone+Sync+Send,V:Clone+Sync+Send> Default for AtomicMap<K,V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Hash+Eq+Clone+Sync+Send, V:Clone+Sync+Send> AtomicMap<K,V> {
    pub fn new() -> AtomicMap<K,V> {
        AtomicMap {
            map: RwLock::new(Arc::new(FxHashMap::default())),
        }
    }

    pub fn load(&self) -> Arc<FxHashMap<K,V>> {
        // a panicking writer never leaves a half-updated map behind, so poisoning is harmless
        self.map.read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.load()
            .get(key)
            .cloned()
    }

    /// Writers are serialized, so `f` sees the result of all previous updates
    pub fn update<R>(&self, f: impl FnOnce(&mut FxHashMap<K,V>) -> R) -> R {
        let mut guard = self.map.write()
            .unwrap_or_else(PoisonError::into_inner);

        let mut map: FxHashMap<K,V> = (**guard).clone();
        let result = f(&mut map);
        *guard = Arc::new(map);
        result
    }
}
