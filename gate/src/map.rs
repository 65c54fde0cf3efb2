//! A hash map whose every access runs under a [Gate] hold.

use crate::gate::{Gate, IterHold};
use std::{cell::UnsafeCell, collections::hash_map, collections::HashMap, hash::Hash};

/// A `HashMap<K, V>` behind a [Gate].
///
/// The locking contract matches [crate::GateList]: accessors take read
/// access, mutators take write access, and enumeration requires the calling
/// thread to already hold the gate.
pub struct GateMap<K, V> {
    gate: Gate,
    entries: UnsafeCell<HashMap<K, V>>,
}

// Access to `entries` is arbitrated by `gate`; same bounds as
// `RwLock<HashMap<K, V>>`.
unsafe impl<K: Send, V: Send> Send for GateMap<K, V> {}
unsafe impl<K: Send + Sync, V: Send + Sync> Sync for GateMap<K, V> {}

impl<K: Eq + Hash, V> GateMap<K, V> {
    /// Create an empty map.
    pub fn new() -> Self {
        Self {
            gate: Gate::new(),
            entries: UnsafeCell::new(HashMap::new()),
        }
    }

    /// The gate arbitrating access to this map.
    pub fn gate(&self) -> &Gate {
        &self.gate
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        let _pass = self.gate.read_pass();
        unsafe { (*self.entries.get()).len() }
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `key` is present.
    pub fn contains_key(&self, key: &K) -> bool {
        let _pass = self.gate.read_pass();
        unsafe { (*self.entries.get()).contains_key(key) }
    }

    /// Insert an entry, returning the previous value for `key` if any.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        let _pass = self.gate.write_pass();
        unsafe { (*self.entries.get()).insert(key, value) }
    }

    /// Remove the entry for `key`, returning its value if present.
    pub fn remove(&self, key: &K) -> Option<V> {
        let _pass = self.gate.write_pass();
        unsafe { (*self.entries.get()).remove(key) }
    }

    /// Remove all entries.
    pub fn clear(&self) {
        let _pass = self.gate.write_pass();
        unsafe { (*self.entries.get()).clear() };
    }

    /// Iterate over the entries.
    ///
    /// Same contract as [crate::GateList::iter]: the calling thread must
    /// already hold the gate, the hold stays alive for the iterator's
    /// lifetime, and write acquisition on this thread panics while the
    /// iterator is live.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread holds nothing.
    pub fn iter(&self) -> Iter<'_, K, V> {
        let hold = self.gate.pin();
        Iter {
            inner: unsafe { (*self.entries.get()).iter() },
            _hold: hold,
        }
    }
}

impl<K: Eq + Hash, V: Clone> GateMap<K, V> {
    /// Clone of the value for `key`, or `None` when absent.
    pub fn get(&self, key: &K) -> Option<V> {
        let _pass = self.gate.read_pass();
        unsafe { (*self.entries.get()).get(key).cloned() }
    }

    /// Snapshot of all values.
    pub fn values(&self) -> Vec<V> {
        let _pass = self.gate.read_pass();
        unsafe { (*self.entries.get()).values().cloned().collect() }
    }
}

impl<K: Eq + Hash + Clone, V> GateMap<K, V> {
    /// Snapshot of all keys.
    pub fn keys(&self) -> Vec<K> {
        let _pass = self.gate.read_pass();
        unsafe { (*self.entries.get()).keys().cloned().collect() }
    }
}

impl<K: Eq + Hash, V> Default for GateMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over a [GateMap], valid only while the calling thread's hold is
/// alive (see [GateMap::iter]).
pub struct Iter<'a, K, V> {
    inner: hash_map::Iter<'a, K, V>,
    _hold: IterHold<'a>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use std::{sync::Arc, thread};

    #[test]
    fn test_basic_ops() {
        let map = GateMap::new();
        assert!(map.is_empty());

        assert_eq!(map.insert("a", 1), None);
        assert_eq!(map.insert("a", 2), Some(1));
        map.insert("b", 3);

        assert_eq!(map.len(), 2);
        assert!(map.contains_key(&"a"));
        assert_eq!(map.get(&"a"), Some(2));
        assert_eq!(map.get(&"z"), None);

        let mut keys = map.keys();
        keys.sort_unstable();
        assert_eq!(keys, vec!["a", "b"]);
        let mut values = map.values();
        values.sort_unstable();
        assert_eq!(values, vec![2, 3]);

        assert_eq!(map.remove(&"a"), Some(2));
        assert_eq!(map.remove(&"a"), None);
        map.clear();
        assert!(map.is_empty());
    }

    #[test]
    fn test_concurrent_insert() {
        let map = Arc::new(GateMap::new());

        let mut handles = Vec::new();
        for worker in 0..4u64 {
            let map = map.clone();
            handles.push(thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(worker);
                for i in 0..100u64 {
                    let key = worker * 100 + i;
                    map.insert(key, rng.gen::<u64>());
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(map.len(), 400);
        for key in 0..400 {
            assert!(map.contains_key(&key));
        }
    }

    #[test]
    fn test_iter_under_hold() {
        let map = GateMap::new();
        for i in 0..5 {
            map.insert(i, i * 10);
        }

        map.gate().lock();
        let total: i32 = map.iter().map(|(_, v)| *v).sum();
        map.gate().unlock();
        assert_eq!(total, 100);
    }

    #[test]
    #[should_panic(expected = "enumeration requires the calling thread to hold the gate")]
    fn test_iter_without_hold_panics() {
        let map: GateMap<u32, u32> = GateMap::new();
        let _ = map.iter();
    }
}
