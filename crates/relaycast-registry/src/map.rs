//! Reader/writer locked key/value map.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;

use parking_lot::RwLock;

/// A map safe for concurrent use. Reads share the lock, writes take it
/// exclusively. Values are cloned out so no lock is held by callers.
#[derive(Debug)]
pub struct SafeMap<K, V> {
    inner: RwLock<HashMap<K, V>>,
}

impl<K, V> Default for SafeMap<K, V> {
    fn default() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash, V: Clone> SafeMap<K, V> {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value for a key, if present.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.inner.read().get(key).cloned()
    }

    /// Sets a value, returning the one it replaced.
    pub fn set(&self, key: K, value: V) -> Option<V> {
        self.inner.write().insert(key, value)
    }

    /// Inserts only if the key is absent. Returns false if it was present.
    pub fn insert_new(&self, key: K, value: V) -> bool {
        let mut inner = self.inner.write();
        if inner.contains_key(&key) {
            return false;
        }
        inner.insert(key, value);
        true
    }

    /// Removes a key, returning its value.
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.inner.write().remove(key)
    }

    /// Returns true if the key is present.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.inner.read().contains_key(key)
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.inner.write().clear();
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Returns true if the map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> HashMap<K, V>
    where
        K: Clone,
    {
        self.inner.read().clone()
    }

    /// Replaces the whole contents.
    pub fn replace(&self, entries: HashMap<K, V>) {
        *self.inner.write() = entries;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_get_set_remove() {
        let map: SafeMap<String, u32> = SafeMap::new();

        assert_eq!(map.get("retries"), None);
        assert_eq!(map.set("retries".to_string(), 1), None);
        assert_eq!(map.set("retries".to_string(), 2), Some(1));
        assert_eq!(map.get("retries"), Some(2));
        assert_eq!(map.remove("retries"), Some(2));
        assert!(map.is_empty());
    }

    #[test]
    fn test_insert_new_keeps_existing() {
        let map: SafeMap<&str, &str> = SafeMap::new();

        assert!(map.insert_new("hardware", "off"));
        assert!(!map.insert_new("hardware", "on"));
        assert_eq!(map.get("hardware"), Some("off"));
    }

    #[test]
    fn test_clear_and_snapshot() {
        let map: SafeMap<&str, u32> = SafeMap::new();
        map.set("a", 1);
        map.set("b", 2);

        let snapshot = map.snapshot();
        map.clear();

        assert_eq!(snapshot.len(), 2);
        assert_eq!(map.len(), 0);
    }

    #[test]
    fn test_concurrent_writers_and_readers() {
        let map: Arc<SafeMap<u32, u32>> = Arc::new(SafeMap::new());

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let map = Arc::clone(&map);
                thread::spawn(move || {
                    for i in 0..100 {
                        map.set(t * 100 + i, i);
                        let _ = map.get(&(t * 100));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(map.len(), 800);
    }
}
