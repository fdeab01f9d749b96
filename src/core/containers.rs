// This module provides InsertionOrderedMap, the associative container backing
// the debug-model tables. It pairs a Vec of (key, value) entries with a
// hashbrown index from key to entry position, giving amortized O(1) lookup
// while iteration always replays insertion order. Re-inserting an existing
// key replaces the value in place and keeps the original position, so the
// iteration order of a table never changes after first insertion. Removal is
// O(n) because the tail entries shift down and their index slots are rebuilt;
// the debug model removes entries only when resolving rare name collisions,
// so the cost is irrelevant there. The container is deliberately minimal:
// exactly the surface the model tables need, nothing speculative.

//! Insertion-ordered associative container.

use hashbrown::HashMap;
use std::borrow::Borrow;
use std::hash::Hash;

/// A map preserving insertion order for iteration.
#[derive(Debug, Clone)]
pub struct InsertionOrderedMap<K, V> {
    entries: Vec<(K, V)>,
    index: HashMap<K, usize>,
}

impl<K, V> Default for InsertionOrderedMap<K, V> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Clone, V> InsertionOrderedMap<K, V> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert a value, replacing (in place, keeping position) any previous
    /// value under the same key. Returns the replaced value.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        if let Some(&pos) = self.index.get(&key) {
            let old = std::mem::replace(&mut self.entries[pos].1, value);
            return Some(old);
        }
        self.index.insert(key.clone(), self.entries.len());
        self.entries.push((key, value));
        None
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.index.contains_key(key)
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.index.get(key).map(|&pos| &self.entries[pos].1)
    }

    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let pos = *self.index.get(key)?;
        Some(&mut self.entries[pos].1)
    }

    /// Remove an entry. Later entries keep their relative order; their index
    /// slots are rebuilt.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let pos = self.index.remove(key)?;
        let (_, value) = self.entries.remove(pos);
        for (i, (k, _)) in self.entries.iter().enumerate().skip(pos) {
            self.index.insert(k.clone(), i);
        }
        Some(value)
    }

    /// Iterate entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    /// Iterate values mutably in insertion order.
    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut V> {
        self.entries.iter_mut().map(|(_, v)| v)
    }

    /// Iterate values in insertion order.
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.iter().map(|(_, v)| v)
    }

    /// Iterate keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.iter().map(|(k, _)| k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iteration_preserves_insertion_order() {
        let mut map = InsertionOrderedMap::new();
        map.insert("c", 3);
        map.insert("a", 1);
        map.insert("b", 2);

        let keys: Vec<_> = map.keys().copied().collect();
        assert_eq!(keys, ["c", "a", "b"]);
    }

    #[test]
    fn test_reinsert_keeps_position() {
        let mut map = InsertionOrderedMap::new();
        map.insert("x", 1);
        map.insert("y", 2);
        assert_eq!(map.insert("x", 10), Some(1));

        let entries: Vec<_> = map.iter().map(|(k, v)| (*k, *v)).collect();
        assert_eq!(entries, [("x", 10), ("y", 2)]);
    }

    #[test]
    fn test_remove_rebuilds_index() {
        let mut map = InsertionOrderedMap::new();
        map.insert("a", 1);
        map.insert("b", 2);
        map.insert("c", 3);

        assert_eq!(map.remove(&"b"), Some(2));
        assert_eq!(map.get(&"c"), Some(&3));
        let keys: Vec<_> = map.keys().copied().collect();
        assert_eq!(keys, ["a", "c"]);
        assert_eq!(map.remove(&"b"), None);
    }
}
