//! Fixed-capacity map with oldest-first eviction.
//!
//! Per-operation state is keyed by producer-chosen names, so every such map
//! goes through `BoundedMap` to cap memory. Eviction order is insertion order;
//! updating an existing key does not refresh its position.

use std::collections::hash_map::{self, HashMap};
use std::collections::VecDeque;
use std::hash::Hash;

/// A `HashMap` that holds at most `capacity` entries.
#[derive(Debug, Clone)]
pub struct BoundedMap<K, V> {
    capacity: usize,
    entries: HashMap<K, V>,
    order: VecDeque<K>,
}

impl<K, V> BoundedMap<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Creates an empty map. A zero capacity is treated as one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity.min(1024)),
            order: VecDeque::with_capacity(capacity.min(1024)),
        }
    }

    /// Maximum number of entries.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the map holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns true if `key` is present.
    #[must_use]
    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Returns a reference to the value of `key`.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    /// Returns a mutable reference to the value of `key`.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.entries.get_mut(key)
    }

    /// Inserts or replaces a value.
    ///
    /// Returns the evicted entry when a new key pushed out the oldest one.
    pub fn insert(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(existing) = self.entries.get_mut(&key) {
            *existing = value;
            return None;
        }
        let evicted = self.make_room();
        self.order.push_back(key.clone());
        self.entries.insert(key, value);
        evicted
    }

    /// Returns the value of `key`, inserting `default()` first if absent.
    ///
    /// The second element is the entry evicted to make room, if any.
    pub fn get_or_insert_with<F>(&mut self, key: K, default: F) -> (&mut V, Option<(K, V)>)
    where
        F: FnOnce() -> V,
    {
        let evicted = if self.entries.contains_key(&key) {
            None
        } else {
            let evicted = self.make_room();
            self.order.push_back(key.clone());
            evicted
        };
        let value = self.entries.entry(key).or_insert_with(default);
        (value, evicted)
    }

    /// Removes `key` and returns its value.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let value = self.entries.remove(key)?;
        self.order.retain(|k| k != key);
        Some(value)
    }

    /// Keeps only the entries for which `keep` returns true.
    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&K, &mut V) -> bool,
    {
        self.entries.retain(|k, v| keep(k, v));
        let entries = &self.entries;
        self.order.retain(|k| entries.contains_key(k));
    }

    /// Iterates over all entries in arbitrary order.
    pub fn iter(&self) -> hash_map::Iter<'_, K, V> {
        self.entries.iter()
    }

    /// Iterates mutably over all entries in arbitrary order.
    pub fn iter_mut(&mut self) -> hash_map::IterMut<'_, K, V> {
        self.entries.iter_mut()
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    fn make_room(&mut self) -> Option<(K, V)> {
        if self.entries.len() < self.capacity {
            return None;
        }
        while let Some(oldest) = self.order.pop_front() {
            if let Some(value) = self.entries.remove(&oldest) {
                return Some((oldest, value));
            }
        }
        None
    }
}
