//! In-memory working copies with a committed baseline.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{StorageError, StorageResult, Transactional};

/// Ordered store with end-push and end-pop only.
///
/// Popping a committed element keeps a copy so that `discard` can put it
/// back; elements pushed and popped within one session leave no trace.
#[derive(Clone, Debug)]
pub struct StagedVec<T> {
    items: Vec<T>,
    committed_len: usize,
    popped: Vec<T>,
    tree: Option<sled::Tree>,
}

impl<T> Default for StagedVec<T> {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl<T> StagedVec<T> {
    /// Empty store without persistence
    #[must_use]
    pub const fn in_memory() -> Self {
        Self {
            items: Vec::new(),
            committed_len: 0,
            popped: Vec::new(),
            tree: None,
        }
    }

    /// Number of elements in the working copy
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the working copy is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Element at a position
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    /// Last element
    #[must_use]
    pub fn last(&self) -> Option<&T> {
        self.items.last()
    }

    /// Iterate in order
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    /// Append an element
    pub fn push(&mut self, item: T) {
        self.items.push(item);
    }

    /// Length of the committed prefix still present in the working copy
    fn base(&self) -> usize {
        self.committed_len - self.popped.len()
    }
}

impl<T: Clone> StagedVec<T> {
    /// Remove and return the last element
    pub fn pop(&mut self) -> Option<T> {
        if self.items.len() > self.base() {
            return self.items.pop();
        }
        let item = self.items.pop()?;
        self.popped.push(item.clone());
        Some(item)
    }
}

impl<T: DeserializeOwned> StagedVec<T> {
    /// Load a store persisted in a sled tree
    ///
    /// # Errors
    /// Returns error if the tree cannot be read or holds gaps
    pub fn open(tree: sled::Tree) -> StorageResult<Self> {
        let mut items = Vec::new();
        for entry in tree.iter() {
            let (key, value) = entry?;
            let index = decode_index(&key).ok_or_else(|| corrupt(&tree, "bad key"))?;
            if index != items.len() as u64 {
                return Err(corrupt(&tree, "index gap"));
            }
            items.push(bincode::deserialize(&value)?);
        }
        Ok(Self {
            committed_len: items.len(),
            items,
            popped: Vec::new(),
            tree: Some(tree),
        })
    }
}

impl<T: Clone + Serialize> Transactional for StagedVec<T> {
    fn save(&mut self) -> StorageResult<()> {
        let Some(tree) = &self.tree else {
            return Ok(());
        };
        let mut batch = sled::Batch::default();
        for index in self.base()..self.items.len() {
            batch.insert(&encode_index(index)[..], bincode::serialize(&self.items[index])?);
        }
        for index in self.items.len()..self.committed_len {
            batch.remove(&encode_index(index)[..]);
        }
        tree.apply_batch(batch)?;
        tree.flush()?;
        Ok(())
    }

    fn commit(&mut self) {
        self.committed_len = self.items.len();
        self.popped.clear();
    }

    fn discard(&mut self) {
        let base = self.base();
        self.items.truncate(base);
        while let Some(item) = self.popped.pop() {
            self.items.push(item);
        }
    }

    fn clear(&mut self) {
        while self.pop().is_some() {}
    }
}

/// Keyed store with ordered iteration.
///
/// The first time a key is touched in a session its committed value is
/// remembered, which is all `discard` and `save` need.
#[derive(Clone, Debug)]
pub struct StagedMap<K, V> {
    entries: BTreeMap<K, V>,
    undo: BTreeMap<K, Option<V>>,
    tree: Option<sled::Tree>,
}

impl<K, V> Default for StagedMap<K, V> {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl<K, V> StagedMap<K, V> {
    /// Empty store without persistence
    #[must_use]
    pub const fn in_memory() -> Self {
        Self {
            entries: BTreeMap::new(),
            undo: BTreeMap::new(),
            tree: None,
        }
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate in key order
    pub fn iter(&self) -> std::collections::btree_map::Iter<'_, K, V> {
        self.entries.iter()
    }
}

impl<K: Ord + Clone, V: Clone> StagedMap<K, V> {
    /// Value for a key
    #[must_use]
    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    /// Whether the key is present
    #[must_use]
    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Insert or replace a value
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        self.touch(&key);
        self.entries.insert(key, value)
    }

    /// Remove a value
    pub fn remove(&mut self, key: &K) -> Option<V> {
        if !self.entries.contains_key(key) {
            return None;
        }
        self.touch(key);
        self.entries.remove(key)
    }

    /// Mutable access to a value
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        if !self.entries.contains_key(key) {
            return None;
        }
        self.touch(key);
        self.entries.get_mut(key)
    }

    fn touch(&mut self, key: &K) {
        if !self.undo.contains_key(key) {
            self.undo.insert(key.clone(), self.entries.get(key).cloned());
        }
    }
}

impl<K: Ord + DeserializeOwned, V: DeserializeOwned> StagedMap<K, V> {
    /// Load a store persisted in a sled tree
    ///
    /// # Errors
    /// Returns error if the tree cannot be read or decoded
    pub fn open(tree: sled::Tree) -> StorageResult<Self> {
        let mut entries = BTreeMap::new();
        for entry in tree.iter() {
            let (key, value) = entry?;
            entries.insert(bincode::deserialize(&key)?, bincode::deserialize(&value)?);
        }
        Ok(Self {
            entries,
            undo: BTreeMap::new(),
            tree: Some(tree),
        })
    }
}

impl<K, V> Transactional for StagedMap<K, V>
where
    K: Ord + Clone + Serialize,
    V: Clone + Serialize,
{
    fn save(&mut self) -> StorageResult<()> {
        let Some(tree) = &self.tree else {
            return Ok(());
        };
        let mut batch = sled::Batch::default();
        for key in self.undo.keys() {
            let raw_key = bincode::serialize(key)?;
            match self.entries.get(key) {
                Some(value) => batch.insert(raw_key, bincode::serialize(value)?),
                None => batch.remove(raw_key),
            }
        }
        tree.apply_batch(batch)?;
        tree.flush()?;
        Ok(())
    }

    fn commit(&mut self) {
        self.undo.clear();
    }

    fn discard(&mut self) {
        for (key, previous) in std::mem::take(&mut self.undo) {
            match previous {
                Some(value) => {
                    self.entries.insert(key, value);
                }
                None => {
                    self.entries.remove(&key);
                }
            }
        }
    }

    fn clear(&mut self) {
        let keys: Vec<K> = self.entries.keys().cloned().collect();
        for key in &keys {
            self.touch(key);
        }
        self.entries.clear();
    }
}

fn encode_index(index: usize) -> [u8; 8] {
    (index as u64).to_be_bytes()
}

fn decode_index(raw: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = raw.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

fn corrupt(tree: &sled::Tree, reason: &str) -> StorageError {
    StorageError::Corrupt {
        tree: String::from_utf8_lossy(&tree.name()).into_owned(),
        reason: reason.to_string(),
    }
}
