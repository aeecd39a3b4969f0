//! Replay protection.
//!
//! Remembers the hashes of pooled transactions and of chain transactions
//! that have not expired yet. A transaction whose hash is remembered is a
//! duplicate no matter which layer it sits in.

use crate::crypto::Hash;
use crate::params::NODES_TIME_SHIFT;
use crate::storage::{StagedMap, StorageResult, Transactional};
use crate::types::Timestamp;

/// Hashes of recent transactions with their expiry times
#[derive(Clone, Debug, Default)]
pub struct TransactionCache {
    chain: StagedMap<Hash, Timestamp>,
    pool: StagedMap<Hash, Timestamp>,
}

impl TransactionCache {
    /// Empty cache
    #[must_use]
    pub const fn new() -> Self {
        Self {
            chain: StagedMap::in_memory(),
            pool: StagedMap::in_memory(),
        }
    }

    /// Whether the hash is known in either layer
    #[must_use]
    pub fn contains(&self, hash: &Hash) -> bool {
        self.chain.contains_key(hash) || self.pool.contains_key(hash)
    }

    /// Whether the hash is known on chain
    #[must_use]
    pub fn in_chain(&self, hash: &Hash) -> bool {
        self.chain.contains_key(hash)
    }

    /// Remember a pooled transaction
    pub fn add_pool(&mut self, hash: Hash, expiry_time: Timestamp) {
        self.pool.insert(hash, expiry_time);
    }

    /// Forget a pooled transaction
    pub fn erase_pool(&mut self, hash: &Hash) {
        self.pool.remove(hash);
    }

    /// Remember a transaction included in a block
    pub fn add_chain(&mut self, hash: Hash, expiry_time: Timestamp) {
        self.chain.insert(hash, expiry_time);
    }

    /// Forget a transaction whose block was reverted
    pub fn erase_chain(&mut self, hash: &Hash) {
        self.chain.remove(hash);
    }

    /// Drop chain entries that can no longer be replayed
    pub fn clean(&mut self, now: Timestamp) {
        let expired: Vec<Hash> = self
            .chain
            .iter()
            .filter(|(_, expiry)| **expiry + NODES_TIME_SHIFT < now)
            .map(|(hash, _)| *hash)
            .collect();
        for hash in &expired {
            self.chain.remove(hash);
        }
    }

    /// Forget every chain transaction, before re-seeding from blocks
    pub fn clear_chain(&mut self) {
        self.chain.clear();
    }

    /// Number of remembered chain transactions
    #[must_use]
    pub fn chain_len(&self) -> usize {
        self.chain.len()
    }
}

impl Transactional for TransactionCache {
    fn save(&mut self) -> StorageResult<()> {
        self.chain.save()?;
        self.pool.save()
    }

    fn commit(&mut self) {
        self.chain.commit();
        self.pool.commit();
    }

    fn discard(&mut self) {
        self.chain.discard();
        self.pool.discard();
    }

    fn clear(&mut self) {
        self.chain.clear();
        self.pool.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash_data;

    #[test]
    fn test_layers_are_independent() {
        let mut cache = TransactionCache::new();
        let a = hash_data(b"a");
        cache.add_pool(a, 100);
        assert!(cache.contains(&a));
        assert!(!cache.in_chain(&a));

        cache.erase_pool(&a);
        cache.add_chain(a, 100);
        assert!(cache.in_chain(&a));
    }

    #[test]
    fn test_clean_keeps_recent_entries() {
        let mut cache = TransactionCache::new();
        let old = hash_data(b"old");
        let fresh = hash_data(b"fresh");
        cache.add_chain(old, 1_000);
        cache.add_chain(fresh, 5_000);

        cache.clean(1_000 + NODES_TIME_SHIFT + 1);
        assert!(!cache.contains(&old));
        assert!(cache.contains(&fresh));
    }

    #[test]
    fn test_discard_undoes_erase() {
        let mut cache = TransactionCache::new();
        let a = hash_data(b"a");
        cache.add_chain(a, 10);
        cache.commit();
        cache.erase_chain(&a);
        cache.discard();
        assert!(cache.in_chain(&a));
    }
}
