//! Pending transactions.
//!
//! The pool is a stack: transactions are applied to the pool layer of the
//! ledger in push order and must be reverted in exactly the opposite order,
//! so only the tail can be removed.

mod cache;

pub use cache::TransactionCache;

use crate::storage::{StagedVec, StorageResult, Transactional};
use crate::types::SignedTransaction;

/// Pending transaction buffer
#[derive(Clone, Debug)]
pub struct TransactionPool {
    entries: StagedVec<SignedTransaction>,
    max_transactions: usize,
}

impl Default for TransactionPool {
    fn default() -> Self {
        Self::new(StagedVec::in_memory())
    }
}

impl TransactionPool {
    /// Default capacity
    pub const DEFAULT_MAX_TRANSACTIONS: usize = 10_000;

    /// Wrap a store
    #[must_use]
    pub const fn new(entries: StagedVec<SignedTransaction>) -> Self {
        Self {
            entries,
            max_transactions: Self::DEFAULT_MAX_TRANSACTIONS,
        }
    }

    /// Override the capacity
    #[must_use]
    pub const fn with_capacity_limit(mut self, max_transactions: usize) -> Self {
        self.max_transactions = max_transactions;
        self
    }

    /// Append a transaction
    ///
    /// # Errors
    /// Returns error if the pool is full
    pub fn push(&mut self, transaction: SignedTransaction) -> Result<(), PoolError> {
        if self.is_full() {
            return Err(PoolError::Full);
        }
        self.entries.push(transaction);
        Ok(())
    }

    /// Whether another push would be refused
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.max_transactions
    }

    /// Remove the most recently pushed transaction
    pub fn pop(&mut self) -> Option<SignedTransaction> {
        self.entries.pop()
    }

    /// Number of pending transactions
    #[must_use]
    pub fn length(&self) -> usize {
        self.entries.len()
    }

    /// Whether the pool is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Transaction at a position, oldest first
    #[must_use]
    pub fn at(&self, index: usize) -> Option<&SignedTransaction> {
        self.entries.get(index)
    }

    /// Iterate oldest first
    pub fn iter(&self) -> impl Iterator<Item = &SignedTransaction> {
        self.entries.iter()
    }
}

impl Transactional for TransactionPool {
    fn save(&mut self) -> StorageResult<()> {
        self.entries.save()
    }

    fn commit(&mut self) {
        self.entries.commit();
    }

    fn discard(&mut self) {
        self.entries.discard();
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Pool errors
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// Pool is at capacity
    #[error("transaction pool is full")]
    Full,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{keypair, transfer_tx};

    #[test]
    fn test_lifo_order() {
        let mut pool = TransactionPool::default();
        let first = transfer_tx(&keypair(1), &keypair(2), 1, 0);
        let second = transfer_tx(&keypair(1), &keypair(2), 2, 0);
        pool.push(first.clone()).unwrap();
        pool.push(second.clone()).unwrap();

        assert_eq!(pool.pop(), Some(second));
        assert_eq!(pool.pop(), Some(first));
        assert_eq!(pool.pop(), None);
    }

    #[test]
    fn test_capacity_limit() {
        let mut pool = TransactionPool::default().with_capacity_limit(1);
        assert!(!pool.is_full());
        pool.push(transfer_tx(&keypair(1), &keypair(2), 1, 0)).unwrap();
        assert!(pool.is_full());
        let result = pool.push(transfer_tx(&keypair(1), &keypair(2), 2, 0));
        assert!(matches!(result, Err(PoolError::Full)));
    }

    #[test]
    fn test_discard_restores_popped() {
        let mut pool = TransactionPool::default();
        pool.push(transfer_tx(&keypair(1), &keypair(2), 1, 0)).unwrap();
        pool.commit();

        pool.pop();
        assert!(pool.is_empty());
        pool.discard();
        assert_eq!(pool.length(), 1);
    }
}
