//! Append-only audit log of ledger actions.
//!
//! Entries are never removed. Undoing an action appends a new record that
//! points back at the entry it reverts, so the log length only grows and
//! the applied state at any point is recoverable by replaying it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::crypto::{CryptoError, Hash};
use crate::storage::{StagedVec, StorageResult, Transactional};
use crate::types::{Address, BlockHeader, Coin, Id, Reward, SignedBlock, SignedTransaction};

/// Summary of an applied block
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockLog {
    /// Header
    pub header: BlockHeader,
    /// Hash of the block
    pub block_hash: Hash,
    /// Block producer
    pub authority: Address,
    /// Hashes of the included transactions
    pub transaction_hashes: Vec<Hash>,
    /// Rewards credited
    pub rewards: Vec<Reward>,
    /// Verified views per content unit
    pub unit_view_counts: BTreeMap<Id, u64>,
    /// Sponsorship paid out per content unit
    pub unit_sponsor_applied: BTreeMap<Id, Coin>,
}

/// What a log entry records
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoggedAction {
    /// A block applied to the chain
    Block(BlockLog),
    /// A transaction applied to the pool
    Transaction(SignedTransaction),
}

/// One log record
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggedTransaction {
    /// Recorded action
    pub action: LoggedAction,
    /// Position of the entry this record is about
    pub index: u64,
    /// `true` for apply records, `false` for revert records
    pub applied: bool,
}

/// Action log errors
#[derive(Debug, Error)]
pub enum ActionLogError {
    /// `revert` found no applied entry left
    #[error("no applied entry left to revert")]
    NothingToRevert,
    /// Position outside the log
    #[error("log index {index} out of range (length {length})")]
    OutOfRange {
        /// Requested position
        index: u64,
        /// Log length
        length: u64,
    },
    /// Hashing failed
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// The action log
#[derive(Clone, Debug, Default)]
pub struct ActionLog {
    entries: StagedVec<LoggedTransaction>,
    enabled: bool,
}

impl ActionLog {
    /// Wrap a store; a disabled log records nothing
    #[must_use]
    pub const fn new(entries: StagedVec<LoggedTransaction>, enabled: bool) -> Self {
        Self { entries, enabled }
    }

    /// Number of records
    #[must_use]
    pub fn length(&self) -> u64 {
        self.entries.len() as u64
    }

    /// Record at a position
    ///
    /// # Errors
    /// Returns error if the position is out of range
    pub fn at(&self, index: u64) -> Result<&LoggedTransaction, ActionLogError> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.entries.get(i))
            .ok_or(ActionLogError::OutOfRange {
                index,
                length: self.length(),
            })
    }

    /// Record an applied block
    ///
    /// # Errors
    /// Returns error if the block cannot be hashed
    pub fn log_block(
        &mut self,
        signed_block: &SignedBlock,
        unit_view_counts: BTreeMap<Id, u64>,
        unit_sponsor_applied: BTreeMap<Id, Coin>,
    ) -> Result<(), ActionLogError> {
        if !self.enabled {
            return Ok(());
        }
        let transaction_hashes = signed_block
            .block
            .signed_transactions
            .iter()
            .map(SignedTransaction::hash)
            .collect::<Result<Vec<_>, _>>()?;
        let log = BlockLog {
            header: signed_block.block.header.clone(),
            block_hash: signed_block.block.hash()?,
            authority: signed_block.signer,
            transaction_hashes,
            rewards: signed_block.block.rewards.clone(),
            unit_view_counts,
            unit_sponsor_applied,
        };
        self.append(LoggedAction::Block(log));
        Ok(())
    }

    /// Record a transaction applied to the pool
    pub fn log_transaction(&mut self, signed_transaction: &SignedTransaction) {
        if self.enabled {
            self.append(LoggedAction::Transaction(signed_transaction.clone()));
        }
    }

    fn append(&mut self, action: LoggedAction) {
        let index = self.length();
        self.entries.push(LoggedTransaction {
            action,
            index,
            applied: true,
        });
    }

    /// Append a record reverting the most recent still-applied entry
    ///
    /// # Errors
    /// Returns error if every entry is already reverted
    pub fn revert(&mut self) -> Result<(), ActionLogError> {
        if !self.enabled {
            return Ok(());
        }
        let target = self.last_applied().ok_or(ActionLogError::NothingToRevert)?;
        let Some(entry) = self.entries.get(target) else {
            return Err(ActionLogError::NothingToRevert);
        };
        let record = LoggedTransaction {
            action: entry.action.clone(),
            index: entry.index,
            applied: false,
        };
        debug!(index = record.index, "action log revert");
        self.entries.push(record);
        Ok(())
    }

    /// Position of the nearest entry not cancelled by later revert records
    fn last_applied(&self) -> Option<usize> {
        let mut pending_reverts = 0usize;
        for (position, entry) in self.entries.iter().enumerate().rev() {
            if !entry.applied {
                pending_reverts += 1;
            } else if pending_reverts == 0 {
                return Some(position);
            } else {
                pending_reverts -= 1;
            }
        }
        None
    }

    /// Positions of the entries currently in effect, oldest first
    #[must_use]
    pub fn applied_positions(&self) -> Vec<u64> {
        let mut live: Vec<u64> = Vec::new();
        for entry in self.entries.iter() {
            if entry.applied {
                live.push(entry.index);
            } else {
                live.pop();
            }
        }
        live
    }
}

impl Transactional for ActionLog {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{keypair, transfer_tx};

    fn enabled_log() -> ActionLog {
        ActionLog::new(StagedVec::in_memory(), true)
    }

    #[test]
    fn test_revert_appends_one_record() {
        let mut log = enabled_log();
        let a = keypair(1);
        log.log_transaction(&transfer_tx(&a, &keypair(2), 1, 0));
        let before = log.applied_positions();

        log.log_transaction(&transfer_tx(&a, &keypair(2), 2, 0));
        let length = log.length();
        log.revert().unwrap();

        assert_eq!(log.length(), length + 1);
        assert_eq!(log.applied_positions(), before);
        assert!(!log.at(length).unwrap().applied);
        assert_eq!(log.at(length).unwrap().index, 1);
    }

    #[test]
    fn test_contiguous_reverts_walk_backwards() {
        let mut log = enabled_log();
        let a = keypair(1);
        for amount in 1..=3 {
            log.log_transaction(&transfer_tx(&a, &keypair(2), amount, 0));
        }
        log.revert().unwrap();
        log.revert().unwrap();

        assert_eq!(log.at(3).unwrap().index, 2);
        assert_eq!(log.at(4).unwrap().index, 1);
        assert_eq!(log.applied_positions(), vec![0]);
    }

    #[test]
    fn test_revert_skips_cancelled_pairs() {
        let mut log = enabled_log();
        let a = keypair(1);
        log.log_transaction(&transfer_tx(&a, &keypair(2), 1, 0));
        log.log_transaction(&transfer_tx(&a, &keypair(2), 2, 0));
        log.revert().unwrap();
        log.log_transaction(&transfer_tx(&a, &keypair(2), 3, 0));
        log.revert().unwrap();
        log.revert().unwrap();

        assert_eq!(log.at(5).unwrap().index, 0);
        assert!(log.applied_positions().is_empty());
        assert!(matches!(log.revert(), Err(ActionLogError::NothingToRevert)));
    }

    #[test]
    fn test_disabled_log_records_nothing() {
        let mut log = ActionLog::new(StagedVec::in_memory(), false);
        log.log_transaction(&transfer_tx(&keypair(1), &keypair(2), 1, 0));
        assert_eq!(log.length(), 0);
        assert!(log.revert().is_ok());
    }

    #[test]
    fn test_discard_drops_uncommitted_records() {
        let mut log = enabled_log();
        log.log_transaction(&transfer_tx(&keypair(1), &keypair(2), 1, 0));
        log.commit();
        log.revert().unwrap();
        log.discard();
        assert_eq!(log.length(), 1);
    }
}
