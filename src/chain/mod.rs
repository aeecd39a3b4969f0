//! Block store.
//!
//! Signed blocks and their headers live in two parallel append-only
//! stores indexed by height. The tail can be popped to unwind the chain;
//! nothing else is ever modified.

use thiserror::Error;

use crate::crypto::{CryptoError, Hash};
use crate::storage::{StagedVec, StorageResult, Transactional};
use crate::types::{BlockHeaderExtended, SignedBlock};

/// Chain store errors
#[derive(Debug, Error)]
pub enum ChainError {
    /// The store holds no block
    #[error("blockchain is empty")]
    Empty,
    /// Height beyond the tip
    #[error("block {number} not found (length {length})")]
    NotFound {
        /// Requested height
        number: u64,
        /// Chain length
        length: u64,
    },
    /// Appended block has the wrong height
    #[error("block number mismatch: expected {expected}, got {got}")]
    WrongNumber {
        /// Next height
        expected: u64,
        /// Height in the block
        got: u64,
    },
    /// Appended block does not point at the tip
    #[error("block {number} does not link to the tip")]
    WrongPrevHash {
        /// Height in the block
        number: u64,
    },
    /// Hashing failed
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Blocks and headers by height
#[derive(Clone, Debug, Default)]
pub struct ChainStore {
    blocks: StagedVec<SignedBlock>,
    headers: StagedVec<BlockHeaderExtended>,
}

impl ChainStore {
    /// Assemble from stores
    #[must_use]
    pub const fn new(
        blocks: StagedVec<SignedBlock>,
        headers: StagedVec<BlockHeaderExtended>,
    ) -> Self {
        Self { blocks, headers }
    }

    /// Number of blocks, genesis included
    #[must_use]
    pub fn length(&self) -> u64 {
        self.headers.len() as u64
    }

    /// Block at a height
    ///
    /// # Errors
    /// Returns error if the height is beyond the tip
    pub fn at(&self, number: u64) -> Result<&SignedBlock, ChainError> {
        usize::try_from(number)
            .ok()
            .and_then(|i| self.blocks.get(i))
            .ok_or(ChainError::NotFound {
                number,
                length: self.length(),
            })
    }

    /// Header at a height
    ///
    /// # Errors
    /// Returns error if the height is beyond the tip
    pub fn header_at(&self, number: u64) -> Result<&BlockHeaderExtended, ChainError> {
        usize::try_from(number)
            .ok()
            .and_then(|i| self.headers.get(i))
            .ok_or(ChainError::NotFound {
                number,
                length: self.length(),
            })
    }

    /// Header of the tip
    ///
    /// # Errors
    /// Returns error if the chain is empty
    pub fn last_header(&self) -> Result<&BlockHeaderExtended, ChainError> {
        self.headers.last().ok_or(ChainError::Empty)
    }

    /// Tip block
    ///
    /// # Errors
    /// Returns error if the chain is empty
    pub fn last_block(&self) -> Result<&SignedBlock, ChainError> {
        self.blocks.last().ok_or(ChainError::Empty)
    }

    /// Append a block on top of the tip
    ///
    /// # Errors
    /// Returns error if the block's height or parent hash do not follow the tip
    pub fn insert(&mut self, signed_block: SignedBlock) -> Result<Hash, ChainError> {
        let header = signed_block.block.header.clone();
        if header.block_number != self.length() {
            return Err(ChainError::WrongNumber {
                expected: self.length(),
                got: header.block_number,
            });
        }
        let expected_prev = match self.headers.last() {
            Some(tip) => tip.block_hash,
            None => Hash::ZERO,
        };
        if header.prev_hash != expected_prev {
            return Err(ChainError::WrongPrevHash {
                number: header.block_number,
            });
        }

        let block_hash = signed_block.block.hash()?;
        self.blocks.push(signed_block);
        self.headers.push(BlockHeaderExtended { header, block_hash });
        Ok(block_hash)
    }

    /// Pop the tip block
    ///
    /// # Errors
    /// Returns error if the chain is empty
    pub fn remove_last_block(&mut self) -> Result<SignedBlock, ChainError> {
        self.headers.pop().ok_or(ChainError::Empty)?;
        self.blocks.pop().ok_or(ChainError::Empty)
    }
}

impl Transactional for ChainStore {
    fn save(&mut self) -> StorageResult<()> {
        self.blocks.save()?;
        self.headers.save()
    }

    fn commit(&mut self) {
        self.blocks.commit();
        self.headers.commit();
    }

    fn discard(&mut self) {
        self.blocks.discard();
        self.headers.discard();
    }

    fn clear(&mut self) {
        self.blocks.clear();
        self.headers.clear();
    }
}
