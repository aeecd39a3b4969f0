//! Blocks, headers and rewards.
//!
//! A block's hash covers its header, every transaction with its
//! authorizations, and the reward list. The next header's `prev_hash`
//! points at that hash, so the chain commits to everything a block did.

use serde::{Deserialize, Serialize};

use super::{Address, Coin, SignedTransaction, Timestamp};
use crate::crypto::{hash_serialized, verify, CryptoResult, Hash, Keypair, Signature};

/// Block header carrying the consensus weight fields
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Height, genesis is 0
    pub block_number: u64,
    /// Stake-weighted consensus value of this block
    pub delta: u64,
    /// Consensus constant in force for this block
    pub c_const: u64,
    /// Sum of all deltas up to and including this block
    pub c_sum: u64,
    /// Hash of the previous block
    pub prev_hash: Hash,
    /// Signing time, exactly one block interval after the previous block
    pub time_signed: Timestamp,
}

/// Kind of reward credited by a block
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RewardType {
    /// Genesis allocation
    Initial,
    /// Block producer share, fees and leftovers
    Miner,
    /// Content author share
    Author,
    /// Channel share
    Channel,
    /// Storage node share
    Storage,
    /// Unused sponsorship returned to its sponsor
    SponsoredReturn,
}

/// A single credit made by a block
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reward {
    /// Recipient
    pub to: Address,
    /// Amount credited
    pub amount: Coin,
    /// Why it was credited
    pub reward_type: RewardType,
}

/// Unsigned block contents
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Header
    pub header: BlockHeader,
    /// Transactions in creation-time order
    pub signed_transactions: Vec<SignedTransaction>,
    /// Rewards in canonical order
    pub rewards: Vec<Reward>,
}

impl Block {
    /// Block hash
    ///
    /// # Errors
    /// Returns error if the block cannot be encoded
    pub fn hash(&self) -> CryptoResult<Hash> {
        hash_serialized(self)
    }
}

/// A block signed by its producer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedBlock {
    /// Contents
    pub block: Block,
    /// Producer address
    pub signer: Address,
    /// Producer signature over the block hash
    pub signature: Signature,
}

impl SignedBlock {
    /// Sign a block with the producer's keypair
    ///
    /// # Errors
    /// Returns error if the block cannot be encoded
    pub fn sign(block: Block, keypair: &Keypair) -> CryptoResult<Self> {
        let hash = block.hash()?;
        Ok(Self {
            signature: keypair.sign(hash.as_bytes()),
            signer: Address::from_public_key(keypair.public_key()),
            block,
        })
    }

    /// Check the producer signature
    ///
    /// # Errors
    /// Returns error if the signature does not match the signer and contents
    pub fn verify_signature(&self) -> CryptoResult<()> {
        let hash = self.block.hash()?;
        verify(&self.signer.public_key()?, hash.as_bytes(), &self.signature)
    }

    /// Header shortcut
    #[must_use]
    pub const fn header(&self) -> &BlockHeader {
        &self.block.header
    }
}

/// Header stored next to the hash of its block
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeaderExtended {
    /// Header
    pub header: BlockHeader,
    /// Hash of the full block
    pub block_hash: Hash,
}
