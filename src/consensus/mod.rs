//! Stake-weighted consensus.
//!
//! A block's weight is its `delta`, a deterministic lottery value that grows
//! with the producer's stake. Chains are compared by the running sum of
//! deltas (`c_sum`), and the consensus constant `c_const` retargets every
//! window of blocks so that the average delta stays inside a band.
//!
//! ## Block production
//!
//! 1. Wait until the tip is [`crate::params::BLOCK_MINE_DELAY`] old
//! 2. Revert the pool, keep the transactions still valid at the new time
//! 3. Admit statistics (ranked by fee, at most half the block) and groups
//!    of related transactions (ranked by fee per transaction)
//! 4. Apply them in creation-time order, returning failures to the pool
//! 5. Grant rewards, sign, append, and re-apply what is left of the pool

mod block_producer;
mod union_find;
mod weight;

pub use block_producer::{BlockProducer, BlockProducerConfig};
pub use union_find::{group_by_participants, UnionFind};
pub use weight::{
    break_single_block_tie, calc_delta, check_delta_vector, check_headers, compare_weight,
    ConsensusParams, ForkChoice,
};

use thiserror::Error;

use crate::crypto::CryptoError;
use crate::node::LedgerError;
use crate::storage::StorageError;
use crate::types::{Coin, Timestamp};

/// Consensus errors
#[derive(Debug, Error)]
pub enum ConsensusError {
    /// The tip is younger than the block interval
    #[error("too early to produce: now {now}, next block at {ready_at}")]
    TooEarly {
        /// Local time
        now: Timestamp,
        /// Earliest production time
        ready_at: Timestamp,
    },

    /// Producer stake below the mining threshold
    #[error("stake {balance} below mining threshold")]
    BelowMiningThreshold {
        /// Producer's chain balance
        balance: Coin,
    },

    /// Local retarget window is inconsistent
    #[error("inconsistent delta window: {0}")]
    DeltaWindow(String),

    /// `c_sum` does not fit
    #[error("chain weight overflow")]
    WeightOverflow,

    /// Ledger failure while building the block
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Signing failure
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

impl From<StorageError> for ConsensusError {
    fn from(error: StorageError) -> Self {
        Self::Ledger(error.into())
    }
}
