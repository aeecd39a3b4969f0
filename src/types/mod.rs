//! Core data types: coins, addresses, blocks and transactions.

mod address;
mod block;
mod coin;
mod transaction;

pub use address::Address;
pub use block::{Block, BlockHeader, BlockHeaderExtended, Reward, RewardType, SignedBlock};
pub use coin::{Coin, CoinError, DECIMALS, FRACTIONS_IN_WHOLE};
pub use transaction::{
    Action, Authorization, CancelSponsorContentUnit, ContentUnit, File, NodeType, Role,
    ServiceStatistics, ServiceStatisticsCount, ServiceStatisticsFile, SignedTransaction,
    SponsorContentUnit, Transaction, Transfer,
};

use chrono::{DateTime, Utc};

/// A unique identifier (content URIs are hashes)
pub type Id = crate::crypto::Hash;

/// Unix timestamp in seconds
pub type Timestamp = i64;

/// Get current timestamp in seconds
#[must_use]
pub fn now_secs() -> Timestamp {
    Utc::now().timestamp()
}

/// Convert timestamp to `DateTime`
#[must_use]
pub fn timestamp_to_datetime(ts: Timestamp) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(ts, 0)
}

/// Direction in which a block or transaction is being processed
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ApplyMode {
    /// Moving forward
    Apply,
    /// Undoing
    Revert,
}
