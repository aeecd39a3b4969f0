//! # Stakechain
//!
//! A node for a stake-weighted blockchain that pays content authors,
//! channels and storage nodes from measured usage.
//!
//! ## Architecture
//!
//! - [`node::Ledger`] owns the chain, balances, documents, transaction pool,
//!   action log and replay cache, and is the only place that mutates them
//! - [`consensus`] draws block weights from stake and produces blocks
//! - [`tokenomics`] turns emission, sponsorships and usage statistics into
//!   the reward list of a block
//! - [`sync`] follows the heaviest chain a peer can prove
//! - [`network`] carries framed messages between peers
//!
//! ## Consensus
//!
//! - Every block interval is exactly [`params::BLOCK_MINE_DELAY`] seconds
//! - A block's delta is drawn from its producer's balance and the previous
//!   block hash; the chain with the highest cumulative delta wins
//! - The retarget constant doubles or halves when a full window of deltas
//!   leaves its band

#![forbid(unsafe_code)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rust_2018_idioms
)]
#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]

pub mod action_log;
pub mod chain;
pub mod config;
pub mod consensus;
pub mod crypto;
pub mod documents;
pub mod mempool;
pub mod network;
pub mod node;
pub mod state;
pub mod storage;
pub mod sync;
pub mod tokenomics;
pub mod types;

pub use config::{ConfigError, NodeConfig};
pub use consensus::{BlockProducer, BlockProducerConfig, ConsensusParams};
pub use crypto::{Hash, Keypair, PublicKey, Signature};
pub use network::{Message, Network, NetworkEvent, PeerId};
pub use node::{Ledger, LedgerError, Node};
pub use types::{Action, Address, Block, BlockHeader, Coin, SignedBlock, SignedTransaction};

/// Protocol version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol constants
pub mod params {
    use crate::types::Coin;

    /// Seconds between consecutive blocks
    pub const BLOCK_MINE_DELAY: i64 = 600;

    /// Headers per sync page
    pub const HEADER_TR_LENGTH: u64 = 50;

    /// Blocks per sync page
    pub const BLOCK_TR_LENGTH: u64 = 10;

    /// Blocks applied per sync round
    pub const BLOCK_INSERT_LENGTH: usize = 100;

    /// Transactions per block
    pub const BLOCK_MAX_TRANSACTIONS: usize = 1000;

    /// Tolerated clock difference between nodes, in seconds
    pub const NODES_TIME_SHIFT: i64 = 60;

    /// Longest allowed transaction lifetime
    pub const TRANSACTION_MAX_LIFETIME_HOURS: i64 = 24;

    /// Usage reported by a server may exceed its peers' reports by 12/10
    pub const STAT_TOLERANCE_NUMERATOR: u64 = 12;

    /// See [`STAT_TOLERANCE_NUMERATOR`]
    pub const STAT_TOLERANCE_DENOMINATOR: u64 = 10;

    /// Chain balance needed to produce blocks
    pub const MINE_AMOUNT_THRESHOLD: Coin = Coin::from_whole(1);

    /// Blocks per emission year
    pub const YEAR_BLOCKS: u64 = 50_000;

    /// Emission split: miner, author, channel, storage
    pub const REWARD_SPLIT_PERCENT: [u8; 4] = [10, 50, 15, 25];

    /// Relay hops given to an originated broadcast
    pub const BROADCAST_ECHOES: u8 = 2;

    /// A broadcast with no hops left is re-reflected one time in this many
    pub const REFLECTION_CHANCE: u32 = 10;
}
