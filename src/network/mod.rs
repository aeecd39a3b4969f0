//! Peer-to-peer wire protocol.
//!
//! - [`Message`] is the tagged set of requests and responses
//! - [`codec`] frames messages over any async byte stream
//! - [`broadcast`] decides how far gossiped transactions travel
//! - [`transport`] runs framed TCP connections on tokio and reports
//!   [`NetworkEvent`]s to the node loop

pub mod broadcast;
pub mod codec;
pub mod transport;

pub use broadcast::BroadcastRelay;
pub use codec::{decode_frame, encode_frame, read_frame, write_frame, FRAME_MAGIC, MAX_FRAME_LEN};
pub use transport::{Network, NetworkEvent};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{BlockHeaderExtended, SignedBlock, SignedTransaction};

/// Local identifier of a connection
pub type PeerId = u64;

/// Network messages
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Ask for the peer's tip
    SyncRequest,
    /// The sender's tip
    SyncResponse {
        /// Tip height
        block_number: u64,
        /// Tip cumulative weight
        c_sum: u64,
    },
    /// Ask for headers `blocks_from..=blocks_to`
    BlockHeaderRequest {
        /// First height
        blocks_from: u64,
        /// Last height
        blocks_to: u64,
    },
    /// Headers, ascending
    BlockHeaderResponse {
        /// Headers with their block hashes
        headers: Vec<BlockHeaderExtended>,
    },
    /// Ask for blocks `blocks_from..=blocks_to`
    BlockchainRequest {
        /// First height
        blocks_from: u64,
        /// Last height
        blocks_to: u64,
    },
    /// Blocks, ascending
    BlockchainResponse {
        /// Signed blocks
        signed_blocks: Vec<SignedBlock>,
    },
    /// Gossiped transaction
    Broadcast {
        /// Remaining relay hops
        echoes: u8,
        /// The transaction
        package: SignedTransaction,
    },
    /// Nothing more to say
    Done,
    /// The sender rejected the last message
    Error {
        /// Reason
        message: String,
    },
}

impl Message {
    /// Stable numeric tag of the message type
    #[must_use]
    pub const fn rtt(&self) -> u32 {
        match self {
            Self::SyncRequest => 1,
            Self::SyncResponse { .. } => 2,
            Self::BlockHeaderRequest { .. } => 3,
            Self::BlockHeaderResponse { .. } => 4,
            Self::BlockchainRequest { .. } => 5,
            Self::BlockchainResponse { .. } => 6,
            Self::Broadcast { .. } => 7,
            Self::Done => 8,
            Self::Error { .. } => 9,
        }
    }
}

/// Network errors
#[derive(Debug, Error)]
pub enum NetworkError {
    /// Socket failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame does not start with the protocol magic
    #[error("bad frame magic {0:02x?}")]
    BadMagic([u8; 4]),

    /// Frame exceeds the size limit
    #[error("frame of {0} bytes exceeds the limit")]
    FrameTooLarge(usize),

    /// Payload cannot be (de)serialized
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Stream ended inside a frame
    #[error("connection closed mid-frame")]
    Truncated,

    /// Address cannot be used
    #[error("invalid address {0}")]
    InvalidAddress(String),

    /// The node loop is gone
    #[error("event channel closed")]
    ChannelClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rtt_tags_are_distinct() {
        let messages = [
            Message::SyncRequest,
            Message::SyncResponse {
                block_number: 0,
                c_sum: 0,
            },
            Message::BlockHeaderRequest {
                blocks_from: 0,
                blocks_to: 0,
            },
            Message::BlockHeaderResponse {
                headers: Vec::new(),
            },
            Message::BlockchainRequest {
                blocks_from: 0,
                blocks_to: 0,
            },
            Message::BlockchainResponse {
                signed_blocks: Vec::new(),
            },
            Message::Done,
            Message::Error {
                message: String::new(),
            },
        ];
        let mut tags: Vec<u32> = messages.iter().map(Message::rtt).collect();
        tags.sort_unstable();
        tags.dedup();
        assert_eq!(tags.len(), messages.len());
    }
}
