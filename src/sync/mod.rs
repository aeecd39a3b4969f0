//! Chain synchronization with one peer.
//!
//! A [`SyncSession`] walks two phases:
//!
//! - **Headers**: pages of headers are fetched backwards from the peer's
//!   tip until one of them points at a block this node also has, the last
//!   common block (LCB). The peer's branch above the LCB is checked for
//!   continuity and for a consistent retarget window across the splice.
//! - **Blocks**: if the branch is heavier, full blocks are fetched forward
//!   in pages, checked against the headers, and applied in rounds. The
//!   first round reverts the local chain down to the LCB.
//!
//! Every round runs inside [`Ledger::with_transaction`], so a rejected
//! block leaves the ledger as it was before the round.

mod blocks;
mod headers;

use std::fmt;

use thiserror::Error;
use tracing::error;

use crate::network::Message;
use crate::node::{Ledger, LedgerError};
use crate::params::{BLOCK_TR_LENGTH, HEADER_TR_LENGTH};
use crate::storage::StorageError;
use crate::types::{BlockHeaderExtended, SignedBlock, Timestamp};

use blocks::BlockPhase;
use headers::HeaderPhase;

/// What a peer did wrong
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProtocolViolation {
    /// A response nobody asked for
    UnexpectedMessage(&'static str),
    /// A page with the wrong heights
    WrongRange {
        /// First requested height
        from: u64,
        /// Last requested height
        to: u64,
    },
    /// Headers that do not chain
    BrokenHeaderChain {
        /// First height that does not follow its predecessor
        number: u64,
    },
    /// A header signed too far in the future
    FutureHeader {
        /// Height
        number: u64,
        /// Claimed signing time
        time_signed: Timestamp,
    },
    /// The headers do not end where the peer said its tip was
    PromiseMismatch,
    /// No header connects to the local chain
    NoCommonBlock,
    /// Inconsistent consensus constant across the splice
    DeltaWindow {
        /// Height
        number: u64,
        /// Defect
        reason: String,
    },
    /// A block that does not match its announced header
    HeaderMismatch {
        /// Height
        number: u64,
    },
    /// A block failing validation
    BlockRejected {
        /// Height
        number: u64,
        /// Defect
        reason: String,
    },
    /// A block leaving out too many known statistics reports
    MissingStatistics {
        /// Height
        number: u64,
    },
}

impl fmt::Display for ProtocolViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedMessage(what) => write!(f, "unexpected {what}"),
            Self::WrongRange { from, to } => write!(f, "page does not cover {from}..={to}"),
            Self::BrokenHeaderChain { number } => write!(f, "header chain broken at {number}"),
            Self::FutureHeader {
                number,
                time_signed,
            } => write!(f, "header {number} signed in the future at {time_signed}"),
            Self::PromiseMismatch => write!(f, "headers do not end at the announced tip"),
            Self::NoCommonBlock => write!(f, "no common block with the local chain"),
            Self::DeltaWindow { number, reason } => {
                write!(f, "c_const of header {number} inconsistent: {reason}")
            }
            Self::HeaderMismatch { number } => {
                write!(f, "block {number} does not match its header")
            }
            Self::BlockRejected { number, reason } => {
                write!(f, "block {number} rejected: {reason}")
            }
            Self::MissingStatistics { number } => {
                write!(f, "block {number} omits known statistics")
            }
        }
    }
}

/// Sync errors
#[derive(Debug, Error)]
pub enum SyncError {
    /// The peer sent something invalid; the session is abandoned
    #[error("protocol violation: {0}")]
    Protocol(ProtocolViolation),
    /// A local invariant broke; the session is abandoned
    #[error("internal sync failure: {0}")]
    Internal(String),
}

impl SyncError {
    pub(crate) fn internal(reason: impl fmt::Display) -> Self {
        let reason = reason.to_string();
        error!(reason = %reason, "sync invariant broken");
        Self::Internal(reason)
    }
}

impl From<ProtocolViolation> for SyncError {
    fn from(violation: ProtocolViolation) -> Self {
        Self::Protocol(violation)
    }
}

impl From<StorageError> for SyncError {
    fn from(error: StorageError) -> Self {
        Self::internal(error)
    }
}

impl From<LedgerError> for SyncError {
    fn from(error: LedgerError) -> Self {
        match error {
            LedgerError::BlockRejected { number, reason } => {
                Self::Protocol(ProtocolViolation::BlockRejected { number, reason })
            }
            other => Self::internal(other),
        }
    }
}

/// Result of feeding a message to a session
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncStep {
    /// Send this request to the peer
    Send(Message),
    /// The peer has nothing better
    UpToDate,
    /// The peer's branch replaced or extended the local chain
    Applied {
        /// New local tip height
        height: u64,
    },
    /// Equal-weight rival tip lost the tie-break
    IncumbentKept,
}

#[derive(Debug, Default)]
enum Phase {
    #[default]
    Idle,
    Headers(HeaderPhase),
    Blocks(BlockPhase),
}

/// Sync state with one peer
#[derive(Debug, Default)]
pub struct SyncSession {
    phase: Phase,
}

impl SyncSession {
    /// Fresh idle session
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the session is fetching blocks, which needs the global lock
    #[must_use]
    pub const fn in_block_phase(&self) -> bool {
        matches!(self.phase, Phase::Blocks(_))
    }

    /// Whether no exchange is in flight
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        matches!(self.phase, Phase::Idle)
    }

    /// Drop any state
    pub fn reset(&mut self) {
        self.phase = Phase::Idle;
    }

    /// The peer announced its tip
    ///
    /// # Errors
    /// Returns error if the local ledger has no genesis
    pub fn on_sync_response(
        &mut self,
        ledger: &Ledger,
        block_number: u64,
        c_sum: u64,
    ) -> Result<SyncStep, SyncError> {
        let outcome = self.start(ledger, block_number, c_sum);
        self.settle(outcome)
    }

    fn start(&mut self, ledger: &Ledger, block_number: u64, c_sum: u64) -> Result<SyncStep, SyncError> {
        let tip = ledger.tip()?;
        let worth_it = c_sum > tip.header.c_sum
            || (c_sum == tip.header.c_sum && block_number == tip.header.block_number);
        if !worth_it || block_number == 0 {
            return Ok(SyncStep::UpToDate);
        }
        let (phase, request) = HeaderPhase::start(block_number, c_sum);
        self.phase = Phase::Headers(phase);
        Ok(SyncStep::Send(request))
    }

    /// A page of headers arrived
    ///
    /// # Errors
    /// Returns error if the page is invalid or the local chain is broken
    pub fn on_headers(
        &mut self,
        ledger: &Ledger,
        headers: Vec<BlockHeaderExtended>,
        now: Timestamp,
    ) -> Result<SyncStep, SyncError> {
        let outcome = match &mut self.phase {
            Phase::Headers(phase) => phase.on_page(ledger, headers, now),
            _ => Err(ProtocolViolation::UnexpectedMessage("headers").into()),
        };
        let outcome = match outcome {
            Ok(headers::HeaderOutcome::Next(request)) => Ok(SyncStep::Send(request)),
            Ok(headers::HeaderOutcome::UpToDate) => Ok(SyncStep::UpToDate),
            Ok(headers::HeaderOutcome::Branch(branch)) => {
                let (phase, request) = BlockPhase::start(branch);
                self.phase = Phase::Blocks(phase);
                Ok(SyncStep::Send(request))
            }
            Err(error) => Err(error),
        };
        self.settle(outcome)
    }

    /// A page of blocks arrived
    ///
    /// # Errors
    /// Returns error if a block is invalid; the ledger is left as it was
    /// before the current round
    pub fn on_blocks(
        &mut self,
        ledger: &mut Ledger,
        signed_blocks: Vec<SignedBlock>,
        now: Timestamp,
    ) -> Result<SyncStep, SyncError> {
        let outcome = match &mut self.phase {
            Phase::Blocks(phase) => phase.on_page(ledger, signed_blocks, now),
            _ => Err(ProtocolViolation::UnexpectedMessage("blocks").into()),
        };
        self.settle(outcome)
    }

    /// Return to idle once the session is finished
    fn settle(&mut self, outcome: Result<SyncStep, SyncError>) -> Result<SyncStep, SyncError> {
        if !matches!(outcome, Ok(SyncStep::Send(_))) {
            self.phase = Phase::Idle;
        }
        outcome
    }
}

/// Answer a header request: headers `blocks_from..=blocks_to`, clipped to
/// the local chain and to one page
///
/// # Errors
/// Returns error if a stored header is missing
pub fn serve_headers(
    ledger: &Ledger,
    blocks_from: u64,
    blocks_to: u64,
) -> Result<Vec<BlockHeaderExtended>, LedgerError> {
    let length = ledger.chain().length();
    let to = blocks_to.min(length.saturating_sub(1));
    let to = to.min(blocks_from.saturating_add(HEADER_TR_LENGTH - 1));
    if blocks_from > to || length == 0 {
        return Ok(Vec::new());
    }
    (blocks_from..=to)
        .map(|number| Ok(ledger.chain().header_at(number)?.clone()))
        .collect()
}

/// Answer a block request: blocks `blocks_from..=blocks_to`, clipped to the
/// local chain and to one page
///
/// # Errors
/// Returns error if a stored block is missing
pub fn serve_blocks(
    ledger: &Ledger,
    blocks_from: u64,
    blocks_to: u64,
) -> Result<Vec<SignedBlock>, LedgerError> {
    let length = ledger.chain().length();
    let to = blocks_to.min(length.saturating_sub(1));
    let to = to.min(blocks_from.saturating_add(BLOCK_TR_LENGTH - 1));
    if blocks_from > to || length == 0 {
        return Ok(Vec::new());
    }
    (blocks_from..=to)
        .map(|number| Ok(ledger.chain().at(number)?.clone()))
        .collect()
}
