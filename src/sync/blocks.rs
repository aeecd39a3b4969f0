//! Block phase: forward paging, validation against headers, application.

use std::collections::BTreeSet;

use tracing::info;

use super::headers::Branch;
use super::{ProtocolViolation, SyncError, SyncStep};
use crate::consensus::{break_single_block_tie, ForkChoice};
use crate::crypto::Hash;
use crate::network::Message;
use crate::node::Ledger;
use crate::params::{BLOCK_INSERT_LENGTH, BLOCK_MAX_TRANSACTIONS, BLOCK_TR_LENGTH};
use crate::state::StateLayer;
use crate::tokenomics::check_service_statistics;
use crate::types::{Action, BlockHeaderExtended, SignedBlock, Timestamp};

#[derive(Debug)]
pub(super) struct BlockPhase {
    /// Height the next round builds on
    base: u64,
    /// Announced headers above `base`
    headers: Vec<BlockHeaderExtended>,
    /// Validated blocks waiting for the round to complete
    buffered: Vec<SignedBlock>,
    requested: (u64, u64),
    tie: bool,
    /// Whether the local blocks above the last common block are gone
    reverted: bool,
}

impl BlockPhase {
    pub(super) fn start(branch: Branch) -> (Self, Message) {
        let mut phase = Self {
            base: branch.lcb,
            headers: branch.headers,
            buffered: Vec::new(),
            requested: (0, 0),
            tie: branch.tie,
            reverted: false,
        };
        let request = phase.next_request();
        (phase, request)
    }

    fn target(&self) -> u64 {
        self.headers
            .last()
            .map_or(self.base, |header| header.header.block_number)
    }

    fn next_request(&mut self) -> Message {
        let blocks_from = self.base + 1 + self.buffered.len() as u64;
        let blocks_to = (blocks_from + BLOCK_TR_LENGTH - 1).min(self.target());
        self.requested = (blocks_from, blocks_to);
        Message::BlockchainRequest {
            blocks_from,
            blocks_to,
        }
    }

    pub(super) fn on_page(
        &mut self,
        ledger: &mut Ledger,
        signed_blocks: Vec<SignedBlock>,
        now: Timestamp,
    ) -> Result<SyncStep, SyncError> {
        let (from, to) = self.requested;
        let in_range = signed_blocks.len() as u64 == to - from + 1
            && signed_blocks
                .iter()
                .zip(from..)
                .all(|(block, number)| block.header().block_number == number);
        if !in_range {
            return Err(ProtocolViolation::WrongRange { from, to }.into());
        }
        for signed_block in &signed_blocks {
            self.validate(ledger, signed_blocks_index(self.base, signed_block), signed_block)?;
        }
        self.buffered.extend(signed_blocks);

        let complete = self.base + self.buffered.len() as u64 == self.target();
        if !complete && self.buffered.len() < BLOCK_INSERT_LENGTH {
            return Ok(SyncStep::Send(self.next_request()));
        }

        if self.tie && !self.reverted {
            let incumbent = ledger
                .chain()
                .last_block()
                .map_err(SyncError::internal)?
                .signer;
            let challenger = self
                .buffered
                .first()
                .map(|block| block.signer)
                .ok_or_else(|| SyncError::internal("tie-break without a challenger block"))?;
            let choice = break_single_block_tie(
                ledger.state().get_balance(&incumbent, StateLayer::Pool),
                ledger.state().get_balance(&challenger, StateLayer::Pool),
            );
            if choice != ForkChoice::Challenger {
                info!(height = self.target(), "equal-weight tip kept");
                return Ok(SyncStep::IncumbentKept);
            }
        }

        let blocks = std::mem::take(&mut self.buffered);
        let base = self.base;
        let revert = !self.reverted;
        let height = ledger.with_transaction(|ledger| -> Result<u64, SyncError> {
            let mut pool = ledger.revert_pool()?;
            if revert {
                let mut reverted = Vec::new();
                while ledger.chain().length() > base + 1 {
                    reverted.push(ledger.revert_last_block()?);
                }
                ledger.reseed_cache()?;
                if !reverted.is_empty() {
                    info!(lcb = base, reverted = reverted.len(), "local branch reverted");
                }
                // Oldest block first, ahead of the pool; whatever the new
                // branch includes is refused as a replay on re-entry
                let orphaned: Vec<_> = reverted
                    .into_iter()
                    .rev()
                    .flat_map(|signed_block| signed_block.block.signed_transactions)
                    .collect();
                pool.splice(0..0, orphaned);
            }
            for signed_block in &blocks {
                ledger.apply_block_chain(signed_block)?;
            }
            ledger.reapply_pool(pool, now);
            Ok(ledger.tip()?.header.block_number)
        })?;

        self.reverted = true;
        self.headers.drain(..blocks.len());
        self.base = height;
        info!(height, applied = blocks.len(), "synced blocks applied");
        if complete {
            Ok(SyncStep::Applied { height })
        } else {
            Ok(SyncStep::Send(self.next_request()))
        }
    }

    fn validate(
        &self,
        ledger: &Ledger,
        index: usize,
        signed_block: &SignedBlock,
    ) -> Result<(), SyncError> {
        let number = signed_block.header().block_number;
        let announced = self
            .headers
            .get(index)
            .ok_or_else(|| SyncError::internal(format!("no header for block {number}")))?;
        let matches = signed_block.block.header == announced.header
            && signed_block
                .block
                .hash()
                .is_ok_and(|hash| hash == announced.block_hash);
        if !matches {
            return Err(ProtocolViolation::HeaderMismatch { number }.into());
        }
        if signed_block.block.signed_transactions.len() > BLOCK_MAX_TRANSACTIONS {
            return Err(ProtocolViolation::BlockRejected {
                number,
                reason: "too many transactions".to_string(),
            }
            .into());
        }
        if signed_block.verify_signature().is_err() {
            return Err(ProtocolViolation::BlockRejected {
                number,
                reason: "bad block signature".to_string(),
            }
            .into());
        }
        if !check_service_statistics(
            &signed_block.block.signed_transactions,
            &eligible_statistics(ledger, number),
        ) {
            return Err(ProtocolViolation::MissingStatistics { number }.into());
        }
        Ok(())
    }
}

/// Position of a block among the headers above `base`
fn signed_blocks_index(base: u64, signed_block: &SignedBlock) -> usize {
    let offset = signed_block.header().block_number - base - 1;
    usize::try_from(offset).unwrap_or(usize::MAX)
}

/// Pooled statistics reports meant for block `number`
fn eligible_statistics(ledger: &Ledger, number: u64) -> BTreeSet<Hash> {
    ledger
        .pool()
        .iter()
        .filter(|signed| {
            matches!(&signed.transaction.action,
                Action::ServiceStatistics(report) if report.block_number == number)
        })
        .filter_map(|signed| signed.hash().ok())
        .collect()
}
