//! Header phase: backwards paging, last common block, fork decision.

use tracing::debug;

use super::{ProtocolViolation, SyncError};
use crate::consensus::{check_delta_vector, check_headers, compare_weight, ForkChoice};
use crate::network::Message;
use crate::node::Ledger;
use crate::params::{HEADER_TR_LENGTH, NODES_TIME_SHIFT};
use crate::types::{BlockHeaderExtended, Timestamp};

/// The peer's branch above the last common block
#[derive(Debug)]
pub(super) struct Branch {
    /// Last common block height
    pub lcb: u64,
    /// Headers above `lcb`, ascending
    pub headers: Vec<BlockHeaderExtended>,
    /// Equal weight, one block each side of `lcb`
    pub tie: bool,
}

pub(super) enum HeaderOutcome {
    Next(Message),
    UpToDate,
    Branch(Branch),
}

#[derive(Debug)]
pub(super) struct HeaderPhase {
    peer_tip: u64,
    peer_c_sum: u64,
    requested: (u64, u64),
    /// Received headers, ascending, ending at the peer's tip
    headers: Vec<BlockHeaderExtended>,
}

const fn page_ending_at(to: u64) -> (u64, u64) {
    (to.saturating_sub(HEADER_TR_LENGTH - 1), to)
}

fn header_request((blocks_from, blocks_to): (u64, u64)) -> Message {
    Message::BlockHeaderRequest {
        blocks_from,
        blocks_to,
    }
}

fn links(next: &BlockHeaderExtended, previous: &BlockHeaderExtended) -> bool {
    !check_headers(&next.header, &previous.header) && next.header.prev_hash == previous.block_hash
}

impl HeaderPhase {
    pub(super) fn start(peer_tip: u64, peer_c_sum: u64) -> (Self, Message) {
        let requested = page_ending_at(peer_tip);
        let phase = Self {
            peer_tip,
            peer_c_sum,
            requested,
            headers: Vec::new(),
        };
        (phase, header_request(requested))
    }

    pub(super) fn on_page(
        &mut self,
        ledger: &Ledger,
        mut page: Vec<BlockHeaderExtended>,
        now: Timestamp,
    ) -> Result<HeaderOutcome, SyncError> {
        let (from, to) = self.requested;
        let in_range = page.len() as u64 == to - from + 1
            && page
                .iter()
                .zip(from..)
                .all(|(header, number)| header.header.block_number == number);
        if !in_range {
            return Err(ProtocolViolation::WrongRange { from, to }.into());
        }
        if let Some(header) = page
            .iter()
            .find(|header| header.header.time_signed > now + NODES_TIME_SHIFT)
        {
            return Err(ProtocolViolation::FutureHeader {
                number: header.header.block_number,
                time_signed: header.header.time_signed,
            }
            .into());
        }
        for pair in page.windows(2) {
            if !links(&pair[1], &pair[0]) {
                return Err(ProtocolViolation::BrokenHeaderChain {
                    number: pair[1].header.block_number,
                }
                .into());
            }
        }
        match (self.headers.first(), page.last()) {
            (Some(newer), Some(older)) if !links(newer, older) => {
                return Err(ProtocolViolation::BrokenHeaderChain {
                    number: newer.header.block_number,
                }
                .into());
            }
            (None, Some(tip))
                if tip.header.block_number != self.peer_tip
                    || tip.header.c_sum != self.peer_c_sum =>
            {
                return Err(ProtocolViolation::PromiseMismatch.into());
            }
            _ => {}
        }

        let page_length = page.len();
        page.append(&mut self.headers);
        self.headers = page;

        let local_length = ledger.chain().length();
        let mut lcb = None;
        for header in self.headers[..page_length].iter().rev() {
            let number = header.header.block_number;
            if number == 0 || number > local_length {
                continue;
            }
            if ledger.chain().header_at(number - 1).map_err(SyncError::internal)?.block_hash
                == header.header.prev_hash
            {
                lcb = Some(number - 1);
                break;
            }
        }

        match lcb {
            Some(lcb) => self.branch(ledger, lcb),
            None if from == 0 => Err(ProtocolViolation::NoCommonBlock.into()),
            None => {
                self.requested = page_ending_at(from - 1);
                debug!(from = self.requested.0, to = self.requested.1, "no common block yet");
                Ok(HeaderOutcome::Next(header_request(self.requested)))
            }
        }
    }

    fn branch(&mut self, ledger: &Ledger, lcb: u64) -> Result<HeaderOutcome, SyncError> {
        let local_length = ledger.chain().length();
        let mut lcb = lcb;
        let mut headers: Vec<BlockHeaderExtended> = std::mem::take(&mut self.headers)
            .into_iter()
            .filter(|header| header.header.block_number > lcb)
            .collect();
        // headers the local chain already has are not part of the branch
        let mut shared = 0;
        for header in &headers {
            let number = header.header.block_number;
            if number >= local_length
                || ledger.chain().header_at(number).map_err(SyncError::internal)?.block_hash
                    != header.block_hash
            {
                break;
            }
            lcb = number;
            shared += 1;
        }
        headers.drain(..shared);
        let Some(first) = headers.first() else {
            return Ok(HeaderOutcome::UpToDate);
        };

        let base = ledger.chain().header_at(lcb).map_err(SyncError::internal)?;
        if !links(first, base) {
            return Err(ProtocolViolation::BrokenHeaderChain {
                number: first.header.block_number,
            }
            .into());
        }

        let mut window = ledger.delta_window(lcb + 1)?;
        for header in &headers {
            let (expected, defect) = check_delta_vector(&window, ledger.params());
            if !defect.is_empty() || expected != header.header.c_const {
                return Err(ProtocolViolation::DeltaWindow {
                    number: header.header.block_number,
                    reason: if defect.is_empty() {
                        format!("expected {expected}, got {}", header.header.c_const)
                    } else {
                        defect
                    },
                }
                .into());
            }
            window.push((header.header.delta, header.header.c_const));
        }

        let local_tip = ledger.tip()?;
        let Some(peer_tip) = headers.last() else {
            return Ok(HeaderOutcome::UpToDate);
        };
        let tie = match compare_weight(local_tip.header.c_sum, peer_tip.header.c_sum) {
            ForkChoice::Incumbent => return Ok(HeaderOutcome::UpToDate),
            ForkChoice::Challenger => false,
            ForkChoice::Tie => {
                let single_block = lcb + 1 == local_tip.header.block_number
                    && peer_tip.header.block_number == local_tip.header.block_number;
                if !single_block {
                    return Ok(HeaderOutcome::UpToDate);
                }
                true
            }
        };
        debug!(lcb, peer_tip = peer_tip.header.block_number, tie, "branch found");
        Ok(HeaderOutcome::Branch(Branch { lcb, headers, tie }))
    }
}
