//! Block production.
//!
//! The producer assembles a block on top of the local tip from the pending
//! pool:
//! 1. Reverting the pool and dropping what expired
//! 2. Ranking statistics reports and groups of related transactions
//! 3. Applying the admitted ones to the chain layer
//! 4. Granting rewards, signing and appending the block
//!
//! Everything runs inside one ledger transaction, so a failure leaves the
//! chain and the pool exactly as they were.

use std::cmp::Ordering;
use std::collections::{BTreeSet, BinaryHeap};

use tracing::{debug, info};

use crate::crypto::Keypair;
use crate::node::{signed_transaction_validate, Ledger};
use crate::params::{BLOCK_MAX_TRANSACTIONS, BLOCK_MINE_DELAY, MINE_AMOUNT_THRESHOLD};
use crate::state::StateLayer;
use crate::types::{
    Action, Address, Block, BlockHeader, SignedBlock, SignedTransaction, Timestamp,
};

use super::{calc_delta, check_delta_vector, group_by_participants, ConsensusError};

/// Configuration for block production
#[derive(Clone, Debug)]
pub struct BlockProducerConfig {
    /// Maximum transactions per block
    pub max_transactions: usize,
    /// Share of the block statistics reports may take, in percent
    pub statistics_share_percent: usize,
}

impl Default for BlockProducerConfig {
    fn default() -> Self {
        Self {
            max_transactions: BLOCK_MAX_TRANSACTIONS,
            statistics_share_percent: 50,
        }
    }
}

/// A group of pool transactions that touch the same accounts
struct PrioritizedGroup {
    members: Vec<usize>,
    fee_fractions: u128,
}

impl PrioritizedGroup {
    fn first(&self) -> usize {
        self.members.first().copied().unwrap_or(usize::MAX)
    }
}

impl PartialEq for PrioritizedGroup {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PrioritizedGroup {}

impl PartialOrd for PrioritizedGroup {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PrioritizedGroup {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher fee per transaction first, then the group that entered
        // the pool first
        let mine = self.fee_fractions * other.members.len() as u128;
        let theirs = other.fee_fractions * self.members.len() as u128;
        mine.cmp(&theirs)
            .then_with(|| other.first().cmp(&self.first()))
    }
}

/// Block producer
pub struct BlockProducer {
    config: BlockProducerConfig,
    keypair: Keypair,
    address: Address,
}

impl std::fmt::Debug for BlockProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockProducer")
            .field("address", &self.address)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl BlockProducer {
    /// Create a producer signing with `keypair`
    #[must_use]
    pub fn new(keypair: Keypair, config: BlockProducerConfig) -> Self {
        let address = Address::from_public_key(keypair.public_key());
        Self {
            config,
            keypair,
            address,
        }
    }

    /// Producer address
    #[must_use]
    pub const fn address(&self) -> &Address {
        &self.address
    }

    /// Time at which the next block may be produced
    ///
    /// # Errors
    /// Returns error if the ledger has no genesis
    pub fn ready_at(&self, ledger: &Ledger) -> Result<Timestamp, ConsensusError> {
        Ok(ledger.tip()?.header.time_signed + BLOCK_MINE_DELAY)
    }

    /// Produce, sign and append the next block.
    ///
    /// # Errors
    /// Returns [`ConsensusError::TooEarly`] or
    /// [`ConsensusError::BelowMiningThreshold`] when this node may not
    /// produce now; other errors mean the attempt was rolled back
    pub fn produce_block(
        &self,
        ledger: &mut Ledger,
        now: Timestamp,
    ) -> Result<SignedBlock, ConsensusError> {
        let tip = ledger.tip()?;
        let time_signed = tip.header.time_signed + BLOCK_MINE_DELAY;
        if now < time_signed {
            return Err(ConsensusError::TooEarly {
                now,
                ready_at: time_signed,
            });
        }
        let balance = ledger.state().get_balance(&self.address, StateLayer::Chain);
        if balance < MINE_AMOUNT_THRESHOLD {
            return Err(ConsensusError::BelowMiningThreshold { balance });
        }
        let number = tip.header.block_number + 1;

        ledger.with_transaction(|ledger| {
            let (c_const, window_error) =
                check_delta_vector(&ledger.delta_window(number)?, ledger.params());
            if !window_error.is_empty() {
                return Err(ConsensusError::DeltaWindow(window_error));
            }
            let delta = calc_delta(&self.address, balance, &tip.block_hash, c_const, ledger.params());
            let header = BlockHeader {
                block_number: number,
                delta,
                c_const,
                c_sum: tip
                    .header
                    .c_sum
                    .checked_add(delta)
                    .ok_or(ConsensusError::WeightOverflow)?,
                prev_hash: tip.block_hash,
                time_signed,
            };

            let candidates = ledger.revert_pool()?;
            let admitted = self.select(&candidates, number, time_signed);

            let mut included = Vec::with_capacity(admitted.len());
            let mut included_hashes = BTreeSet::new();
            for signed in admitted {
                match ledger.include_transaction(signed) {
                    Ok(()) => {
                        included_hashes.insert(signed.hash()?);
                        included.push(signed.clone());
                    }
                    Err(error) => debug!(
                        action = signed.transaction.action.name(),
                        error = %error,
                        "transaction left in pool"
                    ),
                }
            }

            let outcome = ledger.grant_block_rewards(&included, &header, &self.address)?;
            let block = Block {
                header,
                signed_transactions: included,
                rewards: outcome.rewards.clone(),
            };
            let signed_block = SignedBlock::sign(block, &self.keypair)?;
            let hash = ledger.append_block(&signed_block, outcome)?;

            let mut remaining = Vec::with_capacity(candidates.len());
            for signed in candidates {
                if !included_hashes.contains(&signed.hash()?) {
                    remaining.push(signed);
                }
            }
            let kept = ledger.reapply_pool(remaining, now);

            info!(
                height = number,
                hash = %hash,
                delta,
                c_const,
                transactions = signed_block.block.signed_transactions.len(),
                pool = kept,
                "block mined"
            );
            Ok(signed_block)
        })
    }

    /// Pick the transactions of the next block, in creation-time order
    /// with pool order breaking ties
    fn select<'a>(
        &self,
        candidates: &'a [SignedTransaction],
        number: u64,
        time_signed: Timestamp,
    ) -> Vec<&'a SignedTransaction> {
        let mut statistics = Vec::new();
        let mut ordinary = Vec::new();
        for (position, signed) in candidates.iter().enumerate() {
            if signed.transaction.creation_time > time_signed
                || signed_transaction_validate(signed, time_signed).is_err()
            {
                continue;
            }
            match &signed.transaction.action {
                Action::ServiceStatistics(report) if report.block_number == number => {
                    statistics.push(position);
                }
                Action::ServiceStatistics(_) => {}
                _ => ordinary.push(position),
            }
        }

        let statistics_cap =
            self.config.max_transactions * self.config.statistics_share_percent / 100;
        statistics.sort_by(|a, b| {
            candidates[*b]
                .transaction
                .fee
                .cmp(&candidates[*a].transaction.fee)
        });
        statistics.truncate(statistics_cap);

        let pending: Vec<SignedTransaction> =
            ordinary.iter().map(|i| candidates[*i].clone()).collect();
        let mut queue: BinaryHeap<PrioritizedGroup> = group_by_participants(&pending)
            .into_iter()
            .map(|members| PrioritizedGroup {
                fee_fractions: members
                    .iter()
                    .map(|i| pending[*i].transaction.fee.to_fractions())
                    .sum(),
                members,
            })
            .collect();

        let mut admitted = statistics;
        while let Some(group) = queue.pop() {
            if admitted.len() + group.members.len() > self.config.max_transactions {
                continue;
            }
            admitted.extend(group.members.iter().map(|i| ordinary[*i]));
        }

        admitted.sort_by_key(|position| (candidates[*position].transaction.creation_time, *position));
        admitted.into_iter().map(|position| &candidates[position]).collect()
    }
}
