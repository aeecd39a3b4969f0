//! Block rewards.
//!
//! Every block pays out, in one canonical list:
//!
//! - the yearly emission, split by fixed percentages between the miner,
//!   authors, channels and storage nodes according to the block's
//!   cross-verified usage statistics
//! - sponsorship minutes released during the block, split the same way
//!   among the sponsored unit's recipients
//! - sponsorship refunds on expiry and cancellation
//! - transaction fees, to the miner
//!
//! Whatever cannot be attributed goes to the miner. The computation runs
//! identically when a block is applied and when it is reverted, so the
//! reverted list always equals the applied one.

mod distribution;
mod emission;
mod statistics;

pub use distribution::{distribute_rewards, split_by_percentages, to_weights, RewardWeight};
pub use emission::{block_emission, EMISSION_SCHEDULE};
pub use statistics::{
    check_service_statistics, counts_agree, cross_verify, validate_statistics, StatisticsOutcome,
    UnitWeights,
};

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::trace;

use crate::documents::{DocumentError, DocumentRegistry, SponsorOperation, SponsorSettlement};
use crate::params::REWARD_SPLIT_PERCENT;
use crate::state::LedgerView;
use crate::types::{
    Action, Address, ApplyMode, BlockHeader, Coin, CoinError, Id, NodeType, Reward, RewardType,
    SignedBlock, SignedTransaction,
};

/// Reward engine errors
#[derive(Debug, Error)]
pub enum RewardError {
    /// Arithmetic failure
    #[error(transparent)]
    Coin(#[from] CoinError),
    /// Sponsorship bookkeeping failed
    #[error(transparent)]
    Document(#[from] DocumentError),
    /// Weight arithmetic overflowed
    #[error("reward weight overflow")]
    Overflow,
    /// Claimed rewards differ from the recomputed ones
    #[error("reward mismatch at position {index}: claimed {claimed:?}, computed {computed:?}")]
    Mismatch {
        /// First differing position
        index: usize,
        /// Entry in the block
        claimed: Option<Reward>,
        /// Entry recomputed locally
        computed: Option<Reward>,
    },
}

/// Result of one block's reward computation
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RewardOutcome {
    /// Rewards in canonical order
    pub rewards: Vec<Reward>,
    /// Verified views per unit
    pub unit_view_counts: BTreeMap<Id, u64>,
    /// Sponsorship released to each unit's recipients
    pub unit_sponsor_applied: BTreeMap<Id, Coin>,
}

/// Accumulates credits keyed by `(type, recipient)`
#[derive(Debug)]
struct RewardBook {
    miner: Address,
    amounts: BTreeMap<(RewardType, Address), Coin>,
}

impl RewardBook {
    const fn new(miner: Address) -> Self {
        Self {
            miner,
            amounts: BTreeMap::new(),
        }
    }

    fn credit(&mut self, reward_type: RewardType, to: Address, amount: Coin) -> Result<(), RewardError> {
        if amount.is_zero() {
            return Ok(());
        }
        let entry = self.amounts.entry((reward_type, to)).or_default();
        *entry = entry.checked_add(amount)?;
        Ok(())
    }

    /// Split by weights; what has no recipient goes to the miner
    fn distribute(
        &mut self,
        reward_type: RewardType,
        weights: &[RewardWeight],
        total: Coin,
    ) -> Result<(), RewardError> {
        let (parts, leftover) = distribute_rewards(weights, total)?;
        for (to, amount) in parts {
            self.credit(reward_type, to, amount)?;
        }
        self.credit(RewardType::Miner, self.miner, leftover)
    }

    /// Split by the fixed percentages between miner and the three weight sets
    fn split(
        &mut self,
        total: Coin,
        authors: &[RewardWeight],
        channels: &[RewardWeight],
        storages: &[RewardWeight],
    ) -> Result<(), RewardError> {
        let [miner, author, channel, storage] = split_by_percentages(total, REWARD_SPLIT_PERCENT)?;
        self.credit(RewardType::Miner, self.miner, miner)?;
        self.distribute(RewardType::Author, authors, author)?;
        self.distribute(RewardType::Channel, channels, channel)?;
        self.distribute(RewardType::Storage, storages, storage)
    }

    fn into_rewards(self) -> Vec<Reward> {
        self.amounts
            .into_iter()
            .map(|((reward_type, to), amount)| Reward {
                to,
                amount,
                reward_type,
            })
            .collect()
    }
}

/// Compute one block's rewards and advance (or undo) its sponsorship step.
///
/// `state` must reflect the block's own transactions, which holds both
/// right after applying them and right before reverting them.
///
/// # Errors
/// Returns error on arithmetic failure or inconsistent sponsorship history
pub fn grant_rewards(
    state: &impl LedgerView,
    documents: &mut DocumentRegistry,
    signed_transactions: &[SignedTransaction],
    header: &BlockHeader,
    authority: &Address,
    mode: ApplyMode,
) -> Result<RewardOutcome, RewardError> {
    let mut channel_reports = Vec::new();
    let mut storage_reports = Vec::new();
    let mut cancels: Vec<(Id, crate::crypto::Hash)> = Vec::new();
    let mut book = RewardBook::new(*authority);

    for signed in signed_transactions {
        book.credit(RewardType::Miner, *authority, signed.transaction.fee)?;
        match &signed.transaction.action {
            Action::ServiceStatistics(report) => match state.node_type(&report.server_address) {
                Some(NodeType::Channel) => channel_reports.push(report),
                Some(NodeType::Storage) => storage_reports.push(report),
                None => {}
            },
            Action::CancelSponsorContentUnit(cancel) => {
                cancels.push((cancel.uri, cancel.transaction_hash));
            }
            _ => {}
        }
    }

    let stats = validate_statistics(&channel_reports, &storage_reports, documents)?;
    let emission = block_emission(header.block_number)?;
    book.split(emission, &stats.authors, &stats.channels, &stats.storages)?;

    let consume = |documents: &mut DocumentRegistry, unit: &Id| {
        let viewed = stats.unit_view_counts.get(unit).is_some_and(|views| *views > 0);
        documents.sponsored_content_unit_set_used(
            unit,
            header.block_number,
            header.time_signed,
            mode,
            SponsorOperation::Consume { viewed },
            false,
        )
    };
    let cancel = |documents: &mut DocumentRegistry, unit: &Id, transaction_hash| {
        documents.sponsored_content_unit_set_used(
            unit,
            header.block_number,
            header.time_signed,
            mode,
            SponsorOperation::Cancel { transaction_hash },
            false,
        )
    };

    let mut settlements: Vec<(Id, SponsorSettlement)> = Vec::new();
    match mode {
        ApplyMode::Apply => {
            for unit in documents.sponsored_units() {
                settlements.push((unit, consume(documents, &unit)?));
            }
            for (unit, transaction_hash) in &cancels {
                settlements.push((*unit, cancel(documents, unit, *transaction_hash)?));
            }
        }
        ApplyMode::Revert => {
            for (unit, transaction_hash) in cancels.iter().rev() {
                settlements.push((*unit, cancel(documents, unit, *transaction_hash)?));
            }
            for unit in documents.sponsored_units() {
                settlements.push((unit, consume(documents, &unit)?));
            }
        }
    }

    let mut unit_sponsor_applied: BTreeMap<Id, Coin> = BTreeMap::new();
    for (unit, settlement) in settlements {
        for (sponsor, refund) in settlement.refunds {
            book.credit(RewardType::SponsoredReturn, sponsor, refund)?;
        }
        if settlement.to_unit.is_zero() {
            continue;
        }
        let applied = unit_sponsor_applied.entry(unit).or_default();
        *applied = applied.checked_add(settlement.to_unit)?;
        let weights = stats.units.get(&unit).cloned().unwrap_or_default();
        book.split(
            settlement.to_unit,
            &weights.authors,
            &weights.channels,
            &weights.storages,
        )?;
    }

    let rewards = book.into_rewards();
    trace!(
        block = header.block_number,
        rewards = rewards.len(),
        ?mode,
        "rewards granted"
    );
    Ok(RewardOutcome {
        rewards,
        unit_view_counts: stats.unit_view_counts,
        unit_sponsor_applied,
    })
}

/// Element-wise comparison of claimed and recomputed rewards
///
/// # Errors
/// Returns [`RewardError::Mismatch`] at the first differing position
pub fn compare_rewards(claimed: &[Reward], computed: &[Reward]) -> Result<(), RewardError> {
    let length = claimed.len().max(computed.len());
    for index in 0..length {
        let (a, b) = (claimed.get(index), computed.get(index));
        if a != b {
            return Err(RewardError::Mismatch {
                index,
                claimed: a.cloned(),
                computed: b.cloned(),
            });
        }
    }
    Ok(())
}

/// Recompute a block's rewards on a scratch copy of the registry and
/// compare them with the list the block claims
///
/// # Errors
/// Returns error if the recomputation fails or the lists differ
pub fn check_rewards(
    state: &impl LedgerView,
    documents: &DocumentRegistry,
    signed_block: &SignedBlock,
    mode: ApplyMode,
) -> Result<RewardOutcome, RewardError> {
    let mut scratch = documents.clone();
    let outcome = grant_rewards(
        state,
        &mut scratch,
        &signed_block.block.signed_transactions,
        signed_block.header(),
        &signed_block.signer,
        mode,
    )?;
    compare_rewards(&signed_block.block.rewards, &outcome.rewards)?;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{hash_data, Hash};
    use crate::documents::{FileRecord, SponsorshipItem, UnitRecord};
    use crate::state::LedgerState;
    use crate::types::{ServiceStatistics, ServiceStatisticsCount, ServiceStatisticsFile, Transaction};

    fn address(n: u8) -> Address {
        Address::from_bytes([n; 32])
    }

    fn header(number: u64) -> BlockHeader {
        BlockHeader {
            block_number: number,
            delta: 1,
            c_const: 1,
            c_sum: number,
            prev_hash: Hash::ZERO,
            time_signed: i64::try_from(number).unwrap() * 600,
        }
    }

    fn total(rewards: &[Reward]) -> Coin {
        rewards
            .iter()
            .try_fold(Coin::ZERO, |acc, r| acc.checked_add(r.amount))
            .unwrap()
    }

    #[test]
    fn test_empty_block_pays_emission_to_miner() {
        let state = LedgerState::default();
        let mut documents = DocumentRegistry::default();
        let outcome =
            grant_rewards(&state, &mut documents, &[], &header(1), &address(1), ApplyMode::Apply)
                .unwrap();
        assert_eq!(
            outcome.rewards,
            vec![Reward {
                to: address(1),
                amount: Coin::from_whole(1000),
                reward_type: RewardType::Miner,
            }]
        );
    }

    fn statistics_tx(server: Address, peer: Address, unit: Id, file: Id, count: u64) -> SignedTransaction {
        SignedTransaction::unsigned(Transaction {
            action: Action::ServiceStatistics(ServiceStatistics {
                server_address: server,
                block_number: 1,
                file_items: vec![ServiceStatisticsFile {
                    file_uri: file,
                    unit_uri: unit,
                    count_items: vec![ServiceStatisticsCount {
                        peer_address: peer,
                        count,
                    }],
                }],
            }),
            fee: Coin::new(0, 500).unwrap(),
            creation_time: 0,
            expiry_time: 600,
        })
    }

    fn populated() -> (LedgerState, DocumentRegistry, Id, Vec<SignedTransaction>) {
        let mut state = LedgerState::default();
        let (channel, storage) = (address(20), address(30));
        state.insert_role(channel, NodeType::Channel).unwrap();
        state.insert_role(storage, NodeType::Storage).unwrap();

        let mut documents = DocumentRegistry::default();
        let (file, unit) = (hash_data(b"file"), hash_data(b"unit"));
        documents
            .insert_file(FileRecord {
                uri: file,
                authors: vec![address(10)],
            })
            .unwrap();
        documents
            .insert_unit(UnitRecord {
                uri: unit,
                content_id: 1,
                channel,
                authors: vec![address(10)],
                files: vec![file],
            })
            .unwrap();
        documents
            .add_sponsorship(
                unit,
                SponsorshipItem::new(hash_data(b"deposit"), address(40), Coin::from_whole(60), 0, 1),
            )
            .unwrap();

        let txs = vec![
            statistics_tx(channel, storage, unit, file, 10),
            statistics_tx(storage, channel, unit, file, 11),
        ];
        (state, documents, unit, txs)
    }

    #[test]
    fn test_usage_and_sponsorship_rewards() {
        let (state, mut documents, unit, txs) = populated();
        let outcome =
            grant_rewards(&state, &mut documents, &txs, &header(1), &address(1), ApplyMode::Apply)
                .unwrap();

        // emission 1000 + sponsorship 10 + fees
        let expected = Coin::from_whole(1010).checked_add(Coin::new(0, 1000).unwrap()).unwrap();
        assert_eq!(total(&outcome.rewards), expected);
        assert_eq!(outcome.unit_view_counts.get(&unit), Some(&10));
        assert_eq!(outcome.unit_sponsor_applied.get(&unit), Some(&Coin::from_whole(10)));

        let author = outcome
            .rewards
            .iter()
            .find(|r| r.reward_type == RewardType::Author)
            .unwrap();
        assert_eq!(author.to, address(10));
        assert_eq!(author.amount, Coin::from_whole(505));

        let mut sorted = outcome.rewards.clone();
        sorted.sort_by_key(|r| (r.reward_type, r.to));
        assert_eq!(sorted, outcome.rewards);
    }

    #[test]
    fn test_apply_revert_apply_reproduces_rewards() {
        let (state, mut documents, _, txs) = populated();
        let before = documents.sponsorship(&hash_data(b"unit")).cloned();

        let applied =
            grant_rewards(&state, &mut documents, &txs, &header(1), &address(1), ApplyMode::Apply)
                .unwrap();
        let reverted =
            grant_rewards(&state, &mut documents, &txs, &header(1), &address(1), ApplyMode::Revert)
                .unwrap();
        assert_eq!(applied, reverted);
        assert_eq!(documents.sponsorship(&hash_data(b"unit")).cloned(), before);

        let again =
            grant_rewards(&state, &mut documents, &txs, &header(1), &address(1), ApplyMode::Apply)
                .unwrap();
        assert_eq!(applied, again);
    }

    #[test]
    fn test_check_rewards_detects_tampering() {
        let (state, documents, _, txs) = populated();
        let mut scratch = documents.clone();
        let outcome =
            grant_rewards(&state, &mut scratch, &txs, &header(1), &address(1), ApplyMode::Apply)
                .unwrap();

        let mut claimed = outcome.rewards.clone();
        assert!(compare_rewards(&claimed, &outcome.rewards).is_ok());
        claimed[0].amount = claimed[0].amount.checked_add(Coin::new(0, 1).unwrap()).unwrap();
        assert!(matches!(
            compare_rewards(&claimed, &outcome.rewards),
            Err(RewardError::Mismatch { index: 0, .. })
        ));
        claimed.pop();
        assert!(compare_rewards(&claimed, &outcome.rewards).is_err());
    }
}
