//! The node's consensus state and its chain-mutating primitives.
//!
//! [`Ledger`] owns every store. All multi-step mutations run inside
//! [`Ledger::with_transaction`], which persists and commits on success and
//! discards every store's staged changes on error or panic, so a failed
//! operation leaves no half-applied state behind.

use std::collections::{BTreeMap, BTreeSet};
use std::panic::{self, AssertUnwindSafe};

use thiserror::Error;
use tracing::{debug, info, warn};

use super::transaction::{signed_transaction_validate, TransactionError};
use crate::action_log::{ActionLog, ActionLogError};
use crate::chain::{ChainError, ChainStore};
use crate::consensus::{calc_delta, check_delta_vector, check_headers, ConsensusParams};
use crate::crypto::{CryptoError, Hash};
use crate::documents::{DocumentError, DocumentRegistry};
use crate::mempool::{PoolError, TransactionCache, TransactionPool};
use crate::params::{
    BLOCK_MAX_TRANSACTIONS, MINE_AMOUNT_THRESHOLD, NODES_TIME_SHIFT,
    TRANSACTION_MAX_LIFETIME_HOURS,
};
use crate::state::{LedgerState, StateError, StateLayer};
use crate::storage::{StagedMap, StagedVec, StorageError, StorageResult, Transactional};
use crate::tokenomics::{check_rewards, compare_rewards, grant_rewards, RewardError, RewardOutcome};
use crate::types::{
    Action, Address, ApplyMode, BlockHeader, BlockHeaderExtended, CoinError, RewardType,
    SignedBlock, SignedTransaction, Timestamp,
};

/// Ledger errors
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Persistence failure
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// Block store failure
    #[error(transparent)]
    Chain(#[from] ChainError),
    /// Balance or role failure
    #[error(transparent)]
    State(#[from] StateError),
    /// Document registry failure
    #[error(transparent)]
    Document(#[from] DocumentError),
    /// Reward computation failure
    #[error(transparent)]
    Reward(#[from] RewardError),
    /// Action log failure
    #[error(transparent)]
    ActionLog(#[from] ActionLogError),
    /// Pool failure
    #[error(transparent)]
    Pool(#[from] PoolError),
    /// Rejected transaction
    #[error(transparent)]
    Transaction(#[from] TransactionError),
    /// Hashing or signature failure
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    /// Arithmetic failure
    #[error(transparent)]
    Coin(#[from] CoinError),
    /// Genesis block unacceptable
    #[error("invalid genesis: {0}")]
    Genesis(String),
    /// Block fails validation
    #[error("block {number} rejected: {reason}")]
    BlockRejected {
        /// Height of the block
        number: u64,
        /// What is wrong
        reason: String,
    },
    /// Chain operation attempted with a non-empty pool
    #[error("transaction pool must be reverted before chain operations")]
    PoolNotReverted,
}

impl LedgerError {
    fn rejected(number: u64, reason: impl Into<String>) -> Self {
        Self::BlockRejected {
            number,
            reason: reason.into(),
        }
    }
}

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Chain, balances, documents, pool, action log and replay cache
#[derive(Clone, Debug, Default)]
pub struct Ledger {
    pub(super) chain: ChainStore,
    pub(super) state: LedgerState,
    pub(super) documents: DocumentRegistry,
    pub(super) pool: TransactionPool,
    pub(super) action_log: ActionLog,
    pub(super) cache: TransactionCache,
    params: ConsensusParams,
}

impl Ledger {
    /// Purely in-memory ledger
    #[must_use]
    pub fn in_memory(params: ConsensusParams) -> Self {
        Self {
            action_log: ActionLog::new(StagedVec::in_memory(), true),
            params,
            ..Self::default()
        }
    }

    /// Ledger persisted in `db`, one tree per store.
    ///
    /// The replay cache is rebuilt from the chain tail and the pool.
    ///
    /// # Errors
    /// Returns error if a tree cannot be opened or decoded
    pub fn open(db: &sled::Db, params: ConsensusParams) -> LedgerResult<Self> {
        let tree = |name: &str| db.open_tree(name).map_err(StorageError::from);
        let mut ledger = Self {
            chain: ChainStore::new(
                StagedVec::open(tree("blocks")?)?,
                StagedVec::open(tree("headers")?)?,
            ),
            state: LedgerState::new(
                StagedMap::open(tree("accounts")?)?,
                StagedMap::open(tree("pool_balances")?)?,
                StagedMap::open(tree("roles")?)?,
            ),
            documents: DocumentRegistry::new(
                StagedMap::open(tree("files")?)?,
                StagedMap::open(tree("units")?)?,
                StagedMap::open(tree("sponsorships")?)?,
            ),
            pool: TransactionPool::new(StagedVec::open(tree("pool")?)?),
            action_log: ActionLog::new(StagedVec::open(tree("action_log")?)?, true),
            cache: TransactionCache::new(),
            params,
        };
        ledger.reseed_cache()?;
        let pooled: Vec<(Hash, Timestamp)> = ledger
            .pool
            .iter()
            .map(|tx| -> Result<_, CryptoError> { Ok((tx.hash()?, tx.transaction.expiry_time)) })
            .collect::<Result<_, _>>()?;
        for (hash, expiry) in pooled {
            ledger.cache.add_pool(hash, expiry);
        }
        ledger.cache.commit();
        Ok(ledger)
    }

    /// Consensus parameters
    #[must_use]
    pub const fn params(&self) -> &ConsensusParams {
        &self.params
    }

    /// Block store
    #[must_use]
    pub const fn chain(&self) -> &ChainStore {
        &self.chain
    }

    /// Balances and roles
    #[must_use]
    pub const fn state(&self) -> &LedgerState {
        &self.state
    }

    /// Files, units and sponsorships
    #[must_use]
    pub const fn documents(&self) -> &DocumentRegistry {
        &self.documents
    }

    /// Pending transactions
    #[must_use]
    pub const fn pool(&self) -> &TransactionPool {
        &self.pool
    }

    /// Audit log
    #[must_use]
    pub const fn action_log(&self) -> &ActionLog {
        &self.action_log
    }

    /// Replay cache
    #[must_use]
    pub const fn cache(&self) -> &TransactionCache {
        &self.cache
    }

    /// Run `f` as one unit: save and commit on `Ok`, discard on `Err` or
    /// panic (the panic is resumed after the discard)
    ///
    /// # Errors
    /// Returns the closure's error, or a storage error if saving fails
    pub fn with_transaction<T, E, F>(&mut self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Self) -> Result<T, E>,
        E: From<StorageError>,
    {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(self)));
        match outcome {
            Ok(Ok(value)) => match self.save() {
                Ok(()) => {
                    self.commit();
                    Ok(value)
                }
                Err(error) => {
                    self.discard();
                    Err(error.into())
                }
            },
            Ok(Err(error)) => {
                self.discard();
                Err(error)
            }
            Err(payload) => {
                self.discard();
                panic::resume_unwind(payload)
            }
        }
    }

    /// Header of the tip
    ///
    /// # Errors
    /// Returns error if there is no genesis yet
    pub fn tip(&self) -> LedgerResult<BlockHeaderExtended> {
        Ok(self.chain.last_header()?.clone())
    }

    /// `(delta, c_const)` of up to `delta_step` blocks below height `next`
    ///
    /// # Errors
    /// Returns error if a header is missing
    pub fn delta_window(&self, next: u64) -> LedgerResult<Vec<(u64, u64)>> {
        let start = next.saturating_sub(self.params.delta_step as u64);
        (start..next)
            .map(|number| -> LedgerResult<(u64, u64)> {
                let header = &self.chain.header_at(number)?.header;
                Ok((header.delta, header.c_const))
            })
            .collect()
    }

    /// Accept the genesis block, or check that it matches the installed one
    ///
    /// # Errors
    /// Returns error if the block is not a valid genesis or differs from
    /// the stored one
    pub fn insert_genesis(&mut self, signed_genesis: &SignedBlock) -> LedgerResult<()> {
        if self.chain.length() > 0 {
            let installed = self.chain.header_at(0)?.block_hash;
            if installed != signed_genesis.block.hash()? {
                return Err(LedgerError::Genesis(format!(
                    "store holds a different genesis {installed}"
                )));
            }
            return Ok(());
        }
        let header = signed_genesis.header();
        if header.block_number != 0
            || header.prev_hash != Hash::ZERO
            || header.c_const != 1
            || header.delta != 0
            || header.c_sum != 0
        {
            return Err(LedgerError::Genesis("malformed header".to_string()));
        }
        if !signed_genesis.block.signed_transactions.is_empty() {
            return Err(LedgerError::Genesis("genesis carries transactions".to_string()));
        }
        if signed_genesis
            .block
            .rewards
            .iter()
            .any(|reward| reward.reward_type != RewardType::Initial)
        {
            return Err(LedgerError::Genesis("non-initial reward".to_string()));
        }
        signed_genesis.verify_signature()?;

        self.with_transaction(|ledger| {
            for reward in &signed_genesis.block.rewards {
                ledger
                    .state
                    .increase_balance(&reward.to, reward.amount, StateLayer::Chain)?;
            }
            let hash = ledger.chain.insert(signed_genesis.clone())?;
            ledger
                .action_log
                .log_block(signed_genesis, BTreeMap::new(), BTreeMap::new())?;
            info!(hash = %hash, "genesis installed");
            Ok(())
        })
    }

    /// Validate, apply and append a block received from a peer.
    ///
    /// Re-derives the block's delta from the signer's chain balance before
    /// the block, the expected `c_const` from the local window, and the
    /// reward list from the block's contents. The pool must be reverted.
    ///
    /// # Errors
    /// Returns [`LedgerError::BlockRejected`] for an invalid block; other
    /// variants for local failures. The caller must discard on error.
    pub fn apply_block_chain(&mut self, signed_block: &SignedBlock) -> LedgerResult<Hash> {
        if !self.pool.is_empty() {
            return Err(LedgerError::PoolNotReverted);
        }
        let header = signed_block.header();
        let number = header.block_number;
        let tip = self.tip()?;
        if check_headers(header, &tip.header) {
            return Err(LedgerError::rejected(number, "header does not follow the tip"));
        }
        if header.prev_hash != tip.block_hash {
            return Err(LedgerError::rejected(number, "previous hash mismatch"));
        }
        if signed_block.verify_signature().is_err() {
            return Err(LedgerError::rejected(number, "bad block signature"));
        }
        if signed_block.block.signed_transactions.len() > BLOCK_MAX_TRANSACTIONS {
            return Err(LedgerError::rejected(number, "too many transactions"));
        }

        let balance = self
            .state
            .get_balance(&signed_block.signer, StateLayer::Chain);
        if balance < MINE_AMOUNT_THRESHOLD {
            return Err(LedgerError::rejected(number, "signer stake below mining threshold"));
        }
        let delta = calc_delta(
            &signed_block.signer,
            balance,
            &tip.block_hash,
            header.c_const,
            &self.params,
        );
        if delta != header.delta {
            return Err(LedgerError::rejected(
                number,
                format!("delta {} differs from derived {delta}", header.delta),
            ));
        }
        let (expected_c_const, window_error) =
            check_delta_vector(&self.delta_window(number)?, &self.params);
        if !window_error.is_empty() || expected_c_const != header.c_const {
            return Err(LedgerError::rejected(
                number,
                format!(
                    "c_const {} expected {expected_c_const} {window_error}",
                    header.c_const
                ),
            ));
        }

        self.check_block_transactions(signed_block)?;
        for signed in &signed_block.block.signed_transactions {
            self.include_transaction(signed)
                .map_err(|error| LedgerError::rejected(number, error.to_string()))?;
        }

        let outcome = check_rewards(&self.state, &self.documents, signed_block, ApplyMode::Apply)
            .map_err(|error| LedgerError::rejected(number, error.to_string()))?;
        let granted = self.grant_block_rewards(
            &signed_block.block.signed_transactions,
            header,
            &signed_block.signer,
        )?;
        compare_rewards(&outcome.rewards, &granted.rewards)?;
        self.append_block(signed_block, granted)
    }

    /// Apply a transaction to the chain layer as part of the block being
    /// built and remember it for replay protection
    ///
    /// # Errors
    /// Returns the reason the transaction cannot be applied; nothing is
    /// changed then
    pub fn include_transaction(&mut self, signed: &SignedTransaction) -> LedgerResult<()> {
        let hash = signed.hash()?;
        self.apply_transaction(signed, StateLayer::Chain)?;
        self.cache.add_chain(hash, signed.transaction.expiry_time);
        Ok(())
    }

    /// Stateless checks on a block's transaction list
    fn check_block_transactions(&self, signed_block: &SignedBlock) -> LedgerResult<()> {
        let header = signed_block.header();
        let number = header.block_number;
        let mut previous_time = Timestamp::MIN;
        let mut reporters = BTreeSet::new();
        let mut seen = BTreeSet::new();
        for signed in &signed_block.block.signed_transactions {
            if signed.transaction.creation_time < previous_time {
                return Err(LedgerError::rejected(number, "transactions out of time order"));
            }
            previous_time = signed.transaction.creation_time;
            if signed.transaction.creation_time > header.time_signed {
                return Err(LedgerError::rejected(number, "transaction created after the block"));
            }
            signed_transaction_validate(signed, header.time_signed)
                .map_err(|error| LedgerError::rejected(number, error.to_string()))?;
            if !signed.is_complete() {
                return Err(LedgerError::rejected(number, "incomplete transaction"));
            }
            let hash = signed.hash()?;
            if self.cache.in_chain(&hash) || !seen.insert(hash) {
                return Err(LedgerError::rejected(number, "replayed transaction"));
            }
            if let Action::ServiceStatistics(report) = &signed.transaction.action {
                if report.block_number != number {
                    return Err(LedgerError::rejected(number, "statistics for another block"));
                }
                if !reporters.insert(report.server_address) {
                    return Err(LedgerError::rejected(number, "duplicate statistics report"));
                }
            }
        }
        Ok(())
    }

    /// Compute the rewards of a block whose transactions are applied and
    /// credit them on the chain layer
    ///
    /// # Errors
    /// Returns error if the reward computation or a credit fails
    pub fn grant_block_rewards(
        &mut self,
        signed_transactions: &[SignedTransaction],
        header: &BlockHeader,
        authority: &Address,
    ) -> LedgerResult<RewardOutcome> {
        let outcome = grant_rewards(
            &self.state,
            &mut self.documents,
            signed_transactions,
            header,
            authority,
            ApplyMode::Apply,
        )?;
        for reward in &outcome.rewards {
            self.state
                .increase_balance(&reward.to, reward.amount, StateLayer::Chain)?;
        }
        Ok(outcome)
    }

    /// Append a block whose transactions and rewards are applied
    ///
    /// # Errors
    /// Returns error if the block does not follow the tip or cannot be logged
    pub fn append_block(
        &mut self,
        signed_block: &SignedBlock,
        outcome: RewardOutcome,
    ) -> LedgerResult<Hash> {
        let hash = self.chain.insert(signed_block.clone())?;
        self.action_log.log_block(
            signed_block,
            outcome.unit_view_counts,
            outcome.unit_sponsor_applied,
        )?;
        self.cache.clean(signed_block.header().time_signed);
        debug!(
            height = signed_block.header().block_number,
            hash = %hash,
            transactions = signed_block.block.signed_transactions.len(),
            "block appended"
        );
        Ok(hash)
    }

    /// Undo the tip block: rewards, transactions, store and log.
    ///
    /// The pool must be reverted. Genesis cannot be reverted.
    ///
    /// # Errors
    /// Returns error if the recomputed rewards do not match the block or a
    /// debit fails; the caller must discard on error
    pub fn revert_last_block(&mut self) -> LedgerResult<SignedBlock> {
        if !self.pool.is_empty() {
            return Err(LedgerError::PoolNotReverted);
        }
        let signed_block = self.chain.last_block()?.clone();
        let header = signed_block.header();
        if header.block_number == 0 {
            return Err(LedgerError::Genesis("genesis cannot be reverted".to_string()));
        }
        let outcome = grant_rewards(
            &self.state,
            &mut self.documents,
            &signed_block.block.signed_transactions,
            header,
            &signed_block.signer,
            ApplyMode::Revert,
        )?;
        compare_rewards(&signed_block.block.rewards, &outcome.rewards)?;
        for reward in &outcome.rewards {
            self.state
                .decrease_balance(&reward.to, reward.amount, StateLayer::Chain)?;
        }
        for signed in signed_block.block.signed_transactions.iter().rev() {
            self.revert_transaction(signed, StateLayer::Chain)?;
            self.cache.erase_chain(&signed.hash()?);
        }
        self.chain.remove_last_block()?;
        self.action_log.revert()?;
        debug!(height = header.block_number, "block reverted");
        Ok(signed_block)
    }

    /// Rebuild the chain part of the replay cache from the blocks whose
    /// transactions could still be replayed
    ///
    /// # Errors
    /// Returns error if a block is missing or a hash cannot be computed
    pub fn reseed_cache(&mut self) -> LedgerResult<()> {
        self.cache.clear_chain();
        let Ok(tip) = self.chain.last_header() else {
            return Ok(());
        };
        let horizon =
            tip.header.time_signed - TRANSACTION_MAX_LIFETIME_HOURS * 3_600 - NODES_TIME_SHIFT;
        let mut number = tip.header.block_number;
        loop {
            let signed_block = self.chain.at(number)?;
            if signed_block.header().time_signed < horizon {
                break;
            }
            let entries: Vec<(Hash, Timestamp)> = signed_block
                .block
                .signed_transactions
                .iter()
                .map(|tx| -> Result<_, CryptoError> {
                    Ok((tx.hash()?, tx.transaction.expiry_time))
                })
                .collect::<Result<_, _>>()?;
            for (hash, expiry) in entries {
                self.cache.add_chain(hash, expiry);
            }
            if number == 0 {
                break;
            }
            number -= 1;
        }
        Ok(())
    }

    /// Validate a transaction and add it to the pool layer
    ///
    /// # Errors
    /// Returns error if the transaction is invalid, known, incomplete or
    /// cannot be applied to the pool layer
    pub fn pool_push(&mut self, signed: SignedTransaction, now: Timestamp) -> LedgerResult<Hash> {
        signed_transaction_validate(&signed, now)?;
        let hash = signed.hash()?;
        if self.cache.contains(&hash) {
            return Err(TransactionError::Duplicate(hash).into());
        }
        if !signed.is_complete() {
            return Err(TransactionError::Incomplete(hash).into());
        }
        // Nothing may touch the pool layer unless the entry will be kept
        if self.pool.is_full() {
            return Err(PoolError::Full.into());
        }
        if let Action::ServiceStatistics(report) = &signed.transaction.action {
            let already = self.pool.iter().any(|pooled| {
                matches!(&pooled.transaction.action, Action::ServiceStatistics(other)
                    if other.server_address == report.server_address
                        && other.block_number == report.block_number)
            });
            if already {
                return Err(TransactionError::WrongData(
                    "one statistics report per server and block".to_string(),
                )
                .into());
            }
        }
        self.apply_transaction(&signed, StateLayer::Pool)?;
        self.cache.add_pool(hash, signed.transaction.expiry_time);
        self.action_log.log_transaction(&signed);
        self.pool.push(signed)?;
        Ok(hash)
    }

    /// Revert the whole pool, newest first; returns the transactions oldest
    /// first
    ///
    /// # Errors
    /// Returns error if a pool entry cannot be reverted, which means the
    /// pool layer is corrupt
    pub fn revert_pool(&mut self) -> LedgerResult<Vec<SignedTransaction>> {
        let mut reverted = Vec::with_capacity(self.pool.length());
        while let Some(signed) = self.pool.pop() {
            self.revert_transaction(&signed, StateLayer::Pool)?;
            self.cache.erase_pool(&signed.hash()?);
            self.action_log.revert()?;
            reverted.push(signed);
        }
        reverted.reverse();
        Ok(reverted)
    }

    /// Push transactions back into the pool, dropping those that no longer
    /// apply; returns the number kept
    pub fn reapply_pool(&mut self, transactions: Vec<SignedTransaction>, now: Timestamp) -> usize {
        let mut kept = 0;
        for signed in transactions {
            match self.pool_push(signed, now) {
                Ok(_) => kept += 1,
                Err(error) => debug!(error = %error, "pool transaction dropped"),
            }
        }
        kept
    }

    /// Drop expired pool entries and re-apply the rest
    ///
    /// # Errors
    /// Returns error if the pool cannot be reverted
    pub fn clean_pool(&mut self, now: Timestamp) -> LedgerResult<usize> {
        let pending = self.revert_pool()?;
        let before = pending.len();
        let kept = self.reapply_pool(pending, now);
        if kept < before {
            warn!(dropped = before - kept, "expired pool transactions dropped");
        }
        self.cache.clean(now);
        Ok(kept)
    }
}

impl Transactional for Ledger {
    fn save(&mut self) -> StorageResult<()> {
        self.chain.save()?;
        self.state.save()?;
        self.documents.save()?;
        self.pool.save()?;
        self.action_log.save()?;
        self.cache.save()
    }

    fn commit(&mut self) {
        self.chain.commit();
        self.state.commit();
        self.documents.commit();
        self.pool.commit();
        self.action_log.commit();
        self.cache.commit();
    }

    fn discard(&mut self) {
        self.chain.discard();
        self.state.discard();
        self.documents.discard();
        self.pool.discard();
        self.action_log.discard();
        self.cache.discard();
    }

    fn clear(&mut self) {
        self.chain.clear();
        self.state.clear();
        self.documents.clear();
        self.pool.clear();
        self.action_log.clear();
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::BLOCK_MINE_DELAY;
    use crate::test_support::{address_of, genesis, keypair, ledger_with_genesis, transfer_tx};
    use crate::types::Coin;

    #[test]
    fn test_genesis_credits_initial_rewards() {
        let ledger = ledger_with_genesis(&[(1, 1_000)]);
        assert_eq!(ledger.chain().length(), 1);
        assert_eq!(
            ledger
                .state()
                .get_balance(&address_of(1), StateLayer::Chain),
            Coin::from_whole(1_000)
        );
        assert_eq!(ledger.action_log().length(), 1);
    }

    #[test]
    fn test_second_genesis_must_match() {
        let mut ledger = ledger_with_genesis(&[(1, 1_000)]);
        assert!(ledger.insert_genesis(&genesis(&[(1, 1_000)])).is_ok());
        assert!(matches!(
            ledger.insert_genesis(&genesis(&[(2, 1_000)])),
            Err(LedgerError::Genesis(_))
        ));
    }

    #[test]
    fn test_with_transaction_discards_on_error() {
        let mut ledger = ledger_with_genesis(&[(1, 1_000)]);
        let result: LedgerResult<()> = ledger.with_transaction(|ledger| {
            ledger.state.increase_balance(
                &address_of(2),
                Coin::from_whole(5),
                StateLayer::Chain,
            )?;
            Err(LedgerError::Genesis("abort".to_string()))
        });
        assert!(result.is_err());
        assert!(ledger
            .state()
            .get_balance(&address_of(2), StateLayer::Chain)
            .is_zero());
    }

    #[test]
    fn test_with_transaction_discards_on_panic() {
        let mut ledger = ledger_with_genesis(&[(1, 1_000)]);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let _: LedgerResult<()> = ledger.with_transaction(|ledger| {
                ledger
                    .state
                    .increase_balance(&address_of(2), Coin::from_whole(5), StateLayer::Chain)
                    .unwrap();
                panic!("boom");
            });
        }));
        assert!(outcome.is_err());
        assert!(ledger
            .state()
            .get_balance(&address_of(2), StateLayer::Chain)
            .is_zero());
    }

    #[test]
    fn test_pool_push_and_revert() {
        let mut ledger = ledger_with_genesis(&[(1, 1_000)]);
        let tx = transfer_tx(&keypair(1), &keypair(2), 10, BLOCK_MINE_DELAY);
        let hash = ledger.pool_push(tx.clone(), BLOCK_MINE_DELAY).unwrap();

        assert!(ledger.cache().contains(&hash));
        assert_eq!(
            ledger.state().get_balance(&address_of(2), StateLayer::Pool),
            Coin::from_whole(10)
        );
        assert!(matches!(
            ledger.pool_push(tx, BLOCK_MINE_DELAY),
            Err(LedgerError::Transaction(TransactionError::Duplicate(_)))
        ));

        let log_length = ledger.action_log().length();
        let reverted = ledger.revert_pool().unwrap();
        assert_eq!(reverted.len(), 1);
        assert!(ledger.state().pool_is_clear());
        assert!(!ledger.cache().contains(&hash));
        assert_eq!(ledger.action_log().length(), log_length + 1);
    }

    #[test]
    fn test_full_pool_leaves_no_trace() {
        let mut ledger = ledger_with_genesis(&[(1, 1_000)]);
        ledger.pool = std::mem::take(&mut ledger.pool).with_capacity_limit(1);
        let first = transfer_tx(&keypair(1), &keypair(2), 10, BLOCK_MINE_DELAY);
        let second = transfer_tx(&keypair(1), &keypair(3), 20, BLOCK_MINE_DELAY);
        let second_hash = second.hash().unwrap();
        let log_length = ledger.action_log().length();

        let kept = ledger.reapply_pool(vec![first, second], BLOCK_MINE_DELAY);
        assert_eq!(kept, 1);
        assert_eq!(ledger.pool().length(), 1);
        assert!(!ledger.cache().contains(&second_hash));
        assert_eq!(ledger.action_log().length(), log_length + 1);
        assert_eq!(
            ledger.state().get_balance(&address_of(3), StateLayer::Pool),
            Coin::ZERO
        );

        ledger.revert_pool().unwrap();
        assert!(ledger.state().pool_is_clear());
        assert_eq!(
            ledger.state().get_balance(&address_of(1), StateLayer::Pool),
            Coin::from_whole(1_000)
        );
    }

    #[test]
    fn test_chain_ops_require_reverted_pool() {
        let mut ledger = ledger_with_genesis(&[(1, 1_000)]);
        ledger
            .pool_push(transfer_tx(&keypair(1), &keypair(2), 1, 0), 0)
            .unwrap();
        assert!(matches!(
            ledger.revert_last_block(),
            Err(LedgerError::PoolNotReverted)
        ));
    }

    #[test]
    fn test_persisted_ledger_reopens() {
        let db = crate::storage::open_temporary().unwrap();
        {
            let mut ledger = Ledger::open(&db, ConsensusParams::default()).unwrap();
            ledger.insert_genesis(&genesis(&[(1, 1_000)])).unwrap();
        }
        let reopened = Ledger::open(&db, ConsensusParams::default()).unwrap();
        assert_eq!(reopened.chain().length(), 1);
        assert_eq!(
            reopened
                .state()
                .get_balance(&address_of(1), StateLayer::Chain),
            Coin::from_whole(1_000)
        );
    }
}
