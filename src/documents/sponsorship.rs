//! Sponsorship book of a content unit.
//!
//! A sponsor deposits `amount` for `hours`; the deposit is released minute
//! by minute as blocks advance. `paid(m) = amount * m / (hours * 60)`, so
//! the whole deposit is released exactly when the last minute is consumed.
//! Minutes released while nobody viewed the unit are held back in
//! `unspent` and returned to the sponsor at expiry.

use serde::{Deserialize, Serialize};

use super::DocumentError;
use crate::crypto::Hash;
use crate::types::{Address, ApplyMode, Coin, Timestamp};

/// Block-level consumption step, kept so the step can be undone exactly
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStep {
    /// Block that consumed the minutes
    pub block_number: u64,
    /// `minutes_used` before the step
    pub minutes_before: u64,
    /// `unspent` before the step
    pub unspent_before: Coin,
    /// Released amount
    pub released: Coin,
    /// Whether the released amount went to the unit's recipients
    pub viewed: bool,
    /// Amount returned to the sponsor at expiry
    pub refund: Coin,
}

/// Applied cancellation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelRecord {
    /// Block that carried the cancellation
    pub block_number: u64,
    /// Amount returned to the sponsor
    pub refund: Coin,
    /// `unspent` before the cancellation
    pub unspent_before: Coin,
}

/// One sponsor deposit
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SponsorshipItem {
    /// Hash of the sponsoring transaction
    pub transaction_hash: Hash,
    /// Paying sponsor
    pub sponsor: Address,
    /// Deposit
    pub amount: Coin,
    /// First sponsored second
    pub start_time: Timestamp,
    /// Last sponsored second
    pub end_time: Timestamp,
    /// Minutes already released
    pub minutes_used: u64,
    /// Released while unviewed, owed back to the sponsor
    pub unspent: Coin,
    /// Hash of a pending cancellation transaction
    pub cancel_requested: Option<Hash>,
    /// Set once the cancellation is settled by a block
    pub cancelled: Option<CancelRecord>,
    /// Consumption steps, oldest first
    pub history: Vec<UsageStep>,
}

impl SponsorshipItem {
    /// New deposit with nothing consumed yet
    #[must_use]
    pub fn new(
        transaction_hash: Hash,
        sponsor: Address,
        amount: Coin,
        start_time: Timestamp,
        hours: u64,
    ) -> Self {
        let seconds = i64::try_from(hours.saturating_mul(3_600)).unwrap_or(i64::MAX);
        Self {
            transaction_hash,
            sponsor,
            amount,
            start_time,
            end_time: start_time.saturating_add(seconds),
            minutes_used: 0,
            unspent: Coin::ZERO,
            cancel_requested: None,
            cancelled: None,
            history: Vec::new(),
        }
    }

    /// Sponsored duration in minutes
    #[must_use]
    pub fn total_minutes(&self) -> u64 {
        u64::try_from((self.end_time - self.start_time) / 60).unwrap_or(0)
    }

    /// Amount released after `minutes` minutes
    ///
    /// # Errors
    /// Returns error on arithmetic overflow
    pub fn paid(&self, minutes: u64) -> Result<Coin, DocumentError> {
        let total = self.total_minutes();
        if total == 0 {
            return Ok(self.amount);
        }
        Ok(self
            .amount
            .mul_div(u128::from(minutes.min(total)), u128::from(total))?)
    }

    /// Whether every minute has been released or the item was cancelled
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.cancelled.is_some() || self.minutes_used >= self.total_minutes()
    }
}

/// What a sponsorship step pays out
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SponsorSettlement {
    /// Released to the unit's recipients
    pub to_unit: Coin,
    /// Returned to sponsors
    pub refunds: Vec<(Address, Coin)>,
}

impl SponsorSettlement {
    fn add_refund(&mut self, sponsor: Address, amount: Coin) {
        if !amount.is_zero() {
            self.refunds.push((sponsor, amount));
        }
    }
}

/// What to do with a unit's sponsorships
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SponsorOperation {
    /// Release the minutes elapsed up to the block time
    Consume {
        /// Whether the unit had verified views in the block
        viewed: bool,
    },
    /// Settle a requested cancellation
    Cancel {
        /// Hash of the sponsoring transaction
        transaction_hash: Hash,
    },
}

/// Deposits on one content unit, sorted by start time
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SponsorshipRecord {
    /// Deposits
    pub items: Vec<SponsorshipItem>,
}

impl SponsorshipRecord {
    /// Insert keeping the start-time order
    pub fn insert(&mut self, item: SponsorshipItem) {
        let position = self
            .items
            .partition_point(|existing| existing.start_time <= item.start_time);
        self.items.insert(position, item);
    }

    /// Find a deposit by its transaction hash
    #[must_use]
    pub fn find(&self, transaction_hash: &Hash) -> Option<&SponsorshipItem> {
        self.items
            .iter()
            .find(|item| item.transaction_hash == *transaction_hash)
    }

    pub(super) fn find_mut(&mut self, transaction_hash: &Hash) -> Option<&mut SponsorshipItem> {
        self.items
            .iter_mut()
            .find(|item| item.transaction_hash == *transaction_hash)
    }

    /// Advance or undo every deposit for one block
    pub(super) fn consume(
        &mut self,
        block_number: u64,
        block_time: Timestamp,
        mode: ApplyMode,
        viewed: bool,
    ) -> Result<SponsorSettlement, DocumentError> {
        let mut settlement = SponsorSettlement::default();
        for item in &mut self.items {
            match mode {
                ApplyMode::Apply => {
                    if item.is_finished() || block_time < item.start_time {
                        continue;
                    }
                    let elapsed = u64::try_from((block_time - item.start_time) / 60).unwrap_or(0);
                    let after = elapsed.min(item.total_minutes());
                    if after <= item.minutes_used && after < item.total_minutes() {
                        continue;
                    }
                    let released = item.paid(after)?.checked_sub(item.paid(item.minutes_used)?)?;
                    let mut step = UsageStep {
                        block_number,
                        minutes_before: item.minutes_used,
                        unspent_before: item.unspent,
                        released,
                        viewed,
                        refund: Coin::ZERO,
                    };
                    if viewed {
                        settlement.to_unit = settlement.to_unit.checked_add(released)?;
                    } else {
                        item.unspent = item.unspent.checked_add(released)?;
                    }
                    item.minutes_used = after;
                    if after >= item.total_minutes() {
                        step.refund = item.unspent;
                        settlement.add_refund(item.sponsor, item.unspent);
                        item.unspent = Coin::ZERO;
                    }
                    item.history.push(step);
                }
                ApplyMode::Revert => {
                    let is_this_block = item
                        .history
                        .last()
                        .is_some_and(|step| step.block_number == block_number);
                    if !is_this_block {
                        continue;
                    }
                    let Some(step) = item.history.pop() else {
                        continue;
                    };
                    if step.viewed != viewed {
                        return Err(DocumentError::HistoryMismatch {
                            block_number,
                            reason: "view flag differs from the applied step".to_string(),
                        });
                    }
                    if step.viewed {
                        settlement.to_unit = settlement.to_unit.checked_add(step.released)?;
                    }
                    settlement.add_refund(item.sponsor, step.refund);
                    item.minutes_used = step.minutes_before;
                    item.unspent = step.unspent_before;
                }
            }
        }
        Ok(settlement)
    }

    /// Settle or undo the cancellation of one deposit
    pub(super) fn cancel(
        &mut self,
        block_number: u64,
        transaction_hash: &Hash,
        mode: ApplyMode,
    ) -> Result<SponsorSettlement, DocumentError> {
        let item = self
            .find_mut(transaction_hash)
            .ok_or(DocumentError::SponsorshipNotFound(*transaction_hash))?;
        let mut settlement = SponsorSettlement::default();
        match mode {
            ApplyMode::Apply => {
                if item.cancelled.is_some() {
                    return Err(DocumentError::AlreadyCancelled(*transaction_hash));
                }
                if item.cancel_requested.is_none() {
                    return Err(DocumentError::CancelNotRequested(*transaction_hash));
                }
                let refund = item
                    .amount
                    .checked_sub(item.paid(item.minutes_used)?)?
                    .checked_add(item.unspent)?;
                item.cancelled = Some(CancelRecord {
                    block_number,
                    refund,
                    unspent_before: item.unspent,
                });
                item.unspent = Coin::ZERO;
                settlement.add_refund(item.sponsor, refund);
            }
            ApplyMode::Revert => {
                let record = match item.cancelled.take() {
                    Some(record) if record.block_number == block_number => record,
                    other => {
                        item.cancelled = other;
                        return Err(DocumentError::HistoryMismatch {
                            block_number,
                            reason: format!("no cancellation of {transaction_hash} in this block"),
                        });
                    }
                };
                item.unspent = record.unspent_before;
                settlement.add_refund(item.sponsor, record.refund);
            }
        }
        Ok(settlement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash_data;

    fn record(amount: u64, hours: u64) -> SponsorshipRecord {
        let mut record = SponsorshipRecord::default();
        record.insert(SponsorshipItem::new(
            hash_data(b"sponsor"),
            Address::from_bytes([7; 32]),
            Coin::from_whole(amount),
            0,
            hours,
        ));
        record
    }

    #[test]
    fn test_viewed_minutes_are_released_proportionally() {
        let mut book = record(60, 1);
        let settlement = book.consume(1, 600, ApplyMode::Apply, true).unwrap();
        assert_eq!(settlement.to_unit, Coin::from_whole(10));
        assert!(settlement.refunds.is_empty());
        assert_eq!(book.items[0].minutes_used, 10);
    }

    #[test]
    fn test_unviewed_minutes_are_refunded_at_expiry() {
        let mut book = record(60, 1);
        let mut to_unit = Coin::ZERO;
        let mut refunds = Vec::new();
        for (number, viewed) in (1..=6).zip([true, false, true, false, false, true]) {
            let settlement = book
                .consume(number, i64::try_from(number).unwrap() * 600, ApplyMode::Apply, viewed)
                .unwrap();
            to_unit = to_unit.checked_add(settlement.to_unit).unwrap();
            refunds.extend(settlement.refunds);
        }
        assert_eq!(to_unit, Coin::from_whole(30));
        assert_eq!(refunds, vec![(Address::from_bytes([7; 32]), Coin::from_whole(30))]);
        assert!(book.items[0].is_finished());

        let settlement = book.consume(7, 4_200, ApplyMode::Apply, true).unwrap();
        assert_eq!(settlement, SponsorSettlement::default());
    }

    #[test]
    fn test_revert_restores_previous_step() {
        let mut book = record(60, 1);
        book.consume(1, 600, ApplyMode::Apply, false).unwrap();
        let before = book.clone();
        let applied = book.consume(2, 1_200, ApplyMode::Apply, true).unwrap();
        let reverted = book.consume(2, 1_200, ApplyMode::Revert, true).unwrap();
        assert_eq!(applied, reverted);
        assert_eq!(book, before);
    }

    #[test]
    fn test_cancel_returns_unreleased_and_unspent() {
        let mut book = record(60, 1);
        let hash = hash_data(b"sponsor");
        book.consume(1, 600, ApplyMode::Apply, false).unwrap();
        book.consume(2, 1_200, ApplyMode::Apply, true).unwrap();

        assert!(matches!(
            book.cancel(3, &hash, ApplyMode::Apply),
            Err(DocumentError::CancelNotRequested(_))
        ));
        book.find_mut(&hash).unwrap().cancel_requested = Some(hash_data(b"cancel"));
        let before = book.clone();

        let settlement = book.cancel(3, &hash, ApplyMode::Apply).unwrap();
        // 40 never released plus 10 released while unviewed
        assert_eq!(settlement.refunds[0].1, Coin::from_whole(50));
        assert!(book.items[0].is_finished());
        assert!(book.cancel(3, &hash, ApplyMode::Apply).is_err());

        book.cancel(3, &hash, ApplyMode::Revert).unwrap();
        assert_eq!(book, before);
    }

    #[test]
    fn test_items_sorted_by_start_time() {
        let mut book = SponsorshipRecord::default();
        let sponsor = Address::from_bytes([1; 32]);
        for (seed, start) in [(b"a", 300), (b"b", 100), (b"c", 200)] {
            book.insert(SponsorshipItem::new(hash_data(seed), sponsor, Coin::from_whole(1), start, 1));
        }
        let starts: Vec<_> = book.items.iter().map(|item| item.start_time).collect();
        assert_eq!(starts, vec![100, 200, 300]);
    }
}
