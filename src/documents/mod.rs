//! Registry of files, content units and their sponsorships.
//!
//! The registry is single-layer: pending transactions write to it directly
//! and the node reverts the whole pool before any chain operation, so at
//! block time it only holds records confirmed on chain.

mod sponsorship;

pub use sponsorship::{
    CancelRecord, SponsorOperation, SponsorSettlement, SponsorshipItem, SponsorshipRecord,
    UsageStep,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::Hash;
use crate::storage::{StagedMap, StorageResult, Transactional};
use crate::types::{Address, ApplyMode, CoinError, Id, Timestamp};

/// Registered file
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Content hash
    pub uri: Id,
    /// Authors sharing the file's rewards
    pub authors: Vec<Address>,
}

/// Registered content unit
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitRecord {
    /// Unit identifier
    pub uri: Id,
    /// Channel-local content number
    pub content_id: u64,
    /// Publishing channel
    pub channel: Address,
    /// Unit authors
    pub authors: Vec<Address>,
    /// Files making up the unit
    pub files: Vec<Id>,
}

/// Document registry errors
#[derive(Debug, Error)]
pub enum DocumentError {
    /// URI taken
    #[error("uri {0} is already registered")]
    DuplicateUri(Id),
    /// Referenced file missing
    #[error("unknown file {0}")]
    UnknownFile(Id),
    /// Referenced unit missing
    #[error("unknown content unit {0}")]
    UnknownUnit(Id),
    /// Sponsorship missing
    #[error("no sponsorship created by transaction {0}")]
    SponsorshipNotFound(Hash),
    /// Sponsorship already recorded
    #[error("sponsorship {0} already recorded")]
    DuplicateSponsorship(Hash),
    /// Cancellation by someone else
    #[error("{address} did not sponsor {transaction_hash}")]
    WrongSponsor {
        /// Requesting address
        address: Address,
        /// Sponsoring transaction
        transaction_hash: Hash,
    },
    /// Cancellation pending or settled already
    #[error("sponsorship {0} is already cancelled")]
    AlreadyCancelled(Hash),
    /// Cancellation settled without a request
    #[error("no cancellation requested for sponsorship {0}")]
    CancelNotRequested(Hash),
    /// Sponsorship fully consumed
    #[error("sponsorship {0} has expired")]
    Expired(Hash),
    /// Undo does not match the recorded history
    #[error("sponsorship history mismatch at block {block_number}: {reason}")]
    HistoryMismatch {
        /// Block being reverted
        block_number: u64,
        /// What differs
        reason: String,
    },
    /// Arithmetic failure
    #[error(transparent)]
    Coin(#[from] CoinError),
}

/// Files, units and sponsorship books
#[derive(Clone, Debug, Default)]
pub struct DocumentRegistry {
    files: StagedMap<Id, FileRecord>,
    units: StagedMap<Id, UnitRecord>,
    sponsorships: StagedMap<Id, SponsorshipRecord>,
}

impl DocumentRegistry {
    /// Assemble from stores
    #[must_use]
    pub const fn new(
        files: StagedMap<Id, FileRecord>,
        units: StagedMap<Id, UnitRecord>,
        sponsorships: StagedMap<Id, SponsorshipRecord>,
    ) -> Self {
        Self {
            files,
            units,
            sponsorships,
        }
    }

    /// Registered file
    #[must_use]
    pub fn file(&self, uri: &Id) -> Option<&FileRecord> {
        self.files.get(uri)
    }

    /// Registered unit
    #[must_use]
    pub fn unit(&self, uri: &Id) -> Option<&UnitRecord> {
        self.units.get(uri)
    }

    /// Register a file
    ///
    /// # Errors
    /// Returns error if the URI is taken
    pub fn insert_file(&mut self, record: FileRecord) -> Result<(), DocumentError> {
        if self.files.contains_key(&record.uri) {
            return Err(DocumentError::DuplicateUri(record.uri));
        }
        self.files.insert(record.uri, record);
        Ok(())
    }

    /// Unregister a file
    ///
    /// # Errors
    /// Returns error if the file is unknown
    pub fn remove_file(&mut self, uri: &Id) -> Result<FileRecord, DocumentError> {
        self.files.remove(uri).ok_or(DocumentError::UnknownFile(*uri))
    }

    /// Register a unit whose files are all registered
    ///
    /// # Errors
    /// Returns error if the URI is taken or a file is unknown
    pub fn insert_unit(&mut self, record: UnitRecord) -> Result<(), DocumentError> {
        self.check_unit(&record)?;
        self.units.insert(record.uri, record);
        Ok(())
    }

    /// Check that a unit could be registered
    ///
    /// # Errors
    /// Returns error if the URI is taken or a file is unknown
    pub fn check_unit(&self, record: &UnitRecord) -> Result<(), DocumentError> {
        if self.units.contains_key(&record.uri) {
            return Err(DocumentError::DuplicateUri(record.uri));
        }
        if let Some(missing) = record.files.iter().find(|f| !self.files.contains_key(f)) {
            return Err(DocumentError::UnknownFile(*missing));
        }
        Ok(())
    }

    /// Unregister a unit
    ///
    /// # Errors
    /// Returns error if the unit is unknown
    pub fn remove_unit(&mut self, uri: &Id) -> Result<UnitRecord, DocumentError> {
        self.units.remove(uri).ok_or(DocumentError::UnknownUnit(*uri))
    }

    /// Sponsorship book of a unit
    #[must_use]
    pub fn sponsorship(&self, unit: &Id) -> Option<&SponsorshipRecord> {
        self.sponsorships.get(unit)
    }

    /// Units that have a sponsorship book
    #[must_use]
    pub fn sponsored_units(&self) -> Vec<Id> {
        self.sponsorships.iter().map(|(uri, _)| *uri).collect()
    }

    /// Record a new deposit on a registered unit
    ///
    /// # Errors
    /// Returns error if the unit is unknown or the deposit is recorded
    pub fn add_sponsorship(&mut self, unit: Id, item: SponsorshipItem) -> Result<(), DocumentError> {
        if !self.units.contains_key(&unit) {
            return Err(DocumentError::UnknownUnit(unit));
        }
        let mut record = self.sponsorships.get(&unit).cloned().unwrap_or_default();
        if record.find(&item.transaction_hash).is_some() {
            return Err(DocumentError::DuplicateSponsorship(item.transaction_hash));
        }
        record.insert(item);
        self.sponsorships.insert(unit, record);
        Ok(())
    }

    /// Drop a deposit, used when its transaction is reverted
    ///
    /// # Errors
    /// Returns error if the deposit is unknown
    pub fn remove_sponsorship(
        &mut self,
        unit: &Id,
        transaction_hash: &Hash,
    ) -> Result<SponsorshipItem, DocumentError> {
        let mut record = self
            .sponsorships
            .get(unit)
            .cloned()
            .ok_or(DocumentError::SponsorshipNotFound(*transaction_hash))?;
        let position = record
            .items
            .iter()
            .position(|item| item.transaction_hash == *transaction_hash)
            .ok_or(DocumentError::SponsorshipNotFound(*transaction_hash))?;
        let item = record.items.remove(position);
        if record.items.is_empty() {
            self.sponsorships.remove(unit);
        } else {
            self.sponsorships.insert(*unit, record);
        }
        Ok(item)
    }

    /// Mark a deposit for cancellation by the next block that carries the
    /// request, or withdraw the mark
    ///
    /// # Errors
    /// Returns error if the deposit is unknown, belongs to someone else or
    /// is finished
    pub fn set_cancel_request(
        &mut self,
        unit: &Id,
        transaction_hash: &Hash,
        sponsor: &Address,
        request: Option<Hash>,
        mode: ApplyMode,
    ) -> Result<(), DocumentError> {
        let record = self
            .sponsorships
            .get_mut(unit)
            .ok_or(DocumentError::SponsorshipNotFound(*transaction_hash))?;
        let item = record
            .find_mut(transaction_hash)
            .ok_or(DocumentError::SponsorshipNotFound(*transaction_hash))?;
        if item.sponsor != *sponsor {
            return Err(DocumentError::WrongSponsor {
                address: *sponsor,
                transaction_hash: *transaction_hash,
            });
        }
        match mode {
            ApplyMode::Apply => {
                if item.cancel_requested.is_some() || item.cancelled.is_some() {
                    return Err(DocumentError::AlreadyCancelled(*transaction_hash));
                }
                if item.is_finished() {
                    return Err(DocumentError::Expired(*transaction_hash));
                }
                item.cancel_requested = request;
            }
            ApplyMode::Revert => item.cancel_requested = None,
        }
        Ok(())
    }

    /// Check that a cancellation request would be accepted
    ///
    /// # Errors
    /// Same conditions as [`Self::set_cancel_request`]
    pub fn check_cancel_request(
        &self,
        unit: &Id,
        transaction_hash: &Hash,
        sponsor: &Address,
    ) -> Result<(), DocumentError> {
        let item = self
            .sponsorships
            .get(unit)
            .and_then(|record| record.find(transaction_hash))
            .ok_or(DocumentError::SponsorshipNotFound(*transaction_hash))?;
        if item.sponsor != *sponsor {
            return Err(DocumentError::WrongSponsor {
                address: *sponsor,
                transaction_hash: *transaction_hash,
            });
        }
        if item.cancel_requested.is_some() || item.cancelled.is_some() {
            return Err(DocumentError::AlreadyCancelled(*transaction_hash));
        }
        if item.is_finished() {
            return Err(DocumentError::Expired(*transaction_hash));
        }
        Ok(())
    }

    /// Run one block's sponsorship step on a unit.
    ///
    /// `Consume` releases the minutes elapsed up to `block_time` and
    /// returns expired unspent funds; `Cancel` settles a requested
    /// cancellation. With [`ApplyMode::Revert`] the step recorded for
    /// `block_number` is undone and the same settlement is returned, so the
    /// caller can reverse the credits. With `pretend` nothing is stored.
    ///
    /// # Errors
    /// Returns error if the unit has no book, the deposit is unknown, or the
    /// undo does not match history
    pub fn sponsored_content_unit_set_used(
        &mut self,
        unit: &Id,
        block_number: u64,
        block_time: Timestamp,
        mode: ApplyMode,
        operation: SponsorOperation,
        pretend: bool,
    ) -> Result<SponsorSettlement, DocumentError> {
        let Some(current) = self.sponsorships.get(unit) else {
            return match operation {
                SponsorOperation::Consume { .. } => Ok(SponsorSettlement::default()),
                SponsorOperation::Cancel { transaction_hash } => {
                    Err(DocumentError::SponsorshipNotFound(transaction_hash))
                }
            };
        };
        let mut record = current.clone();
        let settlement = match operation {
            SponsorOperation::Consume { viewed } => {
                record.consume(block_number, block_time, mode, viewed)?
            }
            SponsorOperation::Cancel { transaction_hash } => {
                record.cancel(block_number, &transaction_hash, mode)?
            }
        };
        if !pretend && record != *current {
            self.sponsorships.insert(*unit, record);
        }
        Ok(settlement)
    }
}

impl Transactional for DocumentRegistry {
    fn save(&mut self) -> StorageResult<()> {
        self.files.save()?;
        self.units.save()?;
        self.sponsorships.save()
    }

    fn commit(&mut self) {
        self.files.commit();
        self.units.commit();
        self.sponsorships.commit();
    }

    fn discard(&mut self) {
        self.files.discard();
        self.units.discard();
        self.sponsorships.discard();
    }

    fn clear(&mut self) {
        self.files.clear();
        self.units.clear();
        self.sponsorships.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash_data;
    use crate::types::Coin;

    fn registry_with_unit() -> (DocumentRegistry, Id) {
        let mut registry = DocumentRegistry::default();
        let file = hash_data(b"file");
        let unit = hash_data(b"unit");
        registry
            .insert_file(FileRecord {
                uri: file,
                authors: vec![Address::from_bytes([1; 32])],
            })
            .unwrap();
        registry
            .insert_unit(UnitRecord {
                uri: unit,
                content_id: 1,
                channel: Address::from_bytes([2; 32]),
                authors: vec![Address::from_bytes([1; 32])],
                files: vec![file],
            })
            .unwrap();
        (registry, unit)
    }

    #[test]
    fn test_unit_requires_files() {
        let mut registry = DocumentRegistry::default();
        let result = registry.insert_unit(UnitRecord {
            uri: hash_data(b"unit"),
            content_id: 1,
            channel: Address::from_bytes([2; 32]),
            authors: Vec::new(),
            files: vec![hash_data(b"missing")],
        });
        assert!(matches!(result, Err(DocumentError::UnknownFile(_))));
    }

    #[test]
    fn test_duplicate_uri_rejected() {
        let (mut registry, _) = registry_with_unit();
        let result = registry.insert_file(FileRecord {
            uri: hash_data(b"file"),
            authors: Vec::new(),
        });
        assert!(matches!(result, Err(DocumentError::DuplicateUri(_))));
    }

    #[test]
    fn test_pretend_leaves_book_untouched() {
        let (mut registry, unit) = registry_with_unit();
        let sponsor = Address::from_bytes([3; 32]);
        let tx = hash_data(b"deposit");
        registry
            .add_sponsorship(unit, SponsorshipItem::new(tx, sponsor, Coin::from_whole(6), 0, 1))
            .unwrap();
        let before = registry.sponsorship(&unit).cloned();

        let operation = SponsorOperation::Consume { viewed: true };
        let pretended = registry
            .sponsored_content_unit_set_used(&unit, 1, 600, ApplyMode::Apply, operation, true)
            .unwrap();
        assert_eq!(registry.sponsorship(&unit).cloned(), before);

        let applied = registry
            .sponsored_content_unit_set_used(&unit, 1, 600, ApplyMode::Apply, operation, false)
            .unwrap();
        assert_eq!(pretended, applied);
        assert_eq!(applied.to_unit, Coin::from_whole(1));
    }

    #[test]
    fn test_cancel_request_checks_sponsor() {
        let (mut registry, unit) = registry_with_unit();
        let sponsor = Address::from_bytes([3; 32]);
        let tx = hash_data(b"deposit");
        registry
            .add_sponsorship(unit, SponsorshipItem::new(tx, sponsor, Coin::from_whole(6), 0, 1))
            .unwrap();

        let stranger = Address::from_bytes([4; 32]);
        assert!(matches!(
            registry.check_cancel_request(&unit, &tx, &stranger),
            Err(DocumentError::WrongSponsor { .. })
        ));
        registry
            .set_cancel_request(&unit, &tx, &sponsor, Some(hash_data(b"c")), ApplyMode::Apply)
            .unwrap();
        assert!(matches!(
            registry.check_cancel_request(&unit, &tx, &sponsor),
            Err(DocumentError::AlreadyCancelled(_))
        ));
        registry
            .set_cancel_request(&unit, &tx, &sponsor, None, ApplyMode::Revert)
            .unwrap();
        assert!(registry.check_cancel_request(&unit, &tx, &sponsor).is_ok());
    }

    #[test]
    fn test_remove_last_sponsorship_drops_book() {
        let (mut registry, unit) = registry_with_unit();
        let tx = hash_data(b"deposit");
        registry
            .add_sponsorship(
                unit,
                SponsorshipItem::new(tx, Address::from_bytes([3; 32]), Coin::from_whole(1), 0, 1),
            )
            .unwrap();
        registry.remove_sponsorship(&unit, &tx).unwrap();
        assert!(registry.sponsorship(&unit).is_none());
        assert!(registry.sponsored_units().is_empty());
    }
}
