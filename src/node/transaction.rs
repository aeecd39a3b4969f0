//! Validation and application of individual transactions.

use thiserror::Error;

use super::ledger::{Ledger, LedgerError, LedgerResult};
use crate::crypto::Hash;
use crate::documents::{FileRecord, SponsorshipItem, UnitRecord};
use crate::params::{NODES_TIME_SHIFT, TRANSACTION_MAX_LIFETIME_HOURS};
use crate::state::{StateError, StateLayer};
use crate::types::{Action, Address, ApplyMode, NodeType, SignedTransaction, Timestamp};

/// Transaction rejections
#[derive(Debug, Error)]
pub enum TransactionError {
    /// Malformed or semantically invalid contents
    #[error("wrong transaction data: {0}")]
    WrongData(String),
    /// Authorization from an address that is not an owner
    #[error("{address} is not an owner of the transaction")]
    ForeignAuthorization {
        /// Signing address
        address: Address,
    },
    /// Owner signature missing
    #[error("missing authorization of {address}")]
    MissingAuthorization {
        /// Owner without a signature
        address: Address,
    },
    /// Not every owner has signed yet
    #[error("transaction {0} is not fully signed")]
    Incomplete(Hash),
    /// Signature does not verify
    #[error("invalid signature")]
    InvalidSignature,
    /// Created too far in the future
    #[error("transaction created at {creation_time}, now is {now}")]
    FromFuture {
        /// Creation time
        creation_time: Timestamp,
        /// Local time
        now: Timestamp,
    },
    /// Expired
    #[error("transaction expired at {expiry_time}, now is {now}")]
    Expired {
        /// Expiry time
        expiry_time: Timestamp,
        /// Local time
        now: Timestamp,
    },
    /// Lifetime longer than allowed
    #[error("transaction lifetime exceeds {TRANSACTION_MAX_LIFETIME_HOURS} hours")]
    LifetimeTooLong,
    /// Already pooled or on chain
    #[error("duplicate transaction {0}")]
    Duplicate(Hash),
}

/// Checks that need no ledger state: time window, lifetime, signatures
/// and that only owners have signed
///
/// # Errors
/// Returns the first failed check
pub fn signed_transaction_validate(
    signed: &SignedTransaction,
    now: Timestamp,
) -> Result<(), TransactionError> {
    let transaction = &signed.transaction;
    if transaction.creation_time > now + NODES_TIME_SHIFT {
        return Err(TransactionError::FromFuture {
            creation_time: transaction.creation_time,
            now,
        });
    }
    if transaction.expiry_time < now - NODES_TIME_SHIFT {
        return Err(TransactionError::Expired {
            expiry_time: transaction.expiry_time,
            now,
        });
    }
    if transaction.expiry_time < transaction.creation_time {
        return Err(TransactionError::WrongData(
            "expiry precedes creation".to_string(),
        ));
    }
    if transaction.expiry_time - transaction.creation_time > TRANSACTION_MAX_LIFETIME_HOURS * 3_600 {
        return Err(TransactionError::LifetimeTooLong);
    }
    let owners = transaction.action.owners();
    if owners.is_empty() {
        return Err(TransactionError::WrongData("action without owners".to_string()));
    }
    for (position, authorization) in signed.authorizations.iter().enumerate() {
        if !owners.contains(&authorization.address) {
            return Err(TransactionError::ForeignAuthorization {
                address: authorization.address,
            });
        }
        if signed.authorizations[..position]
            .iter()
            .any(|earlier| earlier.address == authorization.address)
        {
            return Err(TransactionError::WrongData("repeated authorization".to_string()));
        }
    }
    signed
        .verify_signatures()
        .map_err(|_| TransactionError::InvalidSignature)
}

fn wrong(reason: &str) -> LedgerError {
    TransactionError::WrongData(reason.to_string()).into()
}

impl Ledger {
    /// Whether a transaction would apply to `layer` without changing anything
    ///
    /// # Errors
    /// Returns the reason it would not
    pub fn can_apply(&self, signed: &SignedTransaction, layer: StateLayer) -> LedgerResult<()> {
        let transaction = &signed.transaction;
        for owner in transaction.action.owners() {
            if !signed.authorizations.iter().any(|a| a.address == owner) {
                return Err(TransactionError::MissingAuthorization { address: owner }.into());
            }
        }
        let payer = signed
            .fee_payer()
            .ok_or_else(|| wrong("transaction without fee payer"))?;
        let mut spend = transaction.fee;

        match &transaction.action {
            Action::Transfer(transfer) => {
                if transfer.amount.is_zero() {
                    return Err(wrong("zero transfer"));
                }
                if transfer.from == transfer.to {
                    return Err(wrong("transfer to self"));
                }
                spend = spend.checked_add(transfer.amount)?;
            }
            Action::Role(role) => {
                if let Some(node_type) = self.state.get_role(&role.node_address) {
                    return Err(StateError::RoleExists {
                        address: role.node_address,
                        node_type,
                    }
                    .into());
                }
            }
            Action::File(file) => {
                if file.author_addresses.is_empty() {
                    return Err(wrong("file without authors"));
                }
                if self.documents.file(&file.uri).is_some() {
                    return Err(crate::documents::DocumentError::DuplicateUri(file.uri).into());
                }
            }
            Action::ContentUnit(unit) => {
                if unit.author_addresses.is_empty() || unit.file_uris.is_empty() {
                    return Err(wrong("content unit without authors or files"));
                }
                if self.state.get_role(&unit.channel_address) != Some(NodeType::Channel) {
                    return Err(wrong("content unit channel is not a registered channel"));
                }
                self.documents.check_unit(&unit_record(unit))?;
            }
            Action::ServiceStatistics(report) => {
                if self.state.get_role(&report.server_address).is_none() {
                    return Err(wrong("statistics from a node without a role"));
                }
                if report.block_number != self.chain.length() {
                    return Err(wrong("statistics for another block"));
                }
            }
            Action::SponsorContentUnit(sponsor) => {
                if sponsor.hours == 0 || sponsor.amount.is_zero() {
                    return Err(wrong("empty sponsorship"));
                }
                if self.documents.unit(&sponsor.uri).is_none() {
                    return Err(crate::documents::DocumentError::UnknownUnit(sponsor.uri).into());
                }
                let hash = signed.hash()?;
                let known = self
                    .documents
                    .sponsorship(&sponsor.uri)
                    .is_some_and(|record| record.find(&hash).is_some());
                if known {
                    return Err(crate::documents::DocumentError::DuplicateSponsorship(hash).into());
                }
                spend = spend.checked_add(sponsor.amount)?;
            }
            Action::CancelSponsorContentUnit(cancel) => {
                self.documents.check_cancel_request(
                    &cancel.uri,
                    &cancel.transaction_hash,
                    &cancel.sponsor_address,
                )?;
            }
        }

        let have = self.state.get_balance(&payer, layer);
        if have < spend {
            return Err(StateError::InsufficientBalance {
                address: payer,
                have,
                need: spend,
            }
            .into());
        }
        Ok(())
    }

    /// Apply a transaction to `layer`, all or nothing
    ///
    /// # Errors
    /// Returns the reason it cannot be applied; nothing is changed then
    pub fn apply_transaction(&mut self, signed: &SignedTransaction, layer: StateLayer) -> LedgerResult<()> {
        self.can_apply(signed, layer)?;
        let transaction = &signed.transaction;
        let payer = signed
            .fee_payer()
            .ok_or_else(|| wrong("transaction without fee payer"))?;
        self.state.decrease_balance(&payer, transaction.fee, layer)?;

        match &transaction.action {
            Action::Transfer(transfer) => {
                self.state.decrease_balance(&transfer.from, transfer.amount, layer)?;
                self.state.increase_balance(&transfer.to, transfer.amount, layer)?;
            }
            Action::Role(role) => self.state.insert_role(role.node_address, role.node_type)?,
            Action::File(file) => self.documents.insert_file(FileRecord {
                uri: file.uri,
                authors: file.author_addresses.clone(),
            })?,
            Action::ContentUnit(unit) => self.documents.insert_unit(unit_record(unit))?,
            Action::ServiceStatistics(_) => {}
            Action::SponsorContentUnit(sponsor) => {
                self.state
                    .decrease_balance(&sponsor.sponsor_address, sponsor.amount, layer)?;
                let item = SponsorshipItem::new(
                    signed.hash()?,
                    sponsor.sponsor_address,
                    sponsor.amount,
                    sponsor.start_time,
                    sponsor.hours,
                );
                self.documents.add_sponsorship(sponsor.uri, item)?;
            }
            Action::CancelSponsorContentUnit(cancel) => self.documents.set_cancel_request(
                &cancel.uri,
                &cancel.transaction_hash,
                &cancel.sponsor_address,
                Some(signed.hash()?),
                ApplyMode::Apply,
            )?,
        }
        Ok(())
    }

    /// Undo [`Self::apply_transaction`]
    ///
    /// # Errors
    /// Returns error if the layer no longer holds what the transaction
    /// created, which means the caller broke the revert order
    pub fn revert_transaction(&mut self, signed: &SignedTransaction, layer: StateLayer) -> LedgerResult<()> {
        let transaction = &signed.transaction;
        match &transaction.action {
            Action::Transfer(transfer) => {
                self.state.decrease_balance(&transfer.to, transfer.amount, layer)?;
                self.state.increase_balance(&transfer.from, transfer.amount, layer)?;
            }
            Action::Role(role) => {
                self.state.remove_role(&role.node_address)?;
            }
            Action::File(file) => {
                self.documents.remove_file(&file.uri)?;
            }
            Action::ContentUnit(unit) => {
                self.documents.remove_unit(&unit.uri)?;
            }
            Action::ServiceStatistics(_) => {}
            Action::SponsorContentUnit(sponsor) => {
                self.documents.remove_sponsorship(&sponsor.uri, &signed.hash()?)?;
                self.state
                    .increase_balance(&sponsor.sponsor_address, sponsor.amount, layer)?;
            }
            Action::CancelSponsorContentUnit(cancel) => self.documents.set_cancel_request(
                &cancel.uri,
                &cancel.transaction_hash,
                &cancel.sponsor_address,
                None,
                ApplyMode::Revert,
            )?,
        }
        let payer = signed
            .fee_payer()
            .ok_or_else(|| wrong("transaction without fee payer"))?;
        self.state.increase_balance(&payer, transaction.fee, layer)?;
        Ok(())
    }
}

fn unit_record(unit: &crate::types::ContentUnit) -> UnitRecord {
    UnitRecord {
        uri: unit.uri,
        content_id: unit.content_id,
        channel: unit.channel_address,
        authors: unit.author_addresses.clone(),
        files: unit.file_uris.clone(),
    }
}
