//! Partially signed transactions waiting for their co-owners.

use std::collections::BTreeMap;

use crate::crypto::{CryptoResult, Hash};
use crate::types::{SignedTransaction, Timestamp};

/// Result of merging authorizations into the inbox
#[derive(Debug, PartialEq, Eq)]
pub enum InboxOutcome {
    /// Every owner has signed; the transaction left the inbox
    Complete(SignedTransaction),
    /// New signatures were recorded; the merged transaction is returned
    Updated(SignedTransaction),
    /// Nothing new
    Unchanged,
}

/// Incomplete multi-owner transactions keyed by hash
#[derive(Debug, Default)]
pub struct Inbox {
    pending: BTreeMap<Hash, SignedTransaction>,
}

impl Inbox {
    /// Empty inbox
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of waiting transactions
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is waiting
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Merge the authorizations of `signed` into the copy kept for its hash.
    /// Signatures must already be verified.
    ///
    /// # Errors
    /// Returns error if the transaction cannot be hashed
    pub fn merge(&mut self, signed: SignedTransaction) -> CryptoResult<InboxOutcome> {
        let hash = signed.hash()?;
        let Some(entry) = self.pending.get_mut(&hash) else {
            if signed.is_complete() {
                return Ok(InboxOutcome::Complete(signed));
            }
            self.pending.insert(hash, signed.clone());
            return Ok(InboxOutcome::Updated(signed));
        };

        let mut added = false;
        for authorization in signed.authorizations {
            if !entry
                .authorizations
                .iter()
                .any(|known| known.address == authorization.address)
            {
                entry.authorizations.push(authorization);
                added = true;
            }
        }
        if entry.is_complete() {
            return Ok(self
                .pending
                .remove(&hash)
                .map_or(InboxOutcome::Unchanged, InboxOutcome::Complete));
        }
        Ok(if added {
            InboxOutcome::Updated(entry.clone())
        } else {
            InboxOutcome::Unchanged
        })
    }

    /// Forget transactions that expired before `now`
    pub fn clean(&mut self, now: Timestamp) {
        self.pending
            .retain(|_, signed| signed.transaction.expiry_time >= now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash_data;
    use crate::test_support::{address_of, keypair};
    use crate::types::{Action, Coin, File, Transaction};

    fn shared_file() -> SignedTransaction {
        SignedTransaction::unsigned(Transaction {
            action: Action::File(File {
                uri: hash_data(b"shared"),
                author_addresses: vec![address_of(1), address_of(2)],
            }),
            fee: Coin::ZERO,
            creation_time: 0,
            expiry_time: 600,
        })
    }

    #[test]
    fn test_signatures_merge_until_complete() {
        let mut inbox = Inbox::new();
        let mut first = shared_file();
        first.sign(&keypair(1)).unwrap();
        let mut second = shared_file();
        second.sign(&keypair(2)).unwrap();

        assert!(matches!(
            inbox.merge(first.clone()).unwrap(),
            InboxOutcome::Updated(_)
        ));
        assert_eq!(inbox.merge(first).unwrap(), InboxOutcome::Unchanged);
        match inbox.merge(second).unwrap() {
            InboxOutcome::Complete(signed) => assert_eq!(signed.authorizations.len(), 2),
            other => panic!("expected completion, got {other:?}"),
        }
        assert!(inbox.is_empty());
    }

    #[test]
    fn test_expired_entries_dropped() {
        let mut inbox = Inbox::new();
        let mut partial = shared_file();
        partial.sign(&keypair(1)).unwrap();
        inbox.merge(partial).unwrap();
        inbox.clean(601);
        assert!(inbox.is_empty());
    }
}
