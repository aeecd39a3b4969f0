//! Transactions and the actions they carry.
//!
//! A transaction wraps exactly one [`Action`]. The hash of a transaction
//! covers its unsigned body only, so a multi-owner transaction keeps the
//! same hash while co-signers add their authorizations.

use serde::{Deserialize, Serialize};

use super::{Address, Coin, Id, Timestamp};
use crate::crypto::{hash_serialized, verify, CryptoResult, Hash, Keypair, Signature};

/// Role a node can register for itself
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NodeType {
    /// Serves content to readers and reports usage
    Channel,
    /// Stores and serves files to channels
    Storage,
}

/// Move coins between two accounts
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    /// Payer
    pub from: Address,
    /// Payee
    pub to: Address,
    /// Amount moved
    pub amount: Coin,
    /// Free-form memo
    pub message: String,
}

/// Register a node role
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    /// Node taking the role
    pub node_address: Address,
    /// Role taken
    pub node_type: NodeType,
}

/// Register a file and its authors
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    /// Content hash of the file
    pub uri: Id,
    /// Every author must sign
    pub author_addresses: Vec<Address>,
}

/// Register a content unit published by a channel
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentUnit {
    /// Unit identifier
    pub uri: Id,
    /// Channel-local content number
    pub content_id: u64,
    /// Publishing channel
    pub channel_address: Address,
    /// Every author must sign
    pub author_addresses: Vec<Address>,
    /// Files making up the unit
    pub file_uris: Vec<Id>,
}

/// View count reported against one counterpart node
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatisticsCount {
    /// Counterpart (storage node for channel reports, channel for storage reports)
    pub peer_address: Address,
    /// Number of views served
    pub count: u64,
}

/// Views of one file within one content unit
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatisticsFile {
    /// Served file
    pub file_uri: Id,
    /// Unit the file was served as part of
    pub unit_uri: Id,
    /// Per-counterpart counts
    pub count_items: Vec<ServiceStatisticsCount>,
}

/// Usage report of a channel or storage node for one block window
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatistics {
    /// Reporting node
    pub server_address: Address,
    /// Number of the block this report is meant for
    pub block_number: u64,
    /// Served files
    pub file_items: Vec<ServiceStatisticsFile>,
}

/// Deposit coins to sponsor a content unit for a number of hours
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SponsorContentUnit {
    /// Paying sponsor
    pub sponsor_address: Address,
    /// Sponsored unit
    pub uri: Id,
    /// Sponsorship start
    pub start_time: Timestamp,
    /// Duration
    pub hours: u64,
    /// Deposit
    pub amount: Coin,
}

/// Cancel an earlier sponsorship and recover its unused part
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelSponsorContentUnit {
    /// Sponsor who made the deposit
    pub sponsor_address: Address,
    /// Sponsored unit
    pub uri: Id,
    /// Hash of the sponsoring transaction
    pub transaction_hash: Hash,
}

/// Tagged union of everything a transaction can do
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    /// Coin transfer
    Transfer(Transfer),
    /// Node role registration
    Role(Role),
    /// File registration
    File(File),
    /// Content unit registration
    ContentUnit(ContentUnit),
    /// Usage report
    ServiceStatistics(ServiceStatistics),
    /// Sponsorship deposit
    SponsorContentUnit(SponsorContentUnit),
    /// Sponsorship cancellation
    CancelSponsorContentUnit(CancelSponsorContentUnit),
}

impl Action {
    /// Addresses that must sign, the first one paying the fee
    #[must_use]
    pub fn owners(&self) -> Vec<Address> {
        match self {
            Self::Transfer(t) => vec![t.from],
            Self::Role(r) => vec![r.node_address],
            Self::File(f) => f.author_addresses.clone(),
            Self::ContentUnit(u) => u.author_addresses.clone(),
            Self::ServiceStatistics(s) => vec![s.server_address],
            Self::SponsorContentUnit(s) => vec![s.sponsor_address],
            Self::CancelSponsorContentUnit(c) => vec![c.sponsor_address],
        }
    }

    /// Addresses whose transactions must be scheduled together
    #[must_use]
    pub fn participants(&self) -> Vec<Address> {
        match self {
            Self::Transfer(t) => vec![t.from, t.to],
            Self::ContentUnit(u) => {
                let mut all = u.author_addresses.clone();
                all.push(u.channel_address);
                all
            }
            other => other.owners(),
        }
    }

    /// Short name for logs
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Transfer(_) => "transfer",
            Self::Role(_) => "role",
            Self::File(_) => "file",
            Self::ContentUnit(_) => "content_unit",
            Self::ServiceStatistics(_) => "service_statistics",
            Self::SponsorContentUnit(_) => "sponsor_content_unit",
            Self::CancelSponsorContentUnit(_) => "cancel_sponsor_content_unit",
        }
    }
}

/// Unsigned transaction body
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// What the transaction does
    pub action: Action,
    /// Fee paid by the first owner to the miner
    pub fee: Coin,
    /// Creation time
    pub creation_time: Timestamp,
    /// The transaction is invalid after this time
    pub expiry_time: Timestamp,
}

/// One owner's signature over a transaction body
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorization {
    /// Signing owner
    pub address: Address,
    /// Signature over the body's bincode encoding
    pub signature: Signature,
}

/// A transaction with its collected authorizations
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    /// Body
    pub transaction: Transaction,
    /// Owner signatures
    pub authorizations: Vec<Authorization>,
}

impl Transaction {
    /// Bytes every owner signs
    ///
    /// # Errors
    /// Returns error if the body cannot be encoded
    pub fn signing_bytes(&self) -> CryptoResult<Vec<u8>> {
        bincode::serialize(self)
            .map_err(|e| crate::crypto::CryptoError::Serialization(e.to_string()))
    }

    /// Transaction hash
    ///
    /// # Errors
    /// Returns error if the body cannot be encoded
    pub fn hash(&self) -> CryptoResult<Hash> {
        hash_serialized(self)
    }
}

impl SignedTransaction {
    /// Wrap a body without signatures
    #[must_use]
    pub const fn unsigned(transaction: Transaction) -> Self {
        Self {
            transaction,
            authorizations: Vec::new(),
        }
    }

    /// Add the keypair's signature
    ///
    /// # Errors
    /// Returns error if the body cannot be encoded
    pub fn sign(&mut self, keypair: &Keypair) -> CryptoResult<()> {
        let signature = keypair.sign(&self.transaction.signing_bytes()?);
        self.authorizations.push(Authorization {
            address: Address::from_public_key(keypair.public_key()),
            signature,
        });
        Ok(())
    }

    /// Transaction hash (unsigned body)
    ///
    /// # Errors
    /// Returns error if the body cannot be encoded
    pub fn hash(&self) -> CryptoResult<Hash> {
        self.transaction.hash()
    }

    /// Check every authorization's signature
    ///
    /// # Errors
    /// Returns error on the first signature that fails to verify
    pub fn verify_signatures(&self) -> CryptoResult<()> {
        let message = self.transaction.signing_bytes()?;
        for authorization in &self.authorizations {
            let key = authorization.address.public_key()?;
            verify(&key, &message, &authorization.signature)?;
        }
        Ok(())
    }

    /// Whether every owner has signed
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.transaction
            .action
            .owners()
            .iter()
            .all(|owner| self.authorizations.iter().any(|a| a.address == *owner))
    }

    /// Fee payer
    #[must_use]
    pub fn fee_payer(&self) -> Option<Address> {
        self.transaction.action.owners().first().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer(from: &Keypair, to: Address) -> Transaction {
        Transaction {
            action: Action::Transfer(Transfer {
                from: Address::from_public_key(from.public_key()),
                to,
                amount: Coin::from_whole(3),
                message: String::new(),
            }),
            fee: Coin::ZERO,
            creation_time: 1_000,
            expiry_time: 2_000,
        }
    }

    #[test]
    fn test_sign_and_verify() {
        let kp = Keypair::from_seed([1; 32]);
        let mut tx = SignedTransaction::unsigned(transfer(&kp, Address::from_bytes([9; 32])));
        tx.sign(&kp).unwrap();

        assert!(tx.is_complete());
        assert!(tx.verify_signatures().is_ok());
    }

    #[test]
    fn test_tampered_body_fails() {
        let kp = Keypair::from_seed([1; 32]);
        let mut tx = SignedTransaction::unsigned(transfer(&kp, Address::from_bytes([9; 32])));
        tx.sign(&kp).unwrap();
        tx.transaction.fee = Coin::from_whole(1);

        assert!(tx.verify_signatures().is_err());
    }

    #[test]
    fn test_cosigning_keeps_hash() {
        let a = Keypair::from_seed([1; 32]);
        let b = Keypair::from_seed([2; 32]);
        let body = Transaction {
            action: Action::File(File {
                uri: crate::crypto::hash_data(b"file"),
                author_addresses: vec![
                    Address::from_public_key(a.public_key()),
                    Address::from_public_key(b.public_key()),
                ],
            }),
            fee: Coin::ZERO,
            creation_time: 0,
            expiry_time: 10,
        };
        let mut tx = SignedTransaction::unsigned(body);
        let before = tx.hash().unwrap();

        tx.sign(&a).unwrap();
        assert!(!tx.is_complete());
        tx.sign(&b).unwrap();
        assert!(tx.is_complete());
        assert_eq!(tx.hash().unwrap(), before);
    }

    #[test]
    fn test_participants_include_payee() {
        let kp = Keypair::from_seed([1; 32]);
        let to = Address::from_bytes([9; 32]);
        let tx = transfer(&kp, to);
        assert!(tx.action.participants().contains(&to));
        assert!(!tx.action.owners().contains(&to));
    }
}
