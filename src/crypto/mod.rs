//! Cryptographic primitives.
//!
//! - ed25519-dalek for block and transaction signatures
//! - BLAKE3 for block, transaction and content hashes

mod hash;
mod signature;

pub use hash::{hash_data, hash_serialized, Hash, Hasher};
pub use signature::{verify, Keypair, PublicKey, Signature};

use thiserror::Error;

/// Cryptographic errors
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Invalid signature
    #[error("invalid signature")]
    InvalidSignature,
    /// Invalid public key format
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),
    /// Invalid hash format
    #[error("invalid hash: {0}")]
    InvalidHash(String),
    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type for crypto operations
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Decode exactly `N` hex-encoded bytes
pub(crate) fn decode_fixed<const N: usize>(text: &str) -> Result<[u8; N], String> {
    let bytes = hex::decode(text).map_err(|e| e.to_string())?;
    bytes
        .try_into()
        .map_err(|bytes: Vec<u8>| format!("expected {N} bytes, got {}", bytes.len()))
}
