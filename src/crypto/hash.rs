//! BLAKE3 digests for blocks, transactions and content URIs.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{decode_fixed, CryptoError, CryptoResult};

/// A 32-byte hash digest
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Hash([u8; 32]);

impl Hash {
    /// The zero hash (parent of the genesis block)
    pub const ZERO: Self = Self([0u8; 32]);

    /// Create a hash from raw bytes
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the underlying bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string
    ///
    /// # Errors
    /// Returns error if the text is not 32 hex-encoded bytes
    pub fn from_hex(s: &str) -> CryptoResult<Self> {
        decode_fixed(s).map(Self).map_err(CryptoError::InvalidHash)
    }

    /// First eight bytes read as a little-endian integer
    #[must_use]
    pub fn prefix_u64(&self) -> u64 {
        let mut head = [0u8; 8];
        head.copy_from_slice(&self.0[..8]);
        u64::from_le_bytes(head)
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Incremental BLAKE3 hasher
#[derive(Default)]
pub struct Hasher {
    inner: blake3::Hasher,
}

impl Hasher {
    /// Empty hasher
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed more bytes
    pub fn update(&mut self, data: &[u8]) -> &mut Self {
        self.inner.update(data);
        self
    }

    /// Digest of everything fed so far
    #[must_use]
    pub fn finalize(self) -> Hash {
        Hash(*self.inner.finalize().as_bytes())
    }
}

/// Digest of `data`
#[must_use]
pub fn hash_data(data: &[u8]) -> Hash {
    Hash(*blake3::hash(data).as_bytes())
}

/// Hash the bincode encoding of a value
///
/// # Errors
/// Returns error if the value cannot be encoded
pub fn hash_serialized<T: Serialize>(value: &T) -> CryptoResult<Hash> {
    let bytes =
        bincode::serialize(value).map_err(|e| CryptoError::Serialization(e.to_string()))?;
    Ok(hash_data(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_tracks_data() {
        assert_eq!(hash_data(b"unit"), hash_data(b"unit"));
        assert_ne!(hash_data(b"unit"), hash_data(b"file"));
        assert_ne!(hash_data(b""), Hash::ZERO);
    }

    #[test]
    fn test_hasher_matches_one_shot() {
        let mut hasher = Hasher::new();
        hasher.update(b"split ").update(b"input");
        assert_eq!(hasher.finalize(), hash_data(b"split input"));
    }

    #[test]
    fn test_hash_serialized_tracks_content() {
        let a = hash_serialized(&(1u64, "unit")).unwrap();
        let b = hash_serialized(&(2u64, "unit")).unwrap();
        assert_ne!(a, b);
        assert_eq!(a, hash_serialized(&(1u64, "unit")).unwrap());
    }

    #[test]
    fn test_prefix_is_little_endian() {
        let mut raw = [0u8; 32];
        raw[0] = 1;
        assert_eq!(Hash::from_bytes(raw).prefix_u64(), 1);
    }

    #[test]
    fn test_from_hex_checks_length() {
        let original = hash_data(b"uri");
        assert_eq!(Hash::from_hex(&original.to_hex()).unwrap(), original);
        assert!(matches!(Hash::from_hex("00ff"), Err(CryptoError::InvalidHash(_))));
    }
}
