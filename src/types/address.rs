//! Account addresses.
//!
//! An address is the raw Ed25519 public key of its owner, so signatures
//! can be checked directly against it.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::crypto::{decode_fixed, CryptoError, CryptoResult, PublicKey};

/// A 32-byte account address
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address([u8; 32]);

impl Address {
    /// Address owned by a public key
    #[must_use]
    pub const fn from_public_key(key: &PublicKey) -> Self {
        Self(*key.as_bytes())
    }

    /// Create from raw bytes
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get underlying bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Public key used to verify this address's signatures
    ///
    /// # Errors
    /// Returns error if the bytes are not a valid curve point
    pub fn public_key(&self) -> CryptoResult<PublicKey> {
        PublicKey::from_bytes(self.0)
    }

    /// Convert to hex string
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string
    ///
    /// # Errors
    /// Returns error if hex is invalid or has the wrong length
    pub fn from_hex(s: &str) -> CryptoResult<Self> {
        decode_fixed(s)
            .map(Self)
            .map_err(CryptoError::InvalidPublicKey)
    }
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({}..)", &self.to_hex()[..12])
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;

    #[test]
    fn test_hex_roundtrip() {
        let kp = Keypair::generate();
        let address = Address::from_public_key(kp.public_key());
        assert_eq!(Address::from_hex(&address.to_hex()).unwrap(), address);
        assert_eq!(&address.public_key().unwrap(), kp.public_key());
    }

    #[test]
    fn test_json_is_hex_string() {
        let address = Address::from_bytes([0xab; 32]);
        let json = serde_json::to_string(&address).unwrap();
        assert_eq!(json, format!("\"{}\"", "ab".repeat(32)));
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, address);
    }

    #[test]
    fn test_wrong_length_rejected() {
        assert!(Address::from_hex("abcd").is_err());
    }
}
