//! Ed25519 keys and signatures.
//!
//! Blocks are signed by their producer and transactions by every owner of
//! the action they carry. Signatures are deterministic, so re-signing an
//! identical block yields identical bytes.

use std::fmt;

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::{decode_fixed, CryptoError, CryptoResult};

/// A 64-byte Ed25519 signature, hex-encoded in text formats
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature([u8; 64]);

impl Signature {
    /// Raw bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        decode_fixed::<64>(&text)
            .map(Self)
            .map_err(serde::de::Error::custom)
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sig({}..)", hex::encode(&self.0[..8]))
    }
}

/// A 32-byte Ed25519 public key
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    /// Checked conversion from raw bytes
    ///
    /// # Errors
    /// Returns error if the bytes are not a valid curve point
    pub fn from_bytes(bytes: [u8; 32]) -> CryptoResult<Self> {
        VerifyingKey::from_bytes(&bytes)
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
        Ok(Self(bytes))
    }

    /// Raw bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    fn verifying_key(&self) -> CryptoResult<VerifyingKey> {
        VerifyingKey::from_bytes(&self.0).map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PubKey({}..)", hex::encode(&self.0[..8]))
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Signing key with its public half.
///
/// Neither `Clone` nor `Debug`, so key material is not copied or logged by
/// accident.
pub struct Keypair {
    signing: SigningKey,
    public: PublicKey,
}

impl Keypair {
    /// Fresh random key
    #[must_use]
    pub fn generate() -> Self {
        Self::from_signing(SigningKey::generate(&mut OsRng))
    }

    /// Key derived from a 32-byte seed
    #[must_use]
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self::from_signing(SigningKey::from_bytes(&seed))
    }

    fn from_signing(signing: SigningKey) -> Self {
        let public = PublicKey(signing.verifying_key().to_bytes());
        Self { signing, public }
    }

    /// Public half
    #[must_use]
    pub const fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Sign a message
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.signing.sign(message).to_bytes())
    }
}

/// Verify `signature` over `message` by `public_key`
///
/// # Errors
/// Returns error if the key is malformed or the signature does not match
pub fn verify(public_key: &PublicKey, message: &[u8], signature: &Signature) -> CryptoResult<()> {
    let signature = ed25519_dalek::Signature::from_bytes(signature.as_bytes());
    public_key
        .verifying_key()?
        .verify(message, &signature)
        .map_err(|_| CryptoError::InvalidSignature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify() {
        let keypair = Keypair::from_seed([1; 32]);
        let signature = keypair.sign(b"block");
        assert!(verify(keypair.public_key(), b"block", &signature).is_ok());
        assert!(verify(keypair.public_key(), b"blocks", &signature).is_err());
        assert!(verify(Keypair::generate().public_key(), b"block", &signature).is_err());
    }

    #[test]
    fn test_signatures_are_deterministic() {
        let keypair = Keypair::from_seed([2; 32]);
        assert_eq!(keypair.sign(b"same"), keypair.sign(b"same"));
    }

    #[test]
    fn test_seeded_keypair_is_stable() {
        let a = Keypair::from_seed([7; 32]);
        let b = Keypair::from_seed([7; 32]);
        assert_eq!(a.public_key(), b.public_key());
        assert_ne!(a.public_key(), Keypair::from_seed([8; 32]).public_key());
    }

    #[test]
    fn test_signature_json_is_hex() {
        let signature = Keypair::from_seed([3; 32]).sign(b"x");
        let json = serde_json::to_string(&signature).unwrap();
        assert_eq!(json.len(), 128 + 2);
        assert_eq!(serde_json::from_str::<Signature>(&json).unwrap(), signature);
        assert!(serde_json::from_str::<Signature>("\"abcd\"").is_err());
    }
}
