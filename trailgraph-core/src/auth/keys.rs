//! Ed25519 key management
//!
//! Loads the token signing key pair and its public half from PEM files and
//! derives a stable fingerprint used as the JWT `kid`.

use crate::{Result, TrailError};
use jwt_simple::prelude::{Ed25519KeyPair, Ed25519PublicKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Private key used to mint identity tokens
pub struct SigningKey {
    key_pair: Ed25519KeyPair,
    key_id: KeyId,
}

impl SigningKey {
    /// Generate a fresh Ed25519 key pair
    pub fn generate() -> Self {
        Self::from_key_pair(Ed25519KeyPair::generate())
    }

    /// Parse a PKCS#8 PEM private key
    pub fn from_pem(pem: &str) -> Result<Self> {
        let key_pair = Ed25519KeyPair::from_pem(pem)
            .map_err(|e| TrailError::KeyUnavailable(format!("invalid private key: {}", e)))?;
        Ok(Self::from_key_pair(key_pair))
    }

    /// Read and parse a PEM private key file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let pem = std::fs::read_to_string(path).map_err(|e| {
            TrailError::KeyUnavailable(format!("could not read {}: {}", path.display(), e))
        })?;
        Self::from_pem(&pem)
    }

    fn from_key_pair(key_pair: Ed25519KeyPair) -> Self {
        let key_id = KeyId::from_public_key(&key_pair.public_key());
        let key_pair = key_pair.with_key_id(key_id.as_str());
        SigningKey { key_pair, key_id }
    }

    /// Matching public key
    pub fn verifying_key(&self) -> VerifyingKey {
        VerifyingKey::from_public_key(self.key_pair.public_key())
    }

    pub fn key_id(&self) -> &KeyId {
        &self.key_id
    }

    pub fn to_pem(&self) -> String {
        self.key_pair.to_pem()
    }

    pub(crate) fn key_pair(&self) -> &Ed25519KeyPair {
        &self.key_pair
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

/// Public key used to verify identity tokens
#[derive(Clone)]
pub struct VerifyingKey {
    public_key: Ed25519PublicKey,
    key_id: KeyId,
}

impl VerifyingKey {
    /// Parse an SPKI PEM public key
    pub fn from_pem(pem: &str) -> Result<Self> {
        let public_key = Ed25519PublicKey::from_pem(pem)
            .map_err(|e| TrailError::KeyUnavailable(format!("invalid public key: {}", e)))?;
        Ok(Self::from_public_key(public_key))
    }

    /// Read and parse a PEM public key file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let pem = std::fs::read_to_string(path).map_err(|e| {
            TrailError::KeyUnavailable(format!("could not read {}: {}", path.display(), e))
        })?;
        Self::from_pem(&pem)
    }

    fn from_public_key(public_key: Ed25519PublicKey) -> Self {
        let key_id = KeyId::from_public_key(&public_key);
        VerifyingKey { public_key, key_id }
    }

    pub fn key_id(&self) -> &KeyId {
        &self.key_id
    }

    pub fn to_pem(&self) -> String {
        self.public_key.to_pem()
    }

    pub(crate) fn public_key(&self) -> &Ed25519PublicKey {
        &self.public_key
    }
}

impl fmt::Debug for VerifyingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifyingKey")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

/// Fingerprint of a public key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyId(String);

impl KeyId {
    /// BLAKE3 of the raw public key bytes, first 16 bytes as hex
    pub fn from_public_key(public_key: &Ed25519PublicKey) -> Self {
        let hash = blake3::hash(&public_key.to_bytes());
        KeyId(hex::encode(&hash.as_bytes()[..16]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
