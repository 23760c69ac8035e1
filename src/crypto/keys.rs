// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Public key encoding, nonces and private key loading.

use std::fmt;

use k256::ecdsa::{SigningKey, VerifyingKey};
use k256::elliptic_curve::rand_core::{OsRng, RngCore};
use k256::SecretKey;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use super::CryptoError;

/// Exported public key length: uncompressed secp256k1 point without the
/// `0x04` SEC1 tag (`x || y`).
pub const PUBLIC_KEY_LEN: usize = 64;

/// Length of nonces generated by this crate.
pub const NONCE_LEN: usize = 32;

/// Shortest nonce the server accepts on `/talk`.
pub const MIN_NONCE_LEN: usize = 8;

/// A 64-byte secp256k1 public key as carried on the wire (hex).
///
/// Length is enforced on construction. Whether the bytes are a point on the
/// curve is only checked when the key is used, see [`PublicKeyBytes::to_verifying_key`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKeyBytes([u8; PUBLIC_KEY_LEN]);

impl PublicKeyBytes {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let raw: [u8; PUBLIC_KEY_LEN] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidPublicKey(format!(
                "expected {PUBLIC_KEY_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(raw))
    }

    pub fn from_hex(value: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(value.trim())
            .map_err(|e| CryptoError::InvalidPublicKey(format!("invalid hex: {e}")))?;
        Self::from_slice(&bytes)
    }

    pub fn from_verifying_key(key: &VerifyingKey) -> Self {
        let point = key.to_encoded_point(false);
        // Uncompressed SEC1 is always 0x04 || x || y.
        let mut raw = [0u8; PUBLIC_KEY_LEN];
        raw.copy_from_slice(&point.as_bytes()[1..]);
        Self(raw)
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Interpret the bytes as a curve point.
    pub fn to_verifying_key(&self) -> Result<VerifyingKey, CryptoError> {
        let mut sec1 = [0u8; PUBLIC_KEY_LEN + 1];
        sec1[0] = 0x04;
        sec1[1..].copy_from_slice(&self.0);
        VerifyingKey::from_sec1_bytes(&sec1)
            .map_err(|_| CryptoError::InvalidPublicKey("not a secp256k1 point".to_string()))
    }
}

impl fmt::Debug for PublicKeyBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKeyBytes({})", self.to_hex())
    }
}

impl fmt::Display for PublicKeyBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for PublicKeyBytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PublicKeyBytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Self::from_hex(&value).map_err(de::Error::custom)
    }
}

/// Per-message nonce. Must never repeat for the same pair of keys.
#[derive(Clone, PartialEq, Eq)]
pub struct Nonce(Vec<u8>);

impl Nonce {
    /// Fresh 32-byte nonce from the OS RNG.
    pub fn random() -> Self {
        let mut bytes = vec![0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Wrap caller-provided bytes, rejecting anything shorter than
    /// [`MIN_NONCE_LEN`].
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Result<Self, CryptoError> {
        let bytes = bytes.into();
        if bytes.len() < MIN_NONCE_LEN {
            return Err(CryptoError::NonceTooShort(bytes.len()));
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl fmt::Debug for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Nonce({})", self.to_hex())
    }
}

/// Parse a PEM-encoded secp256k1 private key (SEC1 or PKCS#8).
pub fn signing_key_from_pem(pem_str: &str) -> Result<SigningKey, CryptoError> {
    let pem = pem::parse(pem_str)
        .map_err(|e| CryptoError::InvalidPrivateKey(format!("invalid PEM: {e}")))?;

    let secret_key = SecretKey::from_sec1_der(pem.contents())
        .or_else(|_| {
            use k256::pkcs8::DecodePrivateKey;
            SecretKey::from_pkcs8_der(pem.contents())
        })
        .map_err(|e| CryptoError::InvalidPrivateKey(format!("invalid key format: {e}")))?;

    Ok(SigningKey::from(secret_key))
}

/// Encode a private key as PKCS#8 PEM.
pub fn signing_key_to_pem(key: &SigningKey) -> Result<String, CryptoError> {
    use k256::pkcs8::EncodePrivateKey;

    key.to_pkcs8_pem(k256::pkcs8::LineEnding::LF)
        .map(|pem| pem.to_string())
        .map_err(|e| CryptoError::InvalidPrivateKey(format!("failed to encode private key: {e}")))
}
