// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Attestation document and certificate structures.
//!
//! ## Encoding
//!
//! A [`SignedAttestation`] travels as standard base64 of its canonical JSON.
//! Certificates and documents are signed over the canonical JSON of their
//! `body` / `document` member, so decoding and re-encoding a structure never
//! changes the bytes a signature covers.

use std::collections::BTreeMap;
use std::path::Path;

use base64ct::{Base64, Encoding};
use serde::{Deserialize, Serialize};

use crate::crypto::{canonical, PublicKeyBytes};

use super::AttestationError;

/// Digest algorithm recorded in documents produced by this crate.
pub const DIGEST_SHA256: &str = "SHA256";

/// Everything a certificate's issuer signs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateBody {
    pub subject: String,
    pub issuer: String,
    pub public_key: PublicKeyBytes,
    /// Unix seconds.
    pub not_before: i64,
    /// Unix seconds.
    pub not_after: i64,
}

/// A certificate in the attestation chain. Root certificates are self-signed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub body: CertificateBody,
    /// Hex ECDSA signature by the issuer over `canonical(body)`.
    pub signature: String,
}

impl Certificate {
    pub fn subject(&self) -> &str {
        &self.body.subject
    }

    pub fn public_key(&self) -> &PublicKeyBytes {
        &self.body.public_key
    }

    pub fn is_valid_at(&self, unix_secs: i64) -> bool {
        self.body.not_before <= unix_secs && unix_secs <= self.body.not_after
    }

    /// Load a pinned certificate from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, AttestationError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| AttestationError::Decode(format!("cannot read {}: {e}", path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|e| AttestationError::Decode(format!("invalid certificate {}: {e}", path.display())))
    }

    pub fn to_json_pretty(&self) -> Result<String, AttestationError> {
        serde_json::to_string_pretty(self).map_err(|e| AttestationError::Decode(e.to_string()))
    }
}

/// Statement binding an environment measurement to the enclave's public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationDocument {
    pub module_id: String,
    pub digest: String,
    /// Unix milliseconds at issue time.
    pub timestamp: u64,
    /// Platform configuration registers: index -> hex measurement.
    pub pcrs: BTreeMap<u8, String>,
    /// Leaf certificate whose key signs this document.
    pub certificate: Certificate,
    /// Intermediate chain, root first.
    pub cabundle: Vec<Certificate>,
    /// Key the enclave uses for the secure channel.
    pub public_key: PublicKeyBytes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

/// An attestation document together with the leaf certificate's signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedAttestation {
    pub document: AttestationDocument,
    /// Hex ECDSA signature by `document.certificate` over `canonical(document)`.
    pub signature: String,
}

impl SignedAttestation {
    /// Encode as base64 canonical JSON, the form served on `/attestation`.
    pub fn encode(&self) -> Result<String, AttestationError> {
        let bytes = canonical::to_vec(self).map_err(|e| AttestationError::Decode(e.to_string()))?;
        Ok(Base64::encode_string(&bytes))
    }

    /// Decode the `/attestation` string form.
    pub fn decode(encoded: &str) -> Result<Self, AttestationError> {
        let bytes = Base64::decode_vec(encoded.trim())
            .map_err(|e| AttestationError::Decode(format!("invalid base64: {e}")))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| AttestationError::Decode(format!("invalid document: {e}")))
    }

    pub fn public_key(&self) -> &PublicKeyBytes {
        &self.document.public_key
    }
}
