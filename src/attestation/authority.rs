// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Local attestation authority.
//!
//! Stands in for the platform's attestation hardware: it owns a root CA key,
//! issues certificates, and produces the enclave's boot-time
//! [`SignedAttestation`]. Each document is signed by a fresh leaf key that is
//! discarded right after, the same shape as a hardware-issued document whose
//! leaf certificate chains to a vendor root.

use std::collections::BTreeMap;

use chrono::{Duration, Utc};

use crate::crypto::{canonical, KeyExchangeCodec, PublicKeyBytes};

use super::document::{
    AttestationDocument, Certificate, CertificateBody, SignedAttestation, DIGEST_SHA256,
};
use super::AttestationError;

/// Default lifetime of leaf certificates (and therefore of documents).
pub const DEFAULT_LEAF_LIFETIME: Duration = Duration::days(30);

/// Certificate-issuing authority.
///
/// `chain` holds the authority's own certificate path, root first. A root
/// authority's chain is just its self-signed certificate.
pub struct LocalAuthority {
    codec: KeyExchangeCodec,
    chain: Vec<Certificate>,
    leaf_lifetime: Duration,
}

impl LocalAuthority {
    /// Generate a new root authority with a self-signed certificate.
    pub fn generate(subject: &str, validity: Duration) -> Self {
        let codec = KeyExchangeCodec::generate();
        let now = Utc::now().timestamp();
        let body = CertificateBody {
            subject: subject.to_string(),
            issuer: subject.to_string(),
            public_key: *codec.public_key(),
            not_before: now,
            not_after: now + validity.num_seconds(),
        };
        let root = sign_certificate(&codec, body);
        Self {
            codec,
            chain: vec![root],
            leaf_lifetime: DEFAULT_LEAF_LIFETIME,
        }
    }

    /// Rebuild a root authority from its key and the certificate that was
    /// pinned by clients.
    pub fn from_parts(codec: KeyExchangeCodec, root: Certificate) -> Result<Self, AttestationError> {
        if root.public_key() != codec.public_key() {
            return Err(AttestationError::Decode(
                "root certificate does not match authority key".to_string(),
            ));
        }
        Ok(Self {
            codec,
            chain: vec![root],
            leaf_lifetime: DEFAULT_LEAF_LIFETIME,
        })
    }

    pub fn with_leaf_lifetime(mut self, lifetime: Duration) -> Self {
        self.leaf_lifetime = lifetime;
        self
    }

    pub fn root_certificate(&self) -> &Certificate {
        &self.chain[0]
    }

    /// Certificate of this authority itself (last element of its chain).
    pub fn certificate(&self) -> &Certificate {
        self.chain.last().unwrap_or(&self.chain[0])
    }

    pub fn codec(&self) -> &KeyExchangeCodec {
        &self.codec
    }

    /// Issue a certificate for `public_key`, valid from now for `validity`.
    pub fn issue_certificate(
        &self,
        subject: &str,
        public_key: &PublicKeyBytes,
        validity: Duration,
    ) -> Certificate {
        let now = Utc::now().timestamp();
        self.issue_certificate_window(subject, public_key, now, now + validity.num_seconds())
    }

    /// Issue a certificate with an explicit validity window (unix seconds).
    pub fn issue_certificate_window(
        &self,
        subject: &str,
        public_key: &PublicKeyBytes,
        not_before: i64,
        not_after: i64,
    ) -> Certificate {
        let body = CertificateBody {
            subject: subject.to_string(),
            issuer: self.certificate().subject().to_string(),
            public_key: *public_key,
            not_before,
            not_after,
        };
        sign_certificate(&self.codec, body)
    }

    /// Create an intermediate authority whose certificate is issued by this one.
    pub fn delegate(&self, subject: &str, validity: Duration) -> Self {
        let codec = KeyExchangeCodec::generate();
        let cert = self.issue_certificate(subject, codec.public_key(), validity);
        let mut chain = self.chain.clone();
        chain.push(cert);
        Self {
            codec,
            chain,
            leaf_lifetime: self.leaf_lifetime,
        }
    }

    /// Produce a signed attestation document binding `enclave_key`.
    pub fn attest(
        &self,
        enclave_key: &PublicKeyBytes,
        module_id: &str,
        pcrs: BTreeMap<u8, String>,
        nonce: Option<&[u8]>,
    ) -> Result<SignedAttestation, AttestationError> {
        let leaf_key = KeyExchangeCodec::generate();
        let leaf = self.issue_certificate(
            &format!("{module_id}.leaf"),
            leaf_key.public_key(),
            self.leaf_lifetime,
        );

        let document = AttestationDocument {
            module_id: module_id.to_string(),
            digest: DIGEST_SHA256.to_string(),
            timestamp: Utc::now().timestamp_millis().max(0) as u64,
            pcrs,
            certificate: leaf,
            cabundle: self.chain.clone(),
            public_key: *enclave_key,
            user_data: None,
            nonce: nonce.map(hex::encode),
        };

        sign_document(&leaf_key, document)
    }
}

/// Sign `document` with `leaf_key`. Exposed for building documents whose
/// fields need to be set explicitly (tests, tooling).
pub fn sign_document(
    leaf_key: &KeyExchangeCodec,
    document: AttestationDocument,
) -> Result<SignedAttestation, AttestationError> {
    let bytes = canonical::to_vec(&document).map_err(|e| AttestationError::Decode(e.to_string()))?;
    let signature = hex::encode(leaf_key.sign(&bytes));
    Ok(SignedAttestation {
        document,
        signature,
    })
}

fn sign_certificate(issuer: &KeyExchangeCodec, body: CertificateBody) -> Certificate {
    // CertificateBody only holds strings, integers and a hex key.
    let bytes = canonical::to_vec(&body).unwrap_or_default();
    Certificate {
        signature: hex::encode(issuer.sign(&bytes)),
        body,
    }
}
