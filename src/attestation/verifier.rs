// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Attestation verification against a pinned root certificate.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};

use crate::channel::wire::AttestationResponse;
use crate::crypto::{canonical, KeyExchangeCodec, PublicKeyBytes};

use super::document::{Certificate, SignedAttestation, DIGEST_SHA256};
use super::AttestationError;

/// Allowed drift between the issuer's clock and ours.
const CLOCK_SKEW: Duration = Duration::seconds(60);

/// Why a decoded document was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    #[error("no root certificate is pinned")]
    NoPinnedRoot,

    #[error("pinned root certificate is outside its validity window")]
    RootExpired,

    #[error("certificate {subject} names issuer {issuer}, expected {expected}")]
    IssuerMismatch {
        subject: String,
        issuer: String,
        expected: String,
    },

    #[error("certificate {0} has an invalid signature")]
    CertificateSignature(String),

    #[error("certificate {0} is outside its validity window")]
    CertificateExpired(String),

    #[error("unsupported digest {0}")]
    UnsupportedDigest(String),

    #[error("document signature does not verify under the leaf certificate")]
    DocumentSignature,

    #[error("document timestamp is in the future")]
    TimestampInFuture,

    #[error("document is older than the allowed maximum age")]
    DocumentTooOld,

    #[error("PCR{0} is missing from the document")]
    PcrMissing(u8),

    #[error("PCR{0} does not match the expected measurement")]
    PcrMismatch(u8),
}

/// Expected platform measurements. An empty policy accepts any values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MeasurementPolicy {
    expected: BTreeMap<u8, String>,
}

impl MeasurementPolicy {
    pub fn any() -> Self {
        Self::default()
    }

    /// Require PCR `index` to equal `measurement` (hex, case-insensitive).
    pub fn require(mut self, index: u8, measurement: impl Into<String>) -> Self {
        self.expected
            .insert(index, measurement.into().to_ascii_lowercase());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.expected.is_empty()
    }

    fn check(&self, pcrs: &BTreeMap<u8, String>) -> Result<(), VerifyError> {
        for (index, expected) in &self.expected {
            let actual = pcrs.get(index).ok_or(VerifyError::PcrMissing(*index))?;
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(VerifyError::PcrMismatch(*index));
            }
        }
        Ok(())
    }
}

/// Fields of a document that passed every check.
///
/// Only [`AttestationVerifier::check_at`] builds one, so holding a value is
/// proof that its key was bound by a document chaining to a pinned root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedAttestation {
    module_id: String,
    public_key: PublicKeyBytes,
    pcrs: BTreeMap<u8, String>,
    issued_at: DateTime<Utc>,
    user_data: Option<String>,
    nonce: Option<String>,
}

impl VerifiedAttestation {
    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    pub fn public_key(&self) -> &PublicKeyBytes {
        &self.public_key
    }

    pub fn pcrs(&self) -> &BTreeMap<u8, String> {
        &self.pcrs
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn user_data(&self) -> Option<&str> {
        self.user_data.as_deref()
    }

    pub fn nonce(&self) -> Option<&str> {
        self.nonce.as_deref()
    }

    /// Stand-in for a verified document binding `public_key`, for unit tests
    /// that exercise the channel without an attestation round trip.
    #[cfg(test)]
    pub(crate) fn for_key(public_key: PublicKeyBytes) -> Self {
        Self {
            module_id: "test".to_string(),
            public_key,
            pcrs: BTreeMap::new(),
            issued_at: Utc::now(),
            user_data: None,
            nonce: None,
        }
    }
}

/// The server key a client has decided to trust, and on what grounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustedKey {
    /// Key bound by a verified attestation document.
    Attested(VerifiedAttestation),
    /// Key taken from a mock response without any verification.
    #[cfg(feature = "mock-attestation")]
    Mock(PublicKeyBytes),
}

impl TrustedKey {
    pub fn public_key(&self) -> &PublicKeyBytes {
        match self {
            Self::Attested(verified) => &verified.public_key,
            #[cfg(feature = "mock-attestation")]
            Self::Mock(key) => key,
        }
    }

    pub fn is_mock(&self) -> bool {
        match self {
            Self::Attested(_) => false,
            #[cfg(feature = "mock-attestation")]
            Self::Mock(_) => true,
        }
    }
}

/// Verifies [`SignedAttestation`]s against one pinned root certificate.
#[derive(Debug, Clone)]
pub struct AttestationVerifier {
    root: Option<Certificate>,
    policy: MeasurementPolicy,
    max_age: Option<Duration>,
}

impl AttestationVerifier {
    pub fn new(root: Certificate) -> Self {
        Self {
            root: Some(root),
            policy: MeasurementPolicy::any(),
            max_age: None,
        }
    }

    /// Verifier with no pinned root: every real document is rejected and
    /// only mock responses yield a key.
    #[cfg(feature = "mock-attestation")]
    pub fn unpinned() -> Self {
        Self {
            root: None,
            policy: MeasurementPolicy::any(),
            max_age: None,
        }
    }

    pub fn with_policy(mut self, policy: MeasurementPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Reject documents issued longer than `max_age` ago.
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn root(&self) -> Option<&Certificate> {
        self.root.as_ref()
    }

    pub fn decode(&self, encoded: &str) -> Result<SignedAttestation, AttestationError> {
        SignedAttestation::decode(encoded)
    }

    /// Decode and check an encoded document. Any failure yields `false`.
    pub fn verify(&self, encoded: &str) -> bool {
        self.decode(encoded)
            .map(|signed| self.check(&signed).is_ok())
            .unwrap_or(false)
    }

    pub fn check(&self, signed: &SignedAttestation) -> Result<VerifiedAttestation, VerifyError> {
        self.check_at(signed, Utc::now())
    }

    /// Check `signed` as of `now`.
    pub fn check_at(
        &self,
        signed: &SignedAttestation,
        now: DateTime<Utc>,
    ) -> Result<VerifiedAttestation, VerifyError> {
        let root = self.root.as_ref().ok_or(VerifyError::NoPinnedRoot)?;
        let doc = &signed.document;
        let now_secs = now.timestamp();

        if !root.is_valid_at(now_secs) {
            return Err(VerifyError::RootExpired);
        }

        let mut issuer = root;
        for cert in doc
            .cabundle
            .iter()
            .filter(|cert| *cert != root)
            .chain(std::iter::once(&doc.certificate))
        {
            check_certificate(cert, issuer, now_secs)?;
            issuer = cert;
        }

        if doc.digest != DIGEST_SHA256 {
            return Err(VerifyError::UnsupportedDigest(doc.digest.clone()));
        }

        let signature = hex::decode(&signed.signature).map_err(|_| VerifyError::DocumentSignature)?;
        let message = canonical::to_vec(doc).map_err(|_| VerifyError::DocumentSignature)?;
        if !KeyExchangeCodec::verify_signature(doc.certificate.public_key(), &message, &signature) {
            return Err(VerifyError::DocumentSignature);
        }

        let issued_at = i64::try_from(doc.timestamp)
            .ok()
            .and_then(DateTime::from_timestamp_millis)
            .ok_or(VerifyError::TimestampInFuture)?;
        if issued_at > now + CLOCK_SKEW {
            return Err(VerifyError::TimestampInFuture);
        }
        if let Some(max_age) = self.max_age {
            if now - issued_at > max_age {
                return Err(VerifyError::DocumentTooOld);
            }
        }

        self.policy.check(&doc.pcrs)?;

        Ok(VerifiedAttestation {
            module_id: doc.module_id.clone(),
            public_key: doc.public_key,
            pcrs: doc.pcrs.clone(),
            issued_at,
            user_data: doc.user_data.clone(),
            nonce: doc.nonce.clone(),
        })
    }

    /// Turn a `/attestation` response into the key the client may trust.
    ///
    /// A mock response is only accepted by an [`unpinned`](Self::unpinned)
    /// verifier; once a root is pinned every key must come from a document
    /// that chains to it.
    pub fn evaluate(&self, response: &AttestationResponse) -> Result<TrustedKey, AttestationError> {
        match response {
            AttestationResponse::Real { attestation_doc } => {
                let signed = self.decode(attestation_doc)?;
                let verified = self.check(&signed)?;
                tracing::debug!(
                    module_id = %verified.module_id,
                    public_key = %verified.public_key,
                    "attestation verified"
                );
                Ok(TrustedKey::Attested(verified))
            }
            AttestationResponse::Mock { mock, attestation_doc } => {
                if !mock {
                    return Err(AttestationError::Decode(
                        "attestation_doc object requires \"mock\": true".to_string(),
                    ));
                }
                if self.root.is_some() {
                    tracing::warn!("mock attestation offered to a client with a pinned root");
                    return Err(AttestationError::MockRejected);
                }
                mock_key(attestation_doc.public_key)
            }
        }
    }
}

#[cfg(feature = "mock-attestation")]
fn mock_key(public_key: PublicKeyBytes) -> Result<TrustedKey, AttestationError> {
    tracing::warn!(public_key = %public_key, "accepting unverified mock attestation");
    Ok(TrustedKey::Mock(public_key))
}

#[cfg(not(feature = "mock-attestation"))]
fn mock_key(_public_key: PublicKeyBytes) -> Result<TrustedKey, AttestationError> {
    Err(AttestationError::MockRejected)
}

fn check_certificate(cert: &Certificate, issuer: &Certificate, now_secs: i64) -> Result<(), VerifyError> {
    if cert.body.issuer != issuer.body.subject {
        return Err(VerifyError::IssuerMismatch {
            subject: cert.body.subject.clone(),
            issuer: cert.body.issuer.clone(),
            expected: issuer.body.subject.clone(),
        });
    }

    let signature = hex::decode(&cert.signature)
        .map_err(|_| VerifyError::CertificateSignature(cert.body.subject.clone()))?;
    let body = canonical::to_vec(&cert.body)
        .map_err(|_| VerifyError::CertificateSignature(cert.body.subject.clone()))?;
    if !KeyExchangeCodec::verify_signature(issuer.public_key(), &body, &signature) {
        return Err(VerifyError::CertificateSignature(cert.body.subject.clone()));
    }

    if !cert.is_valid_at(now_secs) {
        return Err(VerifyError::CertificateExpired(cert.body.subject.clone()));
    }
    Ok(())
}
