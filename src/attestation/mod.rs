// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Attestation
//!
//! An attestation document binds a measured environment to the public key the
//! enclave uses on the secure channel. Clients pin a root certificate and only
//! talk to a server whose document chains to it.
//!
//! - [`document`]: wire structures and their base64 encoding
//! - [`verifier`]: chain and policy verification, producing a [`TrustedKey`]
//! - [`authority`]: local certificate authority that issues documents
//!
//! With the `mock-attestation` feature (on by default) a server may publish a
//! bare public key instead of a document and clients accept it as
//! [`TrustedKey::Mock`]. Building with `--no-default-features` removes that
//! variant entirely.

pub mod authority;
pub mod document;
pub mod verifier;

pub use authority::LocalAuthority;
pub use document::{AttestationDocument, Certificate, CertificateBody, SignedAttestation};
pub use verifier::{AttestationVerifier, MeasurementPolicy, TrustedKey, VerifiedAttestation, VerifyError};

#[derive(Debug, thiserror::Error)]
pub enum AttestationError {
    #[error("attestation decode error: {0}")]
    Decode(String),

    #[error("attestation verification failed: {0}")]
    Verify(#[from] VerifyError),

    #[error("mock attestation is not accepted by this verifier")]
    MockRejected,
}
