// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Channel Cryptography
//!
//! Key material and the message codec shared by both channel endpoints.
//!
//! ## Construction
//!
//! ```text
//! shared  = ECDH(secp256k1, local_secret, peer_public).x
//! key||iv = HKDF-SHA256(salt = nonce, ikm = shared)
//! ct      = AES-256-GCM(key, iv, plaintext) || tag
//! sig     = ECDSA-secp256k1(SHA-256(message))
//! ```
//!
//! The long-term [`KeyExchangeCodec`] is built once at startup and passed by
//! reference into every component that needs it; nothing in this module holds
//! global state.

pub mod canonical;
pub mod codec;
pub mod keys;

pub use codec::KeyExchangeCodec;
pub use keys::{Nonce, PublicKeyBytes, MIN_NONCE_LEN, NONCE_LEN, PUBLIC_KEY_LEN};

/// Errors produced by key handling and the message codec.
///
/// `Decryption` carries no detail: a bad peer key, a truncated
/// ciphertext and a tag mismatch are indistinguishable to the caller.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("nonce too short: {0} bytes")]
    NonceTooShort(usize),

    #[error("encryption failed")]
    Encryption,

    #[error("decryption failed")]
    Decryption,
}
