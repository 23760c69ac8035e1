// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Long-term key pair plus the per-message encrypt / decrypt / sign codec.

use hkdf::Hkdf;
use k256::ecdh::diffie_hellman;
use k256::ecdsa::signature::{Signer, Verifier};
use k256::ecdsa::{Signature, SigningKey};
use k256::elliptic_curve::rand_core::OsRng;
use ring::aead::{Aad, LessSafeKey, Nonce as AeadNonce, UnboundKey, AES_256_GCM, NONCE_LEN as IV_LEN};
use sha2::Sha256;

use super::keys::{signing_key_from_pem, PublicKeyBytes};
use super::CryptoError;

const AEAD_KEY_INFO: &[u8] = b"enclave-bridge/v1 aead key";
const AEAD_IV_INFO: &[u8] = b"enclave-bridge/v1 aead iv";

/// Length of an encoded signature (`r || s`).
pub const SIGNATURE_LEN: usize = 64;

/// Owns one endpoint's long-term secp256k1 key.
///
/// The same key is used for ECDH (encryption) and ECDSA (signing); only the
/// public half ever leaves the process.
pub struct KeyExchangeCodec {
    signing_key: SigningKey,
    public_key: PublicKeyBytes,
}

impl KeyExchangeCodec {
    /// Generate a fresh key pair.
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::random(&mut OsRng))
    }

    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        let public_key = PublicKeyBytes::from_verifying_key(signing_key.verifying_key());
        Self {
            signing_key,
            public_key,
        }
    }

    /// Load a key from SEC1 or PKCS#8 PEM.
    pub fn from_pem(pem: &str) -> Result<Self, CryptoError> {
        signing_key_from_pem(pem).map(Self::from_signing_key)
    }

    pub fn public_key(&self) -> &PublicKeyBytes {
        &self.public_key
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    /// Encrypt `plaintext` for `peer`. The returned buffer is ciphertext
    /// followed by the 16-byte GCM tag.
    pub fn encrypt(
        &self,
        peer: &PublicKeyBytes,
        nonce: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let (key, iv) = self.derive(peer, nonce)?;

        let mut in_out = plaintext.to_vec();
        key.seal_in_place_append_tag(AeadNonce::assume_unique_for_key(iv), Aad::empty(), &mut in_out)
            .map_err(|_| CryptoError::Encryption)?;
        Ok(in_out)
    }

    /// Decrypt a buffer produced by [`KeyExchangeCodec::encrypt`] on the peer.
    ///
    /// Every failure collapses to [`CryptoError::Decryption`]; no partial
    /// plaintext is ever returned.
    pub fn decrypt(
        &self,
        peer: &PublicKeyBytes,
        nonce: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let (key, iv) = self.derive(peer, nonce).map_err(|_| CryptoError::Decryption)?;

        let mut in_out = ciphertext.to_vec();
        let plaintext_len = key
            .open_in_place(AeadNonce::assume_unique_for_key(iv), Aad::empty(), &mut in_out)
            .map_err(|_| CryptoError::Decryption)?
            .len();
        in_out.truncate(plaintext_len);
        Ok(in_out)
    }

    /// ECDSA signature over SHA-256 of `message`, encoded as `r || s`.
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_LEN] {
        let signature: Signature = self.signing_key.sign(message);
        let mut out = [0u8; SIGNATURE_LEN];
        out.copy_from_slice(&signature.to_bytes());
        out
    }

    /// Check `signature` over `message` under `public_key`.
    ///
    /// Malformed keys or signatures simply verify as `false`.
    pub fn verify_signature(public_key: &PublicKeyBytes, message: &[u8], signature: &[u8]) -> bool {
        let Ok(verifying_key) = public_key.to_verifying_key() else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(signature) else {
            return false;
        };
        verifying_key.verify(message, &signature).is_ok()
    }

    /// ECDH shared secret -> HKDF-SHA256 (salted with the nonce) -> AEAD key and IV.
    fn derive(
        &self,
        peer: &PublicKeyBytes,
        nonce: &[u8],
    ) -> Result<(LessSafeKey, [u8; IV_LEN]), CryptoError> {
        let peer_key = peer.to_verifying_key()?;
        let shared = diffie_hellman(self.signing_key.as_nonzero_scalar(), peer_key.as_affine());

        let hkdf = Hkdf::<Sha256>::new(Some(nonce), &shared.raw_secret_bytes()[..]);

        let mut key_bytes = [0u8; 32];
        hkdf.expand(AEAD_KEY_INFO, &mut key_bytes)
            .map_err(|_| CryptoError::Encryption)?;
        let mut iv = [0u8; IV_LEN];
        hkdf.expand(AEAD_IV_INFO, &mut iv)
            .map_err(|_| CryptoError::Encryption)?;

        let unbound = UnboundKey::new(&AES_256_GCM, &key_bytes).map_err(|_| CryptoError::Encryption)?;
        Ok((LessSafeKey::new(unbound), iv))
    }
}

impl std::fmt::Debug for KeyExchangeCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyExchangeCodec")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::{Nonce, PUBLIC_KEY_LEN};
    use proptest::prelude::*;

    const GCM_TAG_LEN: usize = 16;

    #[test]
    fn peers_derive_the_same_key() {
        let client = KeyExchangeCodec::generate();
        let server = KeyExchangeCodec::generate();
        let nonce = Nonce::random();

        let ciphertext = client
            .encrypt(server.public_key(), nonce.as_bytes(), b"hello enclave")
            .unwrap();
        assert_eq!(ciphertext.len(), b"hello enclave".len() + GCM_TAG_LEN);

        let plaintext = server
            .decrypt(client.public_key(), nonce.as_bytes(), &ciphertext)
            .unwrap();
        assert_eq!(plaintext, b"hello enclave");
    }

    #[test]
    fn decrypt_with_wrong_key_fails_opaquely() {
        let client = KeyExchangeCodec::generate();
        let server = KeyExchangeCodec::generate();
        let stranger = KeyExchangeCodec::generate();
        let nonce = Nonce::random();

        let ciphertext = client
            .encrypt(stranger.public_key(), nonce.as_bytes(), b"secret")
            .unwrap();

        assert_eq!(
            server.decrypt(client.public_key(), nonce.as_bytes(), &ciphertext),
            Err(CryptoError::Decryption)
        );
    }

    #[test]
    fn decrypt_failures_are_indistinguishable() {
        let client = KeyExchangeCodec::generate();
        let server = KeyExchangeCodec::generate();
        let nonce = Nonce::random();
        let mut ciphertext = client
            .encrypt(server.public_key(), nonce.as_bytes(), b"payload")
            .unwrap();

        let not_a_point = PublicKeyBytes::from_slice(&[0u8; PUBLIC_KEY_LEN]).unwrap();
        let bad_point = server.decrypt(&not_a_point, nonce.as_bytes(), &ciphertext);
        let truncated = server.decrypt(client.public_key(), nonce.as_bytes(), &ciphertext[..4]);
        let wrong_nonce = server.decrypt(client.public_key(), &[7u8; 32], &ciphertext);
        ciphertext[0] ^= 0x01;
        let tampered = server.decrypt(client.public_key(), nonce.as_bytes(), &ciphertext);

        for result in [bad_point, truncated, wrong_nonce, tampered] {
            assert_eq!(result, Err(CryptoError::Decryption));
        }
    }

    #[test]
    fn encrypt_to_invalid_point_is_rejected() {
        let client = KeyExchangeCodec::generate();
        let zero = PublicKeyBytes::from_slice(&[0u8; PUBLIC_KEY_LEN]).unwrap();
        assert!(matches!(
            client.encrypt(&zero, &[0u8; 32], b"x"),
            Err(CryptoError::InvalidPublicKey(_))
        ));
    }

    /// Reusing a nonce with the same key pair reuses the AEAD key and IV, so
    /// the GCM keystream repeats and XOR of two ciphertexts leaks XOR of the
    /// plaintexts.
    #[test]
    fn nonce_reuse_leaks_plaintext_xor() {
        let client = KeyExchangeCodec::generate();
        let server = KeyExchangeCodec::generate();
        let nonce = [0u8; 32];

        let p1 = b"attack at dawn!!";
        let p2 = b"retreat at dusk!";
        let c1 = client.encrypt(server.public_key(), &nonce, p1).unwrap();
        let c2 = client.encrypt(server.public_key(), &nonce, p2).unwrap();

        let ct_xor: Vec<u8> = c1[..p1.len()].iter().zip(&c2[..p2.len()]).map(|(a, b)| a ^ b).collect();
        let pt_xor: Vec<u8> = p1.iter().zip(p2.iter()).map(|(a, b)| a ^ b).collect();
        assert_eq!(ct_xor, pt_xor, "keystream reuse must be observable");

        // Knowing one plaintext recovers the other.
        let recovered: Vec<u8> = ct_xor.iter().zip(p1.iter()).map(|(x, p)| x ^ p).collect();
        assert_eq!(recovered, p2);

        // A fresh nonce breaks the relation.
        let c3 = client.encrypt(server.public_key(), &[1u8; 32], p2).unwrap();
        let fresh_xor: Vec<u8> = c1[..p1.len()].iter().zip(&c3[..p2.len()]).map(|(a, b)| a ^ b).collect();
        assert_ne!(fresh_xor, pt_xor);
    }

    #[test]
    fn signature_verifies_and_rejects_foreign_key() {
        let signer = KeyExchangeCodec::generate();
        let other = KeyExchangeCodec::generate();
        let sig = signer.sign(b"message");

        assert!(KeyExchangeCodec::verify_signature(signer.public_key(), b"message", &sig));
        assert!(!KeyExchangeCodec::verify_signature(other.public_key(), b"message", &sig));
        assert!(!KeyExchangeCodec::verify_signature(signer.public_key(), b"message", &sig[..63]));
    }

    #[test]
    fn pem_loaded_codec_matches_original() {
        let original = KeyExchangeCodec::generate();
        let pem = crate::crypto::keys::signing_key_to_pem(original.signing_key()).unwrap();
        let loaded = KeyExchangeCodec::from_pem(&pem).unwrap();
        assert_eq!(loaded.public_key(), original.public_key());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_decrypt_inverts_encrypt(
            plaintext in prop::collection::vec(any::<u8>(), 0..512),
            nonce in prop::collection::vec(any::<u8>(), 8..64),
        ) {
            let client = KeyExchangeCodec::generate();
            let server = KeyExchangeCodec::generate();

            let ciphertext = client.encrypt(server.public_key(), &nonce, &plaintext).unwrap();
            let decrypted = server.decrypt(client.public_key(), &nonce, &ciphertext).unwrap();
            prop_assert_eq!(decrypted, plaintext);
        }

        #[test]
        fn prop_single_bit_flip_breaks_signature(
            message in prop::collection::vec(any::<u8>(), 1..256),
            bit in any::<prop::sample::Index>(),
            flip_signature in any::<bool>(),
        ) {
            let signer = KeyExchangeCodec::generate();
            let signature = signer.sign(&message);
            prop_assert!(KeyExchangeCodec::verify_signature(signer.public_key(), &message, &signature));

            let mut message = message;
            let mut signature = signature.to_vec();
            let target: &mut Vec<u8> = if flip_signature { &mut signature } else { &mut message };
            let index = bit.index(target.len() * 8);
            target[index / 8] ^= 1 << (index % 8);

            prop_assert!(!KeyExchangeCodec::verify_signature(signer.public_key(), &message, &signature));
        }
    }
}
