// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Server side of the secure channel.

use std::sync::Arc;

use crate::attestation::SignedAttestation;
use crate::crypto::{canonical, CryptoError, KeyExchangeCodec, PublicKeyBytes, MIN_NONCE_LEN};
use crate::executor::{Executor, ExecutorError};

use super::wire::{AttestationResponse, MockDocument, SignedReply, TalkRequest, TaskRequest};

/// Why a `/talk` request was rejected.
#[derive(Debug, thiserror::Error)]
pub enum TalkError {
    #[error("invalid nonce, must be at least 8 bytes long")]
    InvalidNonce,

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("decryption failed")]
    DecryptionFailure,

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("invalid {0}")]
    MissingField(&'static str),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error("failed to sign response: {0}")]
    Signing(String),
}

/// What the server publishes on `/attestation`. Fixed at boot.
#[derive(Debug, Clone)]
pub enum ServerAttestation {
    Real {
        document: SignedAttestation,
        encoded: String,
    },
    Mock {
        public_key: PublicKeyBytes,
    },
}

impl ServerAttestation {
    pub fn real(document: SignedAttestation) -> Result<Self, crate::attestation::AttestationError> {
        let encoded = document.encode()?;
        Ok(Self::Real { document, encoded })
    }

    pub fn mock(public_key: PublicKeyBytes) -> Self {
        Self::Mock { public_key }
    }

    pub fn public_key(&self) -> &PublicKeyBytes {
        match self {
            Self::Real { document, .. } => document.public_key(),
            Self::Mock { public_key } => public_key,
        }
    }

    pub fn response(&self) -> AttestationResponse {
        match self {
            Self::Real { encoded, .. } => AttestationResponse::Real {
                attestation_doc: encoded.clone(),
            },
            Self::Mock { public_key } => AttestationResponse::Mock {
                mock: true,
                attestation_doc: MockDocument {
                    public_key: *public_key,
                },
            },
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("attested key {attested} does not match channel key {actual}")]
pub struct KeyMismatch {
    pub attested: PublicKeyBytes,
    pub actual: PublicKeyBytes,
}

/// Decrypts requests, runs them through the executor, and signs results.
///
/// Holds nothing mutable: the codec and attestation are fixed at
/// construction and shared read-only across concurrent requests.
pub struct ServerEndpoint {
    codec: KeyExchangeCodec,
    attestation: ServerAttestation,
    executor: Arc<dyn Executor>,
}

impl ServerEndpoint {
    pub fn new(
        codec: KeyExchangeCodec,
        attestation: ServerAttestation,
        executor: Arc<dyn Executor>,
    ) -> Result<Self, KeyMismatch> {
        if attestation.public_key() != codec.public_key() {
            return Err(KeyMismatch {
                attested: *attestation.public_key(),
                actual: *codec.public_key(),
            });
        }
        Ok(Self {
            codec,
            attestation,
            executor,
        })
    }

    /// Server publishing a mock attestation of its own key.
    pub fn mock(codec: KeyExchangeCodec, executor: Arc<dyn Executor>) -> Self {
        let attestation = ServerAttestation::mock(*codec.public_key());
        Self {
            codec,
            attestation,
            executor,
        }
    }

    pub fn attestation(&self) -> AttestationResponse {
        self.attestation.response()
    }

    pub fn public_key(&self) -> &PublicKeyBytes {
        self.codec.public_key()
    }

    pub async fn talk(&self, request: &TalkRequest) -> Result<SignedReply, TalkError> {
        let nonce = decode_hex("nonce", &request.nonce)?;
        if nonce.len() < MIN_NONCE_LEN {
            return Err(TalkError::InvalidNonce);
        }

        let peer = PublicKeyBytes::from_hex(&request.public_key)
            .map_err(|e| TalkError::MalformedRequest(e.to_string()))?;
        let ciphertext = decode_hex("data", &request.data)?;

        let plaintext = self
            .codec
            .decrypt(&peer, &nonce, &ciphertext)
            .map_err(|_: CryptoError| TalkError::DecryptionFailure)?;

        let task: TaskRequest = serde_json::from_slice(&plaintext)
            .map_err(|e| TalkError::MalformedPayload(e.to_string()))?;
        if task.api_key.is_empty() {
            return Err(TalkError::MissingField("api_key"));
        }
        if task.ai_model.is_empty() {
            return Err(TalkError::MissingField("ai_model"));
        }

        tracing::info!(
            peer = %peer,
            platform = %task.platform,
            ai_model = %task.ai_model,
            "executing channel request"
        );
        let output = self.executor.execute(task).await?;

        let data = serde_json::to_value(&output).map_err(|e| TalkError::Signing(e.to_string()))?;
        let message = canonical::value_to_vec(&data).map_err(|e| TalkError::Signing(e.to_string()))?;
        let sig = hex::encode(self.codec.sign(&message));

        Ok(SignedReply { data, sig })
    }
}

fn decode_hex(field: &str, value: &str) -> Result<Vec<u8>, TalkError> {
    hex::decode(value).map_err(|e| TalkError::MalformedRequest(format!("{field}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::attestation::LocalAuthority;
    use crate::channel::wire::TaskOutput;
    use crate::crypto::Nonce;

    #[derive(Default)]
    struct CountingExecutor {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Executor for CountingExecutor {
        async fn execute(&self, request: TaskRequest) -> Result<TaskOutput, ExecutorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(TaskOutput::text(format!("echo: {}", request.message)))
        }
    }

    struct FailingExecutor;

    #[async_trait]
    impl Executor for FailingExecutor {
        async fn execute(&self, _: TaskRequest) -> Result<TaskOutput, ExecutorError> {
            Err(ExecutorError::Failed("boom".to_string()))
        }
    }

    fn sealed(client: &KeyExchangeCodec, server: &PublicKeyBytes, nonce: &[u8], payload: &[u8]) -> TalkRequest {
        TalkRequest {
            nonce: hex::encode(nonce),
            public_key: client.public_key().to_hex(),
            data: hex::encode(client.encrypt(server, nonce, payload).unwrap()),
        }
    }

    fn task_bytes(api_key: &str, model: &str) -> Vec<u8> {
        serde_json::to_vec(&TaskRequest::new(api_key, "hi").with_model("openai", model)).unwrap()
    }

    #[tokio::test]
    async fn talk_decrypts_executes_and_signs() {
        let executor = Arc::new(CountingExecutor::default());
        let server = ServerEndpoint::mock(KeyExchangeCodec::generate(), executor.clone());
        let client = KeyExchangeCodec::generate();
        let nonce = Nonce::random();

        let request = sealed(&client, server.public_key(), nonce.as_bytes(), &task_bytes("k", "gpt-4"));
        let reply = server.talk(&request).await.unwrap();

        assert_eq!(reply.data["response"], "echo: hi");
        let message = canonical::value_to_vec(&reply.data).unwrap();
        let sig = hex::decode(&reply.sig).unwrap();
        assert!(KeyExchangeCodec::verify_signature(server.public_key(), &message, &sig));
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn short_nonce_is_rejected_before_decryption() {
        let executor = Arc::new(CountingExecutor::default());
        let server = ServerEndpoint::mock(KeyExchangeCodec::generate(), executor.clone());
        let request = TalkRequest {
            nonce: "00112233".to_string(),
            // Not even a valid key or ciphertext: the nonce check runs first.
            public_key: "zz".to_string(),
            data: "zz".to_string(),
        };

        let err = server.talk(&request).await.unwrap_err();
        assert!(matches!(err, TalkError::InvalidNonce));
        assert_eq!(err.to_string(), "invalid nonce, must be at least 8 bytes long");
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn ciphertext_for_another_key_is_a_decryption_failure() {
        let server = ServerEndpoint::mock(KeyExchangeCodec::generate(), Arc::new(CountingExecutor::default()));
        let client = KeyExchangeCodec::generate();
        let someone_else = KeyExchangeCodec::generate();

        let request = sealed(&client, someone_else.public_key(), &[7u8; 32], &task_bytes("k", "gpt-4"));
        assert!(matches!(
            server.talk(&request).await,
            Err(TalkError::DecryptionFailure)
        ));
    }

    #[tokio::test]
    async fn empty_required_fields_are_rejected() {
        let server = ServerEndpoint::mock(KeyExchangeCodec::generate(), Arc::new(CountingExecutor::default()));
        let client = KeyExchangeCodec::generate();

        let no_key = sealed(&client, server.public_key(), &[1u8; 32], &task_bytes("", "gpt-4"));
        assert!(matches!(
            server.talk(&no_key).await,
            Err(TalkError::MissingField("api_key"))
        ));

        let no_model = sealed(&client, server.public_key(), &[2u8; 32], &task_bytes("k", ""));
        assert!(matches!(
            server.talk(&no_model).await,
            Err(TalkError::MissingField("ai_model"))
        ));
    }

    #[tokio::test]
    async fn non_task_plaintext_is_malformed_payload() {
        let server = ServerEndpoint::mock(KeyExchangeCodec::generate(), Arc::new(CountingExecutor::default()));
        let client = KeyExchangeCodec::generate();

        let request = sealed(&client, server.public_key(), &[3u8; 32], b"[1,2,3]");
        assert!(matches!(
            server.talk(&request).await,
            Err(TalkError::MalformedPayload(_))
        ));
    }

    #[tokio::test]
    async fn bad_hex_is_malformed_request() {
        let server = ServerEndpoint::mock(KeyExchangeCodec::generate(), Arc::new(CountingExecutor::default()));
        let request = TalkRequest {
            nonce: "not hex".to_string(),
            public_key: String::new(),
            data: String::new(),
        };
        assert!(matches!(
            server.talk(&request).await,
            Err(TalkError::MalformedRequest(_))
        ));
    }

    #[tokio::test]
    async fn executor_errors_propagate() {
        let server = ServerEndpoint::mock(KeyExchangeCodec::generate(), Arc::new(FailingExecutor));
        let client = KeyExchangeCodec::generate();
        let request = sealed(&client, server.public_key(), &[4u8; 32], &task_bytes("k", "gpt-4"));

        assert!(matches!(server.talk(&request).await, Err(TalkError::Executor(_))));
    }

    #[test]
    fn attestation_must_bind_the_channel_key() {
        let authority = LocalAuthority::generate("root", chrono::Duration::days(1));
        let codec = KeyExchangeCodec::generate();
        let other = KeyExchangeCodec::generate();
        let document = authority
            .attest(other.public_key(), "enc", BTreeMap::new(), None)
            .unwrap();

        let attestation = ServerAttestation::real(document).unwrap();
        assert!(ServerEndpoint::new(codec, attestation, Arc::new(FailingExecutor)).is_err());
    }

    #[test]
    fn mock_attestation_response_carries_public_key() {
        let server = ServerEndpoint::mock(KeyExchangeCodec::generate(), Arc::new(FailingExecutor));
        match server.attestation() {
            AttestationResponse::Mock { mock, attestation_doc } => {
                assert!(mock);
                assert_eq!(&attestation_doc.public_key, server.public_key());
            }
            other => panic!("expected mock attestation, got {other:?}"),
        }
    }
}
