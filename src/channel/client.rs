// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Client side of the secure channel.
//!
//! [`ClientEndpoint::init`] fetches and verifies the server's attestation
//! before anything else; there is no way to build an endpoint around an
//! unverified key except an unpinned verifier meeting a mock server. Each [`ClientEndpoint::send`]
//! uses a fresh nonce, so one endpoint can carry any number of sequential
//! round trips.

use std::time::Duration;

use reqwest::Client;
use url::Url;

use crate::attestation::{AttestationError, AttestationVerifier, TrustedKey};
use crate::crypto::{canonical, CryptoError, KeyExchangeCodec, Nonce, PublicKeyBytes};

use super::wire::{AttestationResponse, SignedReply, TalkReply, TalkRequest, TaskOutput, TaskRequest};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error(transparent)]
    Attestation(#[from] AttestationError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("server rejected request: {0}")]
    Rejected(String),

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("invalid server response: {0}")]
    InvalidResponse(String),

    #[error("response signature is invalid")]
    SignatureInvalid,
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub base_url: Url,
    pub timeout: Duration,
}

impl ClientOptions {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Result of one round trip.
///
/// A reply whose signature does not verify is still returned, marked
/// `Untrusted`; the caller decides what to do with it.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelReply {
    Trusted(SignedReply),
    Untrusted(SignedReply),
}

impl ChannelReply {
    pub fn is_trusted(&self) -> bool {
        matches!(self, Self::Trusted(_))
    }

    pub fn reply(&self) -> &SignedReply {
        match self {
            Self::Trusted(reply) | Self::Untrusted(reply) => reply,
        }
    }

    pub fn data(&self) -> &serde_json::Value {
        &self.reply().data
    }

    /// Parse the reply data as a [`TaskOutput`], regardless of trust.
    pub fn output(&self) -> Result<TaskOutput, ChannelError> {
        serde_json::from_value(self.data().clone())
            .map_err(|e| ChannelError::InvalidResponse(e.to_string()))
    }

    /// Parse the reply data as a [`TaskOutput`] after checking the
    /// signature. An untrusted reply is `SignatureInvalid` whatever its body.
    pub fn trusted_output(self) -> Result<(TaskOutput, SignedReply), ChannelError> {
        let reply = self.into_trusted()?;
        let output = serde_json::from_value(reply.data.clone())
            .map_err(|e| ChannelError::InvalidResponse(e.to_string()))?;
        Ok((output, reply))
    }

    /// The reply, only if its signature verified.
    pub fn into_trusted(self) -> Result<SignedReply, ChannelError> {
        match self {
            Self::Trusted(reply) => Ok(reply),
            Self::Untrusted(_) => Err(ChannelError::SignatureInvalid),
        }
    }
}

#[derive(Debug)]
pub struct ClientEndpoint {
    http: Client,
    base_url: Url,
    codec: KeyExchangeCodec,
    server: TrustedKey,
}

impl ClientEndpoint {
    /// Fetch `/attestation`, verify it, and pin the bound server key.
    pub async fn init(
        options: ClientOptions,
        codec: KeyExchangeCodec,
        verifier: &AttestationVerifier,
    ) -> Result<Self, ChannelError> {
        let http = build_http(options.timeout)?;
        let url = endpoint(&options.base_url, "attestation");

        let response = http
            .get(url)
            .send()
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ChannelError::Transport(format!(
                "attestation request returned {}",
                response.status()
            )));
        }
        let attestation: AttestationResponse = response
            .json()
            .await
            .map_err(|e| AttestationError::Decode(e.to_string()))?;

        let server = verifier.evaluate(&attestation)?;
        tracing::info!(
            server = %options.base_url,
            public_key = %server.public_key(),
            mock = server.is_mock(),
            "secure channel initialised"
        );

        Ok(Self {
            http,
            base_url: options.base_url,
            codec,
            server,
        })
    }

    #[cfg(test)]
    pub(crate) fn from_trusted(
        options: ClientOptions,
        codec: KeyExchangeCodec,
        server: TrustedKey,
    ) -> Result<Self, ChannelError> {
        Ok(Self {
            http: build_http(options.timeout)?,
            base_url: options.base_url,
            codec,
            server,
        })
    }

    pub fn server(&self) -> &TrustedKey {
        &self.server
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Where the pinned server key was attested.
    pub fn attestation_url(&self) -> String {
        endpoint(&self.base_url, "attestation")
    }

    pub fn public_key(&self) -> &PublicKeyBytes {
        self.codec.public_key()
    }

    pub fn seal(&self, task: &TaskRequest) -> Result<TalkRequest, ChannelError> {
        self.seal_with_nonce(task, &Nonce::random())
    }

    /// Encrypt `task` for the server under `nonce`. Callers must never pass
    /// the same nonce twice.
    pub fn seal_with_nonce(&self, task: &TaskRequest, nonce: &Nonce) -> Result<TalkRequest, ChannelError> {
        let plaintext = canonical::to_vec(task).map_err(|e| ChannelError::Encoding(e.to_string()))?;
        let ciphertext = self
            .codec
            .encrypt(self.server.public_key(), nonce.as_bytes(), &plaintext)?;

        Ok(TalkRequest {
            nonce: nonce.to_hex(),
            public_key: self.codec.public_key().to_hex(),
            data: hex::encode(ciphertext),
        })
    }

    /// Check a `/talk` reply against the pinned server key.
    pub fn open(&self, reply: TalkReply) -> Result<ChannelReply, ChannelError> {
        let reply = match reply {
            TalkReply::Signed(reply) => reply,
            TalkReply::Rejected { error } => return Err(ChannelError::Rejected(error)),
        };

        let message =
            canonical::value_to_vec(&reply.data).map_err(|e| ChannelError::Encoding(e.to_string()))?;
        let trusted = hex::decode(&reply.sig)
            .map(|sig| KeyExchangeCodec::verify_signature(self.server.public_key(), &message, &sig))
            .unwrap_or(false);

        if trusted {
            Ok(ChannelReply::Trusted(reply))
        } else {
            tracing::warn!(server = %self.base_url, "response signature did not verify");
            Ok(ChannelReply::Untrusted(reply))
        }
    }

    pub async fn send(&self, task: &TaskRequest) -> Result<ChannelReply, ChannelError> {
        self.send_with_nonce(task, &Nonce::random()).await
    }

    pub async fn send_with_nonce(&self, task: &TaskRequest, nonce: &Nonce) -> Result<ChannelReply, ChannelError> {
        let request = self.seal_with_nonce(task, nonce)?;
        let reply = self.post(&request).await?;
        self.open(reply)
    }

    /// POST an already-sealed request.
    pub async fn post(&self, request: &TalkRequest) -> Result<TalkReply, ChannelError> {
        let response = self
            .http
            .post(endpoint(&self.base_url, "talk"))
            .json(request)
            .send()
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;

        serde_json::from_slice(&body)
            .map_err(|e| ChannelError::InvalidResponse(format!("status {status}: {e}")))
    }
}

fn build_http(timeout: Duration) -> Result<Client, ChannelError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ChannelError::Transport(format!("failed to build HTTP client: {e}")))
}

fn endpoint(base: &Url, path: &str) -> String {
    format!("{}/{path}", base.as_str().trim_end_matches('/'))
}
