// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JSON bodies exchanged on `/attestation` and `/talk`, and the plaintext
//! structures carried inside them.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::crypto::PublicKeyBytes;

/// Body of `GET /attestation`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum AttestationResponse {
    /// `{"mock": true, "attestation_doc": {"public_key": "<hex>"}}`
    Mock {
        mock: bool,
        attestation_doc: MockDocument,
    },
    /// `{"attestation_doc": "<base64 signed document>"}`
    Real { attestation_doc: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MockDocument {
    #[schema(value_type = String)]
    pub public_key: PublicKeyBytes,
}

/// Body of `POST /talk`. All fields are hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TalkRequest {
    pub nonce: String,
    pub public_key: String,
    pub data: String,
}

/// Signed result returned by `/talk`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SignedReply {
    /// Plaintext result fields.
    #[schema(value_type = Object)]
    pub data: Value,
    /// Hex signature over the canonical encoding of `data`.
    pub sig: String,
}

/// Any body `/talk` may answer with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TalkReply {
    Signed(SignedReply),
    Rejected { error: String },
}

/// Decrypted `/talk` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub api_key: String,
    pub message: String,
    #[serde(default = "default_platform")]
    pub platform: String,
    #[serde(default = "default_model")]
    pub ai_model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

fn default_platform() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4".to_string()
}

impl TaskRequest {
    pub fn new(api_key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            message: message.into(),
            platform: default_platform(),
            ai_model: default_model(),
            parameters: None,
        }
    }

    pub fn with_model(mut self, platform: impl Into<String>, ai_model: impl Into<String>) -> Self {
        self.platform = platform.into();
        self.ai_model = ai_model.into();
        self
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = Some(parameters);
        self
    }
}

/// Plaintext result produced by an executor and signed by the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskOutput {
    pub response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_model: Option<String>,
    /// Unix seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<Value>,
}

impl TaskOutput {
    pub fn text(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn attestation_response_distinguishes_mock_and_real() {
        let mock: AttestationResponse = serde_json::from_value(json!({
            "mock": true,
            "attestation_doc": {"public_key": "00".repeat(64)}
        }))
        .unwrap();
        assert!(matches!(mock, AttestationResponse::Mock { mock: true, .. }));

        let real: AttestationResponse =
            serde_json::from_value(json!({"attestation_doc": "ZXhhbXBsZQ=="})).unwrap();
        assert_eq!(
            real,
            AttestationResponse::Real {
                attestation_doc: "ZXhhbXBsZQ==".to_string()
            }
        );
    }

    #[test]
    fn mock_response_with_short_key_is_rejected() {
        let result = serde_json::from_value::<AttestationResponse>(json!({
            "mock": true,
            "attestation_doc": {"public_key": "abcd"}
        }));
        assert!(result.is_err());
    }

    #[test]
    fn task_request_fills_defaults() {
        let request: TaskRequest =
            serde_json::from_value(json!({"api_key": "k", "message": "hi"})).unwrap();
        assert_eq!(request.platform, "openai");
        assert_eq!(request.ai_model, "gpt-4");
        assert!(request.parameters.is_none());
    }

    #[test]
    fn minimal_output_serializes_to_response_only() {
        let value = serde_json::to_value(TaskOutput::text("hello")).unwrap();
        assert_eq!(value, json!({"response": "hello"}));
    }

    #[test]
    fn talk_reply_parses_error_body() {
        let reply: TalkReply = serde_json::from_value(json!({"error": "nope"})).unwrap();
        assert_eq!(
            reply,
            TalkReply::Rejected {
                error: "nope".to_string()
            }
        );

        let signed: TalkReply =
            serde_json::from_value(json!({"data": {"response": "x"}, "sig": "ab"})).unwrap();
        assert!(matches!(signed, TalkReply::Signed(_)));
    }
}
