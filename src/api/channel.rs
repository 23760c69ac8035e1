// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use chrono::Utc;
use serde::Serialize;
use utoipa::ToSchema;

use crate::channel::{AttestationResponse, SignedReply, TalkRequest};
use crate::error::{ApiError, ErrorBody};
use crate::state::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct PongResponse {
    /// Server time, unix seconds.
    pub pong: i64,
}

#[utoipa::path(
    get,
    path = "/ping",
    tag = "Channel",
    responses((status = 200, description = "Server is up", body = PongResponse))
)]
pub async fn ping() -> Json<PongResponse> {
    Json(PongResponse {
        pong: Utc::now().timestamp(),
    })
}

/// Boot-time attestation of the channel key.
#[utoipa::path(
    get,
    path = "/attestation",
    tag = "Channel",
    responses((status = 200, description = "Attestation document or mock key", body = AttestationResponse))
)]
pub async fn attestation(State(state): State<AppState>) -> Json<AttestationResponse> {
    Json(state.endpoint.attestation())
}

/// Decrypt a request, execute it, and return the signed result.
#[utoipa::path(
    post,
    path = "/talk",
    tag = "Channel",
    request_body = TalkRequest,
    responses(
        (status = 200, description = "Signed result", body = SignedReply),
        (status = 400, description = "Invalid nonce, malformed request, or decryption failure", body = ErrorBody),
        (status = 422, description = "Required field empty", body = ErrorBody),
        (status = 502, description = "Executor failed", body = ErrorBody)
    )
)]
pub async fn talk(
    State(state): State<AppState>,
    payload: Result<Json<TalkRequest>, JsonRejection>,
) -> Result<Json<SignedReply>, ApiError> {
    let Json(request) = payload?;
    match state.endpoint.talk(&request).await {
        Ok(reply) => Ok(Json(reply)),
        Err(e) => {
            tracing::warn!(error = %e, "talk request rejected");
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::http::StatusCode;

    use crate::channel::wire::{TaskOutput, TaskRequest};
    use crate::channel::ServerEndpoint;
    use crate::crypto::{canonical, KeyExchangeCodec};
    use crate::executor::{Executor, ExecutorError};

    struct Hello;

    #[async_trait]
    impl Executor for Hello {
        async fn execute(&self, _: TaskRequest) -> Result<TaskOutput, ExecutorError> {
            Ok(TaskOutput::text("hello"))
        }
    }

    fn state() -> AppState {
        AppState::new(ServerEndpoint::mock(KeyExchangeCodec::generate(), Arc::new(Hello)))
    }

    #[tokio::test]
    async fn ping_returns_current_time() {
        let before = Utc::now().timestamp();
        let Json(pong) = ping().await;
        assert!(pong.pong >= before);
    }

    #[tokio::test]
    async fn attestation_exposes_endpoint_key() {
        let state = state();
        let Json(response) = attestation(State(state.clone())).await;
        match response {
            AttestationResponse::Mock { attestation_doc, .. } => {
                assert_eq!(&attestation_doc.public_key, state.endpoint.public_key());
            }
            other => panic!("expected mock attestation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn talk_returns_signed_reply() {
        let state = state();
        let client = KeyExchangeCodec::generate();
        let nonce = [0u8; 32];
        let payload = serde_json::to_vec(&TaskRequest::new("key", "hi")).unwrap();
        let request = TalkRequest {
            nonce: hex::encode(nonce),
            public_key: client.public_key().to_hex(),
            data: hex::encode(client.encrypt(state.endpoint.public_key(), &nonce, &payload).unwrap()),
        };

        let Json(reply) = talk(State(state.clone()), Ok(Json(request))).await.unwrap();
        assert_eq!(reply.data, serde_json::json!({"response": "hello"}));
        let sig = hex::decode(&reply.sig).unwrap();
        let message = canonical::value_to_vec(&reply.data).unwrap();
        assert!(KeyExchangeCodec::verify_signature(state.endpoint.public_key(), &message, &sig));
    }

    #[tokio::test]
    async fn talk_maps_short_nonce_to_bad_request() {
        let request = TalkRequest {
            nonce: "01".to_string(),
            public_key: String::new(),
            data: String::new(),
        };
        let err = talk(State(state()), Ok(Json(request))).await.unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "invalid nonce, must be at least 8 bytes long");
    }
}
