// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    channel::{
        wire::{AttestationResponse, MockDocument},
        SignedReply, TalkRequest,
    },
    error::ErrorBody,
    state::AppState,
};

pub mod channel;
pub mod health;

pub fn router(state: AppState) -> Router {
    let routes = Router::new()
        .route("/ping", get(channel::ping))
        .route("/attestation", get(channel::attestation))
        .route("/talk", post(channel::talk))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .with_state(state);

    routes
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

#[derive(OpenApi)]
#[openapi(
    paths(
        channel::ping,
        channel::attestation,
        channel::talk,
        health::liveness,
        health::readiness
    ),
    components(
        schemas(
            AttestationResponse,
            MockDocument,
            TalkRequest,
            SignedReply,
            ErrorBody,
            channel::PongResponse,
            health::HealthResponse,
            health::ReadyResponse,
            health::HealthChecks
        )
    ),
    tags(
        (name = "Channel", description = "Attested secure channel"),
        (name = "Health", description = "Liveness and readiness probes")
    )
)]
struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::channel::wire::{TaskOutput, TaskRequest};
    use crate::channel::ServerEndpoint;
    use crate::crypto::KeyExchangeCodec;
    use crate::executor::{Executor, ExecutorError};

    struct Noop;

    #[async_trait]
    impl Executor for Noop {
        async fn execute(&self, _: TaskRequest) -> Result<TaskOutput, ExecutorError> {
            Ok(TaskOutput::default())
        }
    }

    fn app() -> Router {
        router(AppState::new(ServerEndpoint::mock(
            KeyExchangeCodec::generate(),
            Arc::new(Noop),
        )))
    }

    #[tokio::test]
    async fn ping_route_is_mounted() {
        let response = app()
            .oneshot(Request::get("/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn malformed_talk_body_is_json_error() {
        let response = app()
            .oneshot(
                Request::post("/talk")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"nonce": 1}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(body["error"].as_str().unwrap().starts_with("malformed request"));
    }

    #[test]
    fn openapi_lists_channel_paths() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/talk"));
        assert!(doc.paths.paths.contains_key("/attestation"));
    }
}
