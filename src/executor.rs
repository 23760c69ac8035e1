// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Task Execution
//!
//! The secure channel never decides what work a decrypted request performs.
//! It hands the fields to an [`Executor`] and signs whatever comes back.
//! [`ModelExecutor`] is the production implementation: it forwards the
//! message to the requested hosted model using the caller's credential.
//! [`ChainedExecutor`] instead runs the research flow against an upstream
//! enclave and returns every signed stage reply as the trace.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::OnceCell;

use crate::attestation::AttestationVerifier;
use crate::channel::wire::{TaskOutput, TaskRequest};
use crate::channel::{ClientEndpoint, ClientOptions};
use crate::crypto::KeyExchangeCodec;
use crate::providers::{Platform, ProviderClient, ProviderEndpoints, ProviderError};
use crate::workflow::{Fetcher, ResearchWorkflow};

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("unsupported model {model} for platform {platform}")]
    UnsupportedModel { platform: String, model: String },

    #[error("model provider error: {0}")]
    Provider(String),

    #[error("upstream enclave error: {0}")]
    Upstream(String),

    #[error("executor failed: {0}")]
    Failed(String),
}

impl From<ProviderError> for ExecutorError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::UnknownPlatform(name) => Self::UnsupportedPlatform(name),
            other => Self::Provider(other.to_string()),
        }
    }
}

/// Produces the plaintext result for one decrypted request.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, request: TaskRequest) -> Result<TaskOutput, ExecutorError>;
}

/// Calls a hosted model on the platform named in the request.
#[derive(Debug, Clone)]
pub struct ModelExecutor {
    providers: ProviderClient,
}

impl ModelExecutor {
    pub fn new(endpoints: ProviderEndpoints) -> Result<Self, ExecutorError> {
        Ok(Self {
            providers: ProviderClient::new(endpoints)?,
        })
    }
}

#[async_trait]
impl Executor for ModelExecutor {
    async fn execute(&self, request: TaskRequest) -> Result<TaskOutput, ExecutorError> {
        let platform: Platform = request.platform.parse()?;
        if !platform.supports(&request.ai_model) {
            return Err(ExecutorError::UnsupportedModel {
                platform: platform.to_string(),
                model: request.ai_model,
            });
        }

        let completion = self
            .providers
            .complete(platform, &request.api_key, &request.ai_model, &request.message)
            .await?;

        Ok(TaskOutput {
            response: completion.text,
            platform: Some(platform.to_string()),
            ai_model: Some(request.ai_model),
            timestamp: Some(completion.created.unwrap_or_else(|| Utc::now().timestamp())),
            message: Some(request.message),
            trace: None,
        })
    }
}

/// Answers a request by running [`ResearchWorkflow`] against an upstream
/// enclave.
///
/// The upstream channel is attested on first use and reused afterwards; a
/// failed attestation is retried by the next request. The output's `trace`
/// holds one entry per stage with the upstream's `data` and `sig`, the
/// `attestation_endpoint` that vouches for the signing key, and a
/// `description` of the stage.
pub struct ChainedExecutor {
    options: ClientOptions,
    verifier: AttestationVerifier,
    fetcher: Arc<dyn Fetcher>,
    upstream: OnceCell<ClientEndpoint>,
}

impl ChainedExecutor {
    pub fn new(options: ClientOptions, verifier: AttestationVerifier, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            options,
            verifier,
            fetcher,
            upstream: OnceCell::new(),
        }
    }

    async fn upstream(&self) -> Result<&ClientEndpoint, ExecutorError> {
        self.upstream
            .get_or_try_init(|| async {
                tracing::info!(upstream = %self.options.base_url, "attesting upstream enclave");
                ClientEndpoint::init(self.options.clone(), KeyExchangeCodec::generate(), &self.verifier).await
            })
            .await
            .map_err(|e| ExecutorError::Upstream(e.to_string()))
    }
}

#[async_trait]
impl Executor for ChainedExecutor {
    async fn execute(&self, request: TaskRequest) -> Result<TaskOutput, ExecutorError> {
        let upstream = self.upstream().await?;
        let question = request.message.clone();

        let report = ResearchWorkflow::new(upstream, self.fetcher.clone(), request.clone())
            .run(&question)
            .await
            .map_err(|e| ExecutorError::Upstream(e.to_string()))?;

        let attestation_endpoint = upstream.attestation_url();
        let trace = report
            .stages
            .into_iter()
            .map(|stage| {
                json!({
                    "data": stage.reply.data,
                    "sig": stage.reply.sig,
                    "attestation_endpoint": attestation_endpoint,
                    "description": stage.description,
                })
            })
            .collect();

        Ok(TaskOutput {
            response: report.answer,
            platform: Some(request.platform),
            ai_model: Some(request.ai_model),
            timestamp: Some(Utc::now().timestamp()),
            message: Some(question),
            trace: Some(Value::Array(trace)),
        })
    }
}
