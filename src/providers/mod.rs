// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Model Providers
//!
//! Thin HTTP clients for the hosted model APIs the enclave can call on a
//! client's behalf. Each provider module exposes a pure request builder and
//! response parser plus one async `complete` call; [`ProviderClient`] picks
//! the provider for a [`Platform`].
//!
//! Outbound traffic from the enclave is carried by the loopback relay, so the
//! base URLs here are ordinary `https://` endpoints.

pub mod anthropic;
pub mod gemini;
pub mod openai;

use std::{fmt, str::FromStr, time::Duration};

use reqwest::Client;
use serde_json::Value;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// A hosted model platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    OpenAi,
    Anthropic,
    Gemini,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
        }
    }

    pub fn supported_models(&self) -> &'static [&'static str] {
        match self {
            Self::OpenAi => &[
                "gpt-4",
                "gpt-4-turbo",
                "gpt-4o",
                "gpt-4o-mini",
                "gpt-3.5-turbo",
                "o1",
                "o1-mini",
                "o3-mini",
            ],
            Self::Anthropic => &[
                "claude-3-7-sonnet-latest",
                "claude-3-5-sonnet-latest",
                "claude-3-5-haiku-latest",
                "claude-3-opus-latest",
            ],
            Self::Gemini => &[
                "gemini-2.0-flash",
                "gemini-2.0-flash-lite",
                "gemini-1.5-pro",
                "gemini-1.5-flash",
            ],
        }
    }

    pub fn supports(&self, model: &str) -> bool {
        self.supported_models().contains(&model)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" | "open_ai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "gemini" => Ok(Self::Gemini),
            other => Err(ProviderError::UnknownPlatform(other.to_string())),
        }
    }
}

/// Text produced by a model, with the provider's creation time when it
/// reports one (unix seconds).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub created: Option<i64>,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("unknown platform: {0}")]
    UnknownPlatform(String),

    #[error("provider request failed: {0}")]
    Request(String),

    #[error("provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("provider response was invalid: {0}")]
    InvalidResponse(String),
}

/// Base URLs for each provider. Overridable so tests can point at a local
/// server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEndpoints {
    pub openai: String,
    pub anthropic: String,
    pub gemini: String,
}

impl Default for ProviderEndpoints {
    fn default() -> Self {
        Self {
            openai: openai::DEFAULT_BASE_URL.to_string(),
            anthropic: anthropic::DEFAULT_BASE_URL.to_string(),
            gemini: gemini::DEFAULT_BASE_URL.to_string(),
        }
    }
}

impl ProviderEndpoints {
    /// Every provider served from the same base URL.
    pub fn all(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            openai: base_url.clone(),
            anthropic: base_url.clone(),
            gemini: base_url,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProviderClient {
    http: Client,
    endpoints: ProviderEndpoints,
}

impl ProviderClient {
    pub fn new(endpoints: ProviderEndpoints) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, endpoints })
    }

    pub async fn complete(
        &self,
        platform: Platform,
        api_key: &str,
        model: &str,
        message: &str,
    ) -> Result<Completion, ProviderError> {
        tracing::debug!(platform = %platform, model, "calling model provider");
        match platform {
            Platform::OpenAi => {
                openai::complete(&self.http, &self.endpoints.openai, api_key, model, message).await
            }
            Platform::Anthropic => {
                anthropic::complete(&self.http, &self.endpoints.anthropic, api_key, model, message)
                    .await
            }
            Platform::Gemini => {
                gemini::complete(&self.http, &self.endpoints.gemini, api_key, model, message).await
            }
        }
    }
}

/// Send `request` and return the parsed JSON body, mapping non-2xx statuses
/// to [`ProviderError::Status`].
async fn send_json(request: reqwest::RequestBuilder) -> Result<Value, ProviderError> {
    let response = request
        .send()
        .await
        .map_err(|e| ProviderError::Request(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::Status {
            status: status.as_u16(),
            body,
        });
    }

    response
        .json::<Value>()
        .await
        .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
}

fn missing(field: &str) -> ProviderError {
    ProviderError::InvalidResponse(format!("missing {field} in response"))
}
