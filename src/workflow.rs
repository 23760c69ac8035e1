// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Retrieve-and-summarize research flow.
//!
//! Runs entirely on the client and reuses one [`ClientEndpoint`]:
//!
//! 1. ask the enclave which URLs would answer the question,
//! 2. fetch each URL locally (public content, not secret),
//! 3. ask the enclave to summarize each page against the question,
//! 4. ask the enclave for a final answer built from the summaries.
//!
//! Every stage is its own sealed round trip with a fresh nonce. A stage
//! whose reply fails signature verification aborts the flow. The signed
//! reply of every stage is kept in the report so a caller can hand the whole
//! chain on for independent verification.
//!
//! The flow also runs inside the enclave, against an upstream enclave, as
//! [`ChainedExecutor`](crate::executor::ChainedExecutor).

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;

use crate::channel::{ChannelError, ClientEndpoint, SignedReply, TaskOutput, TaskRequest};

/// Most URLs fetched per question.
pub const DEFAULT_MAX_SOURCES: usize = 3;

/// Page content is cut to this many characters before summarizing.
pub const MAX_CONTENT_CHARS: usize = 10_000;

pub const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

const NO_CONTENT: &str = "[No content fetched]";

pub const STAGE_URLS: &str = "urls to resolve query";
pub const STAGE_SUMMARY: &str = "summaries for the url content";
pub const STAGE_FINAL: &str = "final summary combining all url content summaries";

static URL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://[^\s,]+").expect("valid URL pattern"));

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },
}

/// Loads a public page for summarizing.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, WorkflowError>;
}

#[async_trait]
impl<T: Fetcher + ?Sized> Fetcher for Arc<T> {
    async fn fetch(&self, url: &str) -> Result<String, WorkflowError> {
        (**self).fetch(url).await
    }
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    http: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, WorkflowError> {
        let http = Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| WorkflowError::Fetch {
                url: String::new(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { http })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, WorkflowError> {
        let fail = |reason: String| WorkflowError::Fetch {
            url: url.to_string(),
            reason,
        };

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| fail(e.to_string()))?
            .error_for_status()
            .map_err(|e| fail(e.to_string()))?;
        response.text().await.map_err(|e| fail(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceSummary {
    pub url: String,
    pub summary: String,
}

/// Signed reply of one round trip, labelled with the stage that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct StageReply {
    pub description: &'static str,
    pub reply: SignedReply,
}

#[derive(Debug, Clone)]
pub struct ResearchReport {
    pub answer: String,
    pub sources: Vec<SourceSummary>,
    /// Every stage in the order it ran; the last one is the final answer.
    pub stages: Vec<StageReply>,
}

pub struct ResearchWorkflow<'a, F> {
    channel: &'a ClientEndpoint,
    fetcher: F,
    template: TaskRequest,
    max_sources: usize,
}

impl<'a, F: Fetcher> ResearchWorkflow<'a, F> {
    /// `template` supplies the API key, platform, and model for every stage;
    /// its message is replaced per stage.
    pub fn new(channel: &'a ClientEndpoint, fetcher: F, template: TaskRequest) -> Self {
        Self {
            channel,
            fetcher,
            template,
            max_sources: DEFAULT_MAX_SOURCES,
        }
    }

    pub fn with_max_sources(mut self, max_sources: usize) -> Self {
        self.max_sources = max_sources;
        self
    }

    pub async fn run(&self, question: &str) -> Result<ResearchReport, WorkflowError> {
        let mut stages = Vec::new();
        let (listing, reply) = self.ask(url_prompt(question)).await?;
        stages.push(StageReply {
            description: STAGE_URLS,
            reply,
        });
        let urls = extract_urls(&listing.response, self.max_sources);
        tracing::info!(count = urls.len(), "research sources selected");

        let mut sources = Vec::with_capacity(urls.len());
        for url in urls {
            let content = match self.fetcher.fetch(&url).await {
                Ok(content) => content,
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "source fetch failed");
                    String::new()
                }
            };

            let summary = if content.trim().is_empty() {
                NO_CONTENT.to_string()
            } else {
                let (output, reply) = self.ask(summary_prompt(question, &url, &content)).await?;
                stages.push(StageReply {
                    description: STAGE_SUMMARY,
                    reply,
                });
                output.response
            };
            sources.push(SourceSummary { url, summary });
        }

        let (output, reply) = self.ask(final_prompt(question, &sources)).await?;
        stages.push(StageReply {
            description: STAGE_FINAL,
            reply,
        });
        Ok(ResearchReport {
            answer: output.response,
            sources,
            stages,
        })
    }

    async fn ask(&self, message: String) -> Result<(TaskOutput, SignedReply), WorkflowError> {
        let task = TaskRequest {
            message,
            ..self.template.clone()
        };
        Ok(self.channel.send(&task).await?.trusted_output()?)
    }
}

/// URLs in `text`, in order of appearance, without duplicates.
pub fn extract_urls(text: &str, limit: usize) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();
    for found in URL_PATTERN.find_iter(text) {
        if urls.len() >= limit {
            break;
        }
        let url = found
            .as_str()
            .trim_end_matches(['.', ')', ']', '>', '"', '\'']);
        if !urls.iter().any(|seen| seen == url) {
            urls.push(url.to_string());
        }
    }
    urls
}

fn url_prompt(question: &str) -> String {
    format!(
        "List exact URLs (no explanations, just the URLs, one per line) \
         that would help answer the following question:\n\n{question}\n"
    )
}

fn summary_prompt(question: &str, url: &str, content: &str) -> String {
    let content: String = content.chars().take(MAX_CONTENT_CHARS).collect();
    format!(
        "Given the original question:\n{question}\n\n\
         Summarize the following content from {url} in a way that is relevant \
         to the question. If the content is not useful, say so.\n\n{content}"
    )
}

fn final_prompt(question: &str, sources: &[SourceSummary]) -> String {
    let combined = sources
        .iter()
        .map(|s| format!("URL: {}\nSummary: {}", s.url, s.summary))
        .collect::<Vec<_>>()
        .join("\n\n");
    format!(
        "Given the original question:\n{question}\n\n\
         and the following summaries from various sources:\n\n{combined}\n\n\
         Provide a concise, well-sourced answer to the original question."
    )
}
