// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Anthropic messages API.

use reqwest::Client;
use serde_json::{json, Value};

use super::{missing, send_json, Completion, ProviderError};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 1024;

pub fn request_body(model: &str, message: &str) -> Value {
    json!({
        "model": model,
        "max_tokens": MAX_TOKENS,
        "messages": [{"role": "user", "content": message}]
    })
}

/// The messages API reports no creation time.
pub fn parse_response(body: &Value) -> Result<Completion, ProviderError> {
    let text = body
        .pointer("/content/0/text")
        .and_then(Value::as_str)
        .ok_or_else(|| missing("content[0].text"))?;

    Ok(Completion {
        text: text.to_string(),
        created: None,
    })
}

pub async fn complete(
    http: &Client,
    base_url: &str,
    api_key: &str,
    model: &str,
    message: &str,
) -> Result<Completion, ProviderError> {
    let url = format!("{}/v1/messages", base_url.trim_end_matches('/'));
    let body = send_json(
        http.post(url)
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request_body(model, message)),
    )
    .await?;
    parse_response(&body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_sets_token_limit() {
        let body = request_body("claude-3-5-haiku-latest", "ping");
        assert_eq!(body["max_tokens"], 1024);
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn parses_first_text_block() {
        let body = json!({"content": [{"type": "text", "text": "pong"}]});
        assert_eq!(parse_response(&body).unwrap().text, "pong");
        assert!(parse_response(&json!({"content": []})).is_err());
    }
}
