// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! OpenAI chat completions.

use reqwest::Client;
use serde_json::{json, Value};

use super::{missing, send_json, Completion, ProviderError};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const SYSTEM_PROMPT: &str = "You are a helpful assistant";

pub fn request_body(model: &str, message: &str) -> Value {
    json!({
        "model": model,
        "messages": [
            {"role": "system", "content": SYSTEM_PROMPT},
            {"role": "user", "content": message}
        ],
        "stream": false
    })
}

pub fn parse_response(body: &Value) -> Result<Completion, ProviderError> {
    let text = body
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .ok_or_else(|| missing("choices[0].message.content"))?;

    Ok(Completion {
        text: text.to_string(),
        created: body.get("created").and_then(Value::as_i64),
    })
}

pub async fn complete(
    http: &Client,
    base_url: &str,
    api_key: &str,
    model: &str,
    message: &str,
) -> Result<Completion, ProviderError> {
    let url = format!("{}/v1/chat/completions", base_url.trim_end_matches('/'));
    let body = send_json(
        http.post(url)
            .bearer_auth(api_key)
            .json(&request_body(model, message)),
    )
    .await?;
    parse_response(&body)
}
