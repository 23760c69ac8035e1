// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Google Gemini `generateContent`.

use chrono::DateTime;
use reqwest::Client;
use serde_json::{json, Value};

use super::{missing, send_json, Completion, ProviderError};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

pub fn request_body(message: &str) -> Value {
    json!({
        "contents": [{"role": "user", "parts": [{"text": message}]}]
    })
}

pub fn parse_response(body: &Value) -> Result<Completion, ProviderError> {
    let text = body
        .pointer("/candidates/0/content/parts/0/text")
        .and_then(Value::as_str)
        .ok_or_else(|| missing("candidates[0].content.parts[0].text"))?;

    let created = body
        .get("createTime")
        .and_then(Value::as_str)
        .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
        .map(|ts| ts.timestamp());

    Ok(Completion {
        text: text.to_string(),
        created,
    })
}

pub async fn complete(
    http: &Client,
    base_url: &str,
    api_key: &str,
    model: &str,
    message: &str,
) -> Result<Completion, ProviderError> {
    let url = format!(
        "{}/v1beta/models/{model}:generateContent",
        base_url.trim_end_matches('/')
    );
    let body = send_json(
        http.post(url)
            .query(&[("key", api_key)])
            .json(&request_body(message)),
    )
    .await?;
    parse_response(&body)
}
