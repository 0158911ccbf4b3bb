//! Anthropic Messages API provider.

use async_trait::async_trait;
use serde::Deserialize;

use super::{AiError, ChatModel};
use crate::http::{send_with_retry, RetryPolicy};

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const MODEL: &str = "claude-sonnet-4-20250514";
const MAX_TOKENS: u32 = 1024;

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: String,
}

pub struct AnthropicModel {
    client: reqwest::Client,
    api_key: String,
    policy: RetryPolicy,
}

impl AnthropicModel {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            policy: RetryPolicy::default(),
        }
    }
}

#[async_trait]
impl ChatModel for AnthropicModel {
    async fn complete(&self, prompt: &str) -> Result<String, AiError> {
        let body = serde_json::json!({
            "model": MODEL,
            "max_tokens": MAX_TOKENS,
            "messages": [{ "role": "user", "content": prompt }]
        });

        let resp = send_with_retry(
            self.client
                .post(API_URL)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", API_VERSION)
                .json(&body),
            &self.policy,
        )
        .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(AiError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: MessagesResponse = resp
            .json()
            .await
            .map_err(AiError::Http)?;

        parsed
            .content
            .into_iter()
            .find(|block| block.kind == "text")
            .map(|block| block.text)
            .ok_or_else(|| AiError::BadResponse("no text content in response".to_string()))
    }
}
