//! OpenAI Chat Completions provider.

use async_trait::async_trait;
use serde::Deserialize;

use super::{AiError, ChatModel};
use crate::http::{send_with_retry, RetryPolicy};

const API_URL: &str = "https://api.openai.com/v1/chat/completions";
const MODEL: &str = "gpt-4o";
const MAX_TOKENS: u32 = 1024;

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct OpenAiModel {
    client: reqwest::Client,
    api_key: String,
    policy: RetryPolicy,
}

impl OpenAiModel {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            policy: RetryPolicy::default(),
        }
    }
}

#[async_trait]
impl ChatModel for OpenAiModel {
    async fn complete(&self, prompt: &str) -> Result<String, AiError> {
        let body = serde_json::json!({
            "model": MODEL,
            "max_tokens": MAX_TOKENS,
            "messages": [{ "role": "user", "content": prompt }]
        });

        let resp = send_with_retry(
            self.client.post(API_URL).bearer_auth(&self.api_key).json(&body),
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

        let parsed: ChatResponse = resp.json().await.map_err(AiError::Http)?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.is_empty())
            .ok_or_else(|| AiError::BadResponse("no completion content in response".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_response_deserialization() {
        let json = r#"{
            "id": "chatcmpl-1",
            "choices": [
                {
                    "index": 0,
                    "message": {"role": "assistant", "content": "{\"type\": \"rejection\"}"},
                    "finish_reason": "stop"
                }
            ]
        }"#;

        let parsed: ChatResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.choices.len(), 1);
        assert_eq!(
            parsed.choices[0].message.content.as_deref(),
            Some("{\"type\": \"rejection\"}")
        );
    }

    #[test]
    fn test_empty_choices() {
        let parsed: ChatResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(parsed.choices.is_empty());
    }
}
