//! AI model access for proposal generation and reply interpretation.
//!
//! The model is a pure function: prompt in, strict JSON out. A response
//! that isn't valid JSON matching the expected schema is a hard failure —
//! never coerced, never silently replaced with fallback slots.
//!
//! Modules:
//! - anthropic / openai: chat-completion providers behind [`ChatModel`]
//! - prompts: prompt builders
//! - scheduling: the propose/interpret contracts over a provider

pub mod anthropic;
pub mod openai;
pub mod prompts;
pub mod scheduling;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{AiProvider, Preferences};

#[derive(Debug, Error)]
pub enum AiError {
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),
    #[error("No {0} API key configured")]
    MissingApiKey(&'static str),
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("Model returned unusable output: {0}")]
    BadResponse(String),
}

/// One chat-completion call. Implementations carry model choice and
/// credentials; callers only see text in, text out.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, AiError>;
}

/// Build the provider selected in preferences.
///
/// API keys come from preferences first, then the provider's conventional
/// environment variable. A missing key fails loudly — the caller is
/// responsible for marking the affected thread, not for improvising slots.
pub fn provider_for(prefs: &Preferences) -> Result<Box<dyn ChatModel>, AiError> {
    match prefs.ai_provider {
        AiProvider::Anthropic => {
            let key = prefs
                .anthropic_api_key
                .clone()
                .filter(|k| !k.is_empty())
                .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
                .ok_or(AiError::MissingApiKey("anthropic"))?;
            Ok(Box::new(anthropic::AnthropicModel::new(key)))
        }
        AiProvider::Openai => {
            let key = prefs
                .openai_api_key
                .clone()
                .filter(|k| !k.is_empty())
                .or_else(|| std::env::var("OPENAI_API_KEY").ok())
                .ok_or(AiError::MissingApiKey("openai"))?;
            Ok(Box::new(openai::OpenAiModel::new(key)))
        }
    }
}
