//! LLM integration for the gpt task.
//!
//! A single OpenAI-compatible chat backend over `reqwest`; any server that
//! speaks `/chat/completions` works by pointing `EMALIA_LLM_BASE_URL` at it.

mod openai;

pub use openai::OpenAiClient;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::LlmError;

/// Default API base.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Default model when neither config nor the message names one.
pub const DEFAULT_MODEL: &str = "gpt-4";

/// Configuration for creating an LLM client.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: secrecy::SecretString,
    pub base_url: String,
    pub model: String,
}

impl LlmConfig {
    /// Build config from environment variables.
    /// Returns `None` if no API key is set.
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("GPT_API_KEY")
            .or_else(|| lookup("OPENAI_API_KEY"))
            .filter(|k| !k.trim().is_empty())?;
        let base_url = lookup("EMALIA_LLM_BASE_URL")
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let model = lookup("EMALIA_LLM_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());

        Some(Self {
            api_key: secrecy::SecretString::from(api_key),
            base_url,
            model,
        })
    }
}

/// One completion request; unset options use the provider's defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,
}

/// A text completion backend.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Model used when a request leaves `model` empty.
    fn default_model(&self) -> &str;

    /// Run the request; one string per returned choice.
    async fn complete(&self, request: &CompletionRequest) -> Result<Vec<String>, LlmError>;
}

/// Largest `max_tokens` accepted by a model.
pub fn max_tokens_for(model: &str) -> u32 {
    match model {
        "text-davinci-003" => 4096,
        "davinci" => 2049,
        "code-davinci-002" => 8000,
        "text-curie-001" => 2049,
        "gpt-3" => 4096,
        "gpt-3.5-turbo" => 4095,
        "gpt-4" => 8191,
        "gpt-4-32k" => 32767,
        _ => 2048,
    }
}
