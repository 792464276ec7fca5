//! Chat completion provider abstraction and implementations.
//!
//! Defines the [`ChatProvider`] trait and two HTTP backends mirroring
//! the embedding side:
//! - **OpenAI-compatible** — `POST {url}/v1/chat/completions`,
//!   credential from the environment variable named in `llm.api_key_env`.
//! - **Ollama** — `POST {url}/api/chat` with `stream: false`.
//!
//! Retry behavior is shared with the embedding providers (bounded
//! exponential backoff on 429/5xx/network errors). Exhausting retries
//! yields [`PipelineError::Generation`]; the pipeline never substitutes
//! a fabricated answer for a failed call.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::embedding::post_with_backoff;
use crate::error::PipelineError;

/// Narrow seam over LLM backends: one prompt in, one completion out.
/// Tests substitute a canned-response stub.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn model_name(&self) -> &str;
    /// Run one completion with a system instruction and a user message.
    async fn complete(&self, system: &str, user: &str) -> Result<String, PipelineError>;
}

pub fn create_provider(config: &LlmConfig) -> Result<Box<dyn ChatProvider>> {
    match config.provider.as_str() {
        "openai" => Ok(Box::new(OpenAiChat::new(config)?)),
        "ollama" => Ok(Box::new(OllamaChat::new(config)?)),
        "disabled" => bail!("LLM provider is disabled. Set [llm] provider in config."),
        other => bail!("Unknown llm provider: {}", other),
    }
}

// ============ OpenAI-compatible provider ============

pub struct OpenAiChat {
    model: String,
    url: String,
    api_key: String,
    temperature: f64,
    max_tokens: u32,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiChat {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("llm.model required for openai provider"))?;
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| anyhow::anyhow!("{} environment variable not set", config.api_key_env))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com".to_string());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            url,
            api_key,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl ChatProvider for OpenAiChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String, PipelineError> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });

        let json = post_with_backoff(
            &self.client,
            &format!("{}/v1/chat/completions", self.url),
            Some(&self.api_key),
            &body,
            self.max_retries,
            "openai",
        )
        .await
        .map_err(|e| PipelineError::Generation {
            provider: "openai".to_string(),
            reason: e.reason,
        })?;

        json.get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|t| t.as_str())
            .map(|s| s.trim().to_string())
            .ok_or_else(|| PipelineError::Generation {
                provider: "openai".to_string(),
                reason: "Invalid response: missing choices[0].message.content".to_string(),
            })
    }
}

// ============ Ollama provider ============

pub struct OllamaChat {
    model: String,
    url: String,
    temperature: f64,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaChat {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("llm.model required for ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            url,
            temperature: config.temperature,
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl ChatProvider for OllamaChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String, PipelineError> {
        let body = serde_json::json!({
            "model": self.model,
            "stream": false,
            "options": {"temperature": self.temperature},
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });

        let json = post_with_backoff(
            &self.client,
            &format!("{}/api/chat", self.url),
            None,
            &body,
            self.max_retries,
            "ollama",
        )
        .await
        .map_err(|e| PipelineError::Generation {
            provider: "ollama".to_string(),
            reason: e.reason,
        })?;

        json.get("message")
            .and_then(|m| m.get("content"))
            .and_then(|t| t.as_str())
            .map(|s| s.trim().to_string())
            .ok_or_else(|| PipelineError::Generation {
                provider: "ollama".to_string(),
                reason: "Invalid response: missing message.content".to_string(),
            })
    }
}
