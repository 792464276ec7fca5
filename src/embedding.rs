//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait and two HTTP backends:
//! - **OpenAI-compatible** — `POST {url}/v1/embeddings`, credential from
//!   the environment variable named in `embedding.api_key_env`.
//! - **Ollama** — `POST {url}/api/embed` against a local instance.
//!
//! Both backends retry transient failures with exponential backoff
//! (1s, 2s, 4s, ... capped at 2^5): HTTP 429 and 5xx and network
//! errors are retried, any other 4xx fails immediately. Exhausting
//! retries yields [`PipelineError::Embedding`] so callers can isolate
//! the failing batch instead of aborting a build.
//!
//! Also provides the vector helpers shared by the indexer and
//! retriever: [`vec_to_blob`]/[`blob_to_vec`] for SQLite BLOB storage
//! and [`cosine_similarity`] for the semantic channel.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::PipelineError;

/// Maps text to fixed-dimension vectors. The single seam the pipeline
/// has on embedding backends, so tests can substitute a deterministic
/// stub with no network access.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier (e.g. `"text-embedding-3-small"`). Persisted in
    /// `index_meta`; query and index vectors must come from the same model.
    fn model_name(&self) -> &str;
    /// Vector dimensionality, constant across the whole index.
    fn dims(&self) -> usize;
    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError>;
}

/// Create the configured provider.
///
/// Fails if the provider is `disabled` or unknown, or if the API
/// credential environment variable is unset for providers that need one.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "openai" => Ok(Box::new(OpenAiEmbeddings::new(config)?)),
        "ollama" => Ok(Box::new(OllamaEmbeddings::new(config)?)),
        "disabled" => bail!("Embedding provider is disabled. Set [embedding] provider in config."),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

// ============ OpenAI-compatible provider ============

pub struct OpenAiEmbeddings {
    model: String,
    dims: usize,
    url: String,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiEmbeddings {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for openai provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for openai provider"))?;
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
            dims,
            url,
            api_key,
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddings {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let json = post_with_backoff(
            &self.client,
            &format!("{}/v1/embeddings", self.url),
            Some(&self.api_key),
            &body,
            self.max_retries,
            "openai",
        )
        .await
        .map_err(|e| PipelineError::Embedding {
            provider: "openai".to_string(),
            reason: e.reason,
        })?;

        let vectors = parse_openai_response(&json).map_err(|e| PipelineError::Embedding {
            provider: "openai".to_string(),
            reason: e.to_string(),
        })?;
        check_dims(&vectors, self.dims, "openai")?;
        Ok(vectors)
    }
}

fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid response: missing data array"))?;

    let mut embeddings = Vec::with_capacity(data.len());
    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid response: missing embedding"))?;
        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        embeddings.push(vec);
    }
    Ok(embeddings)
}

// ============ Ollama provider ============

pub struct OllamaEmbeddings {
    model: String,
    dims: usize,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaEmbeddings {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            dims,
            url,
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbeddings {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let json = post_with_backoff(
            &self.client,
            &format!("{}/api/embed", self.url),
            None,
            &body,
            self.max_retries,
            "ollama",
        )
        .await
        .map_err(|e| PipelineError::Embedding {
            provider: "ollama".to_string(),
            reason: e.reason,
        })?;

        let embeddings = json
            .get("embeddings")
            .and_then(|e| e.as_array())
            .ok_or_else(|| PipelineError::Embedding {
                provider: "ollama".to_string(),
                reason: "Invalid response: missing embeddings array".to_string(),
            })?;

        let mut vectors = Vec::with_capacity(embeddings.len());
        for embedding in embeddings {
            let vec: Vec<f32> = embedding
                .as_array()
                .ok_or_else(|| PipelineError::Embedding {
                    provider: "ollama".to_string(),
                    reason: "Invalid response: embedding is not an array".to_string(),
                })?
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect();
            vectors.push(vec);
        }
        check_dims(&vectors, self.dims, "ollama")?;
        Ok(vectors)
    }
}

// ============ Shared HTTP retry loop ============

/// Terminal failure from [`post_with_backoff`]; callers wrap it into
/// their own error variant.
pub(crate) struct RequestFailure {
    pub reason: String,
}

/// POST a JSON body, retrying transient failures with exponential
/// backoff. 429 and 5xx responses and network errors are retried;
/// any other 4xx fails immediately.
pub(crate) async fn post_with_backoff(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
    max_retries: u32,
    provider: &str,
) -> Result<serde_json::Value, RequestFailure> {
    let mut last_err: Option<String> = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let mut request = client.post(url).json(body);
        if let Some(key) = bearer {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response.json().await.map_err(|e| RequestFailure {
                        reason: format!("invalid JSON response: {}", e),
                    });
                }

                let body_text = response.text().await.unwrap_or_default();

                // Rate limited or server error: transient, retry
                if status.as_u16() == 429 || status.is_server_error() {
                    tracing::debug!(provider, %status, attempt, "transient provider error, retrying");
                    last_err = Some(format!("HTTP {}: {}", status, body_text));
                    continue;
                }

                // Other client errors are not retryable
                return Err(RequestFailure {
                    reason: format!("HTTP {}: {}", status, body_text),
                });
            }
            Err(e) => {
                last_err = Some(e.to_string());
                continue;
            }
        }
    }

    Err(RequestFailure {
        reason: format!(
            "retries exhausted: {}",
            last_err.unwrap_or_else(|| "no response".to_string())
        ),
    })
}

fn check_dims(
    vectors: &[Vec<f32>],
    expected: usize,
    provider: &str,
) -> Result<(), PipelineError> {
    for vec in vectors {
        if vec.len() != expected {
            return Err(PipelineError::Embedding {
                provider: provider.to_string(),
                reason: format!(
                    "dimension mismatch: expected {}, provider returned {}",
                    expected,
                    vec.len()
                ),
            });
        }
    }
    Ok(())
}

// ============ Vector helpers ============

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// Each `f32` is stored as 4 bytes in little-endian order, producing
/// a BLOB of `vec.len() × 4` bytes.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector. Reverses [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`; `0.0` for empty vectors or
/// vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
