//! Pipeline error taxonomy.
//!
//! Failures that must be distinguishable by callers carry their own
//! variant; everything else stays `anyhow` at the command boundary.

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by the ingestion and answering pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A corpus document could not be read or decoded.
    #[error("failed to load {path}: {reason}")]
    Load { path: PathBuf, reason: String },

    /// The embedding provider failed after exhausting retries.
    #[error("embedding provider '{provider}' failed: {reason}")]
    Embedding { provider: String, reason: String },

    /// The persisted index does not match the configured embedding model.
    #[error("stored index is stale: {reason} (run `sous embed rebuild` or `sous sync --full`)")]
    IndexStale { reason: String },

    /// The LLM provider failed after exhausting retries.
    #[error("generation failed via '{provider}': {reason}")]
    Generation { provider: String, reason: String },

    /// The corpus root yielded no readable documents.
    #[error("corpus at {root} contains no readable documents")]
    EmptyCorpus { root: PathBuf },
}
