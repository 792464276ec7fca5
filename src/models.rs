//! Core data models used throughout souschef.
//!
//! These types represent the recipe documents, chunks, retrieval
//! results, and answers that flow through the pipeline.

use serde::Serialize;

/// A recipe file discovered by the corpus scanner, before storage.
#[derive(Debug, Clone)]
pub struct RecipeFile {
    /// Path relative to the corpus root; stable identity across runs.
    pub relative_path: String,
    /// File stem, used as the dish name.
    pub title: String,
    /// Immediate parent directory under the corpus root (e.g. `soup`),
    /// empty for files at the root.
    pub category: String,
    pub body: String,
    /// SHA-256 of the body; drives change detection during sync.
    pub content_hash: String,
    /// Modification time, unix seconds.
    pub modified_at: i64,
}

/// A document that failed to load; reported, never fatal.
#[derive(Debug, Clone)]
pub struct LoadFailure {
    pub relative_path: String,
    pub reason: String,
}

/// A bounded span of one document's body text; the unit of retrieval.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    /// Structural tag when the enclosing heading was recognized
    /// (`"ingredients"` or `"steps"`), otherwise `None`.
    pub section: Option<String>,
    pub text: String,
    /// SHA-256 of `text`; the embedding cache key.
    pub hash: String,
}

/// One retrieval hit: a chunk and its fused relevance score.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub title: String,
    pub section: Option<String>,
    pub text: String,
    pub score: f64,
}

/// Generated answer plus the chunk ids it was grounded on.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    /// Ids of the chunks whose text was included in the prompt,
    /// highest-ranked first.
    pub context: Vec<String>,
}
