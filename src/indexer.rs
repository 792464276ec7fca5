//! Embedding index construction.
//!
//! Finds chunks whose embedding is missing or stale (content hash
//! changed, or produced by a different model), embeds them in batches,
//! and stores the vectors. A batch that fails after the provider's
//! retries marks its chunk ids failed and the build continues; the
//! caller receives a partial-success [`IndexReport`] instead of an
//! abort. Each batch commits independently, so an interrupted build
//! resumes from the cached vectors on the next run.

use anyhow::{bail, Result};
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::embedding::{self, vec_to_blob, EmbeddingProvider};
use crate::error::PipelineError;

/// Outcome of one indexing pass.
#[derive(Debug, Default)]
pub struct IndexReport {
    /// Chunks embedded by provider calls in this pass.
    pub embedded: u64,
    /// Chunks skipped because an up-to-date vector already existed.
    pub cached: u64,
    /// Chunk ids whose batch failed after retries; excluded from the
    /// index, reported to the caller.
    pub failed: Vec<String>,
}

/// Embed every chunk that is missing an up-to-date vector for the
/// provider's model. The core cache guarantee lives in the pending
/// query: a chunk whose stored embedding hash matches its content hash
/// is never sent to the provider again.
pub async fn embed_pending(
    pool: &SqlitePool,
    provider: &dyn EmbeddingProvider,
    batch_size: usize,
    limit: Option<usize>,
) -> Result<IndexReport> {
    let total_chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
        .fetch_one(pool)
        .await?;

    let pending = find_pending_chunks(pool, provider.model_name(), limit).await?;

    let mut report = IndexReport {
        cached: (total_chunks as u64).saturating_sub(pending.len() as u64),
        ..Default::default()
    };

    for batch in pending.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|p| p.text.clone()).collect();

        match provider.embed(&texts).await {
            Ok(vectors) => {
                for (item, vec) in batch.iter().zip(vectors.iter()) {
                    let blob = vec_to_blob(vec);
                    upsert_embedding(
                        pool,
                        &item.chunk_id,
                        &item.document_id,
                        provider.model_name(),
                        provider.dims(),
                        &item.hash,
                        &blob,
                    )
                    .await?;
                    report.embedded += 1;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, batch_len = batch.len(), "embedding batch failed");
                report
                    .failed
                    .extend(batch.iter().map(|p| p.chunk_id.clone()));
            }
        }
    }

    // Record the model this index now answers for, so the semantic
    // channel can serve (and verify compatibility) without a full
    // sync. The corpus hash is owned by the sync path; keep whatever
    // it recorded.
    let corpus_hash = read_index_meta(pool)
        .await?
        .map(|m| m.corpus_hash)
        .unwrap_or_default();
    write_index_meta(pool, provider.model_name(), provider.dims(), &corpus_hash).await?;

    Ok(report)
}

/// CLI entry point for `sous embed pending`.
pub async fn run_embed_pending(
    config: &Config,
    limit: Option<usize>,
    batch_size_override: Option<usize>,
    dry_run: bool,
) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let provider = embedding::create_provider(&config.embedding)?;
    let pool = db::connect(config).await?;
    let batch_size = batch_size_override.unwrap_or(config.embedding.batch_size);

    if dry_run {
        let pending = find_pending_chunks(&pool, provider.model_name(), limit).await?;
        println!("embed pending (dry-run)");
        println!("  chunks needing embeddings: {}", pending.len());
        pool.close().await;
        return Ok(());
    }

    let report = embed_pending(&pool, provider.as_ref(), batch_size, limit).await?;
    print_report("embed pending", &report);

    pool.close().await;
    Ok(())
}

/// CLI entry point for `sous embed rebuild`: drop all vectors and
/// re-embed every chunk. Used when switching models or dimensions.
pub async fn run_embed_rebuild(config: &Config, batch_size_override: Option<usize>) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let provider = embedding::create_provider(&config.embedding)?;
    let pool = db::connect(config).await?;
    let batch_size = batch_size_override.unwrap_or(config.embedding.batch_size);

    sqlx::query("DELETE FROM chunk_vectors")
        .execute(&pool)
        .await?;
    sqlx::query("DELETE FROM embeddings").execute(&pool).await?;
    println!("embed rebuild — cleared existing embeddings");

    let report = embed_pending(&pool, provider.as_ref(), batch_size, None).await?;
    print_report("embed rebuild", &report);

    pool.close().await;
    Ok(())
}

fn print_report(label: &str, report: &IndexReport) {
    println!("{}", label);
    println!("  embedded: {}", report.embedded);
    println!("  cached:   {}", report.cached);
    println!("  failed:   {}", report.failed.len());
    for id in &report.failed {
        println!("    failed chunk: {}", id);
    }
}

// ============ Index metadata ============

/// Self-description of the persisted index, used for staleness checks.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexMeta {
    pub embedding_model: String,
    pub embedding_dims: usize,
    pub corpus_hash: String,
}

pub async fn write_index_meta(
    pool: &SqlitePool,
    model: &str,
    dims: usize,
    corpus_hash: &str,
) -> Result<()> {
    for (key, value) in [
        ("embedding_model", model.to_string()),
        ("embedding_dims", dims.to_string()),
        ("corpus_hash", corpus_hash.to_string()),
    ] {
        sqlx::query(
            "INSERT INTO index_meta (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(pool)
        .await?;
    }
    Ok(())
}

pub async fn read_index_meta(pool: &SqlitePool) -> Result<Option<IndexMeta>> {
    let rows = sqlx::query("SELECT key, value FROM index_meta")
        .fetch_all(pool)
        .await?;

    let mut model = None;
    let mut dims = None;
    let mut corpus_hash = None;
    for row in rows {
        let key: String = row.get("key");
        let value: String = row.get("value");
        match key.as_str() {
            "embedding_model" => model = Some(value),
            "embedding_dims" => dims = value.parse::<usize>().ok(),
            "corpus_hash" => corpus_hash = Some(value),
            _ => {}
        }
    }

    Ok(match (model, dims, corpus_hash) {
        (Some(embedding_model), Some(embedding_dims), Some(corpus_hash)) => Some(IndexMeta {
            embedding_model,
            embedding_dims,
            corpus_hash,
        }),
        _ => None,
    })
}

/// Verify that the stored index was produced by the given provider.
/// Querying an index built by a different model or dimensionality
/// would produce meaningless similarities.
pub fn check_compatibility(
    meta: &IndexMeta,
    provider: &dyn EmbeddingProvider,
) -> Result<(), PipelineError> {
    if meta.embedding_model != provider.model_name() {
        return Err(PipelineError::IndexStale {
            reason: format!(
                "index built with model '{}', configured model is '{}'",
                meta.embedding_model,
                provider.model_name()
            ),
        });
    }
    if meta.embedding_dims != provider.dims() {
        return Err(PipelineError::IndexStale {
            reason: format!(
                "index dimensionality {} does not match configured {}",
                meta.embedding_dims,
                provider.dims()
            ),
        });
    }
    Ok(())
}

struct PendingChunk {
    chunk_id: String,
    document_id: String,
    text: String,
    hash: String,
}

async fn find_pending_chunks(
    pool: &SqlitePool,
    model: &str,
    limit: Option<usize>,
) -> Result<Vec<PendingChunk>> {
    // SQLite treats LIMIT -1 as unlimited
    let limit_val = limit.map(|l| l as i64).unwrap_or(-1);

    // Missing, stale (text changed), or built by another model
    let rows = sqlx::query(
        r#"
        SELECT c.id AS chunk_id, c.document_id, c.text, c.hash
        FROM chunks c
        LEFT JOIN embeddings e ON e.chunk_id = c.id
        WHERE e.chunk_id IS NULL OR e.hash != c.hash OR e.model != ?
        ORDER BY c.document_id, c.chunk_index
        LIMIT ?
        "#,
    )
    .bind(model)
    .bind(limit_val)
    .fetch_all(pool)
    .await?;

    let results = rows
        .iter()
        .map(|row| PendingChunk {
            chunk_id: row.get("chunk_id"),
            document_id: row.get("document_id"),
            text: row.get("text"),
            hash: row.get("hash"),
        })
        .collect();

    Ok(results)
}

async fn upsert_embedding(
    pool: &SqlitePool,
    chunk_id: &str,
    document_id: &str,
    model: &str,
    dims: usize,
    text_hash: &str,
    blob: &[u8],
) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO embeddings (chunk_id, model, dims, hash, created_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(chunk_id) DO UPDATE SET
            model = excluded.model,
            dims = excluded.dims,
            hash = excluded.hash,
            created_at = excluded.created_at
        "#,
    )
    .bind(chunk_id)
    .bind(model)
    .bind(dims as i64)
    .bind(text_hash)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO chunk_vectors (chunk_id, document_id, embedding)
        VALUES (?, ?, ?)
        ON CONFLICT(chunk_id) DO UPDATE SET
            document_id = excluded.document_id,
            embedding = excluded.embedding
        "#,
    )
    .bind(chunk_id)
    .bind(document_id)
    .bind(blob)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
