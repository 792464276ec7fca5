//! Corpus synchronization pipeline.
//!
//! Coordinates the full build flow: corpus scan → chunking → embedding
//! → storage. Documents whose content hash is unchanged are skipped;
//! documents that vanished from the corpus are pruned together with
//! their chunks and vectors. Each document's chunk set is replaced in
//! one transaction so a partially-written chunk set is never visible.

use anyhow::Result;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::chunk::chunk_document;
use crate::config::Config;
use crate::corpus::{scan_corpus, CorpusScan};
use crate::db;
use crate::embedding::{self, EmbeddingProvider};
use crate::indexer;
use crate::migrate;
use crate::models::{Chunk, RecipeFile};

/// Counters from one sync run.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub documents_seen: usize,
    pub documents_updated: u64,
    pub documents_unchanged: u64,
    pub documents_pruned: u64,
    pub chunks_written: u64,
    pub load_failures: usize,
    pub embedded: u64,
    pub embed_cached: u64,
    pub embed_failed: Vec<String>,
}

/// CLI entry point for `sous sync`.
pub async fn run_sync(
    config: &Config,
    full: bool,
    dry_run: bool,
    limit: Option<usize>,
) -> Result<()> {
    let scan = scan_corpus(config)?;

    if dry_run {
        let total_chunks: usize = scan
            .files
            .iter()
            .map(|f| chunk_document("tmp", &f.body, &config.chunking).len())
            .sum();
        println!("sync (dry-run)");
        println!("  documents found: {}", scan.files.len());
        println!("  load failures:   {}", scan.failures.len());
        println!("  estimated chunks: {}", total_chunks);
        return Ok(());
    }

    let pool = db::connect(config).await?;
    migrate::apply_schema(&pool).await?;

    let provider = if config.embedding.is_enabled() {
        Some(embedding::create_provider(&config.embedding)?)
    } else {
        None
    };

    let report = sync_corpus(
        &pool,
        config,
        scan,
        provider.as_deref(),
        full,
        limit,
    )
    .await?;

    println!("sync");
    println!("  documents seen:      {}", report.documents_seen);
    println!("  updated:             {}", report.documents_updated);
    println!("  unchanged:           {}", report.documents_unchanged);
    println!("  pruned:              {}", report.documents_pruned);
    println!("  chunks written:      {}", report.chunks_written);
    if report.load_failures > 0 {
        println!("  load failures:       {}", report.load_failures);
    }
    if config.embedding.is_enabled() {
        println!("  embeddings written:  {}", report.embedded);
        println!("  embeddings cached:   {}", report.embed_cached);
        if !report.embed_failed.is_empty() {
            println!("  embeddings failed:   {}", report.embed_failed.len());
            for id in &report.embed_failed {
                println!("    failed chunk: {}", id);
            }
        }
    }
    println!("ok");

    pool.close().await;
    Ok(())
}

/// Run the scan-to-index pipeline against an open pool. Shared by the
/// `sync` command and the orchestrator's startup path.
pub async fn sync_corpus(
    pool: &SqlitePool,
    config: &Config,
    scan: CorpusScan,
    provider: Option<&dyn EmbeddingProvider>,
    full: bool,
    limit: Option<usize>,
) -> Result<SyncReport> {
    let files = scan.files;
    // The limit bounds how many documents are processed this run; the
    // full scan still defines which documents are live, so a limited
    // sync never prunes documents it simply didn't get to.
    let process_count = limit.unwrap_or(files.len()).min(files.len());

    let mut report = SyncReport {
        documents_seen: process_count,
        load_failures: scan.failures.len(),
        ..Default::default()
    };

    for failure in &scan.failures {
        tracing::warn!(path = %failure.relative_path, reason = %failure.reason, "document skipped");
    }

    for file in files.iter().take(process_count) {
        let existing: Option<(String, String)> = sqlx::query_as(
            "SELECT id, content_hash FROM documents WHERE relative_path = ?",
        )
        .bind(&file.relative_path)
        .fetch_optional(pool)
        .await?;

        if !full {
            if let Some((_, ref hash)) = existing {
                if hash == &file.content_hash {
                    report.documents_unchanged += 1;
                    continue;
                }
            }
        }

        let doc_id = upsert_document(pool, file, existing.map(|(id, _)| id)).await?;
        let chunks = chunk_document(&doc_id, &file.body, &config.chunking);
        report.chunks_written += chunks.len() as u64;
        replace_chunks(pool, &doc_id, &chunks).await?;
        report.documents_updated += 1;
    }

    report.documents_pruned = prune_missing_documents(pool, &files).await?;

    if let Some(provider) = provider {
        let index_report =
            indexer::embed_pending(pool, provider, config.embedding.batch_size, None).await?;
        report.embedded = index_report.embedded;
        report.embed_cached = index_report.cached;
        report.embed_failed = index_report.failed;

        indexer::write_index_meta(pool, provider.model_name(), provider.dims(), &scan.corpus_hash)
            .await?;
    }

    Ok(report)
}

pub(crate) async fn upsert_document(
    pool: &SqlitePool,
    file: &RecipeFile,
    existing_id: Option<String>,
) -> Result<String> {
    let doc_id = existing_id.unwrap_or_else(|| Uuid::new_v4().to_string());

    sqlx::query(
        r#"
        INSERT INTO documents (id, relative_path, title, category, content_hash, modified_at, body)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(relative_path) DO UPDATE SET
            title = excluded.title,
            category = excluded.category,
            content_hash = excluded.content_hash,
            modified_at = excluded.modified_at,
            body = excluded.body
        "#,
    )
    .bind(&doc_id)
    .bind(&file.relative_path)
    .bind(&file.title)
    .bind(&file.category)
    .bind(&file.content_hash)
    .bind(file.modified_at)
    .bind(&file.body)
    .execute(pool)
    .await?;

    Ok(doc_id)
}

/// Replace a document's chunks, FTS postings, and vectors atomically.
pub(crate) async fn replace_chunks(
    pool: &SqlitePool,
    document_id: &str,
    chunks: &[Chunk],
) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "DELETE FROM chunk_vectors WHERE chunk_id IN (SELECT id FROM chunks WHERE document_id = ?)",
    )
    .bind(document_id)
    .execute(&mut *tx)
    .await?;
    sqlx::query(
        "DELETE FROM embeddings WHERE chunk_id IN (SELECT id FROM chunks WHERE document_id = ?)",
    )
    .bind(document_id)
    .execute(&mut *tx)
    .await?;
    sqlx::query("DELETE FROM chunks_fts WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM chunks WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *tx)
        .await?;

    for chunk in chunks {
        sqlx::query(
            "INSERT INTO chunks (id, document_id, chunk_index, section, text, hash) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(chunk.chunk_index)
        .bind(&chunk.section)
        .bind(&chunk.text)
        .bind(&chunk.hash)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO chunks_fts (chunk_id, document_id, text) VALUES (?, ?, ?)")
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(&chunk.text)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Remove documents no longer present in the corpus, along with their
/// chunks, postings, and vectors.
async fn prune_missing_documents(pool: &SqlitePool, files: &[RecipeFile]) -> Result<u64> {
    let stored: Vec<(String, String)> = sqlx::query_as("SELECT id, relative_path FROM documents")
        .fetch_all(pool)
        .await?;

    let live: std::collections::HashSet<&str> =
        files.iter().map(|f| f.relative_path.as_str()).collect();

    let mut pruned = 0u64;
    for (doc_id, path) in stored {
        if live.contains(path.as_str()) {
            continue;
        }
        replace_chunks(pool, &doc_id, &[]).await?;
        sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(&doc_id)
            .execute(pool)
            .await?;
        tracing::info!(path = %path, "pruned document removed from corpus");
        pruned += 1;
    }

    Ok(pruned)
}
