//! Recipe retrieval by id or path.
//!
//! Fetches a full recipe document and its chunk breakdown. Accepts
//! either the document id or the corpus-relative path, since search
//! output exposes both.

use anyhow::{bail, Result};
use serde::Serialize;
use sqlx::Row;

use crate::config::Config;
use crate::db;

#[derive(Debug, Clone, Serialize)]
pub struct DocumentResponse {
    pub id: String,
    pub relative_path: String,
    pub title: String,
    pub category: String,
    pub modified_at: String, // ISO8601
    pub body: String,
    pub chunks: Vec<ChunkResponse>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChunkResponse {
    pub index: i64,
    pub section: Option<String>,
    pub text: String,
}

pub async fn get_document(config: &Config, id: &str) -> Result<DocumentResponse> {
    let pool = db::connect(config).await?;

    let doc_row = sqlx::query(
        "SELECT id, relative_path, title, category, modified_at, body
         FROM documents WHERE id = ? OR relative_path = ?",
    )
    .bind(id)
    .bind(id)
    .fetch_optional(&pool)
    .await?;

    let doc_row = match doc_row {
        Some(row) => row,
        None => {
            pool.close().await;
            bail!("recipe not found: {}", id);
        }
    };

    let doc_id: String = doc_row.get("id");
    let modified_at: i64 = doc_row.get("modified_at");

    let chunk_rows = sqlx::query(
        "SELECT chunk_index, section, text FROM chunks
         WHERE document_id = ? ORDER BY chunk_index ASC",
    )
    .bind(&doc_id)
    .fetch_all(&pool)
    .await?;

    let chunks: Vec<ChunkResponse> = chunk_rows
        .iter()
        .map(|row| ChunkResponse {
            index: row.get("chunk_index"),
            section: row.get("section"),
            text: row.get("text"),
        })
        .collect();

    pool.close().await;

    Ok(DocumentResponse {
        id: doc_id,
        relative_path: doc_row.get("relative_path"),
        title: doc_row.get("title"),
        category: doc_row.get("category"),
        modified_at: chrono::DateTime::from_timestamp(modified_at, 0)
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_default(),
        body: doc_row.get("body"),
        chunks,
    })
}

/// CLI entry point for `sous get`.
pub async fn run_get(config: &Config, id: &str, json: bool) -> Result<()> {
    let doc = get_document(config, id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    println!("{}", doc.title);
    println!("  id:       {}", doc.id);
    println!("  path:     {}", doc.relative_path);
    if !doc.category.is_empty() {
        println!("  category: {}", doc.category);
    }
    println!("  modified: {}", doc.modified_at);
    println!("  chunks:   {}", doc.chunks.len());
    println!();
    println!("{}", doc.body);

    Ok(())
}
