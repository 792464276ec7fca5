//! Hybrid retrieval over the chunk index.
//!
//! Two scoring channels feed a weighted fusion: FTS5 keyword rank
//! (bm25, negated so higher is better) and cosine similarity over the
//! stored chunk vectors. Each channel is min-max normalized to [0, 1]
//! before fusing, so their natural scales never dominate each other.

use anyhow::{bail, Result};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

use crate::config::Config;
use crate::db;
use crate::embedding::{self, EmbeddingProvider};
use crate::error::PipelineError;
use crate::indexer;
use crate::models::ScoredChunk;

/// Retrieve the top `k` chunks for a query.
///
/// With a provider present the score is
/// `(1 - alpha) * keyword + alpha * semantic`; without one the keyword
/// channel stands alone. An empty index yields an empty result, never
/// an error. The semantic channel refuses to run against an index
/// built by a different model or dimensionality. A `category` restricts
/// both channels to documents in that corpus subdirectory.
pub async fn retrieve(
    pool: &SqlitePool,
    config: &Config,
    provider: Option<&dyn EmbeddingProvider>,
    query: &str,
    k: usize,
    category: Option<&str>,
) -> Result<Vec<ScoredChunk>> {
    if query.trim().is_empty() {
        return Ok(Vec::new());
    }

    let candidate_k = config.retrieval.candidate_k as i64;
    let keyword_candidates = fetch_keyword_candidates(pool, query, candidate_k, category).await?;

    let vector_candidates = match provider {
        Some(provider) => {
            if let Some(meta) = indexer::read_index_meta(pool).await? {
                indexer::check_compatibility(&meta, provider)?;
                fetch_vector_candidates(pool, provider, query, candidate_k, category).await?
            } else {
                // No vectors indexed yet; keyword channel carries the query
                Vec::new()
            }
        }
        None => Vec::new(),
    };

    let alpha = if vector_candidates.is_empty() {
        0.0
    } else {
        config.retrieval.hybrid_alpha
    };

    Ok(fuse_candidates(
        keyword_candidates,
        vector_candidates,
        alpha,
        k,
    ))
}

/// CLI entry point for `sous search`.
pub async fn run_search(
    config: &Config,
    query: &str,
    mode: &str,
    limit: Option<usize>,
    category: Option<&str>,
) -> Result<()> {
    match mode {
        "keyword" | "semantic" | "hybrid" => {}
        _ => bail!(
            "Unknown search mode: {}. Use keyword, semantic, or hybrid.",
            mode
        ),
    }

    if (mode == "semantic" || mode == "hybrid") && !config.embedding.is_enabled() {
        bail!(
            "Mode '{}' requires embeddings. Set [embedding] provider in config.",
            mode
        );
    }

    let pool = db::connect(config).await?;
    let k = limit.unwrap_or(config.retrieval.k);
    let candidate_k = config.retrieval.candidate_k as i64;

    let keyword_candidates = if mode == "keyword" || mode == "hybrid" {
        fetch_keyword_candidates(&pool, query, candidate_k, category).await?
    } else {
        Vec::new()
    };

    let vector_candidates = if mode == "semantic" || mode == "hybrid" {
        let provider = embedding::create_provider(&config.embedding)?;
        match indexer::read_index_meta(&pool).await? {
            Some(meta) => {
                indexer::check_compatibility(&meta, provider.as_ref())?;
                fetch_vector_candidates(&pool, provider.as_ref(), query, candidate_k, category)
                    .await?
            }
            None => {
                bail!("No embedding index found. Run `sous sync` or `sous embed pending` first.")
            }
        }
    } else {
        Vec::new()
    };

    let effective_alpha = match mode {
        "keyword" => 0.0,
        "semantic" => 1.0,
        _ => config.retrieval.hybrid_alpha,
    };

    let results = fuse_candidates(keyword_candidates, vector_candidates, effective_alpha, k);

    if results.is_empty() {
        println!("No results.");
        pool.close().await;
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        let section = result.section.as_deref().unwrap_or("-");
        println!("{}. [{:.2}] {} ({})", i + 1, result.score, result.title, section);
        println!(
            "    excerpt: \"{}\"",
            snippet_of(&result.text).replace('\n', " ")
        );
        println!("    id: {}", result.chunk_id);
        println!();
    }

    pool.close().await;
    Ok(())
}

fn snippet_of(text: &str) -> &str {
    match text.char_indices().nth(160) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

// ============ Candidate types ============

#[derive(Debug, Clone)]
struct ChunkCandidate {
    chunk_id: String,
    document_id: String,
    title: String,
    section: Option<String>,
    text: String,
    raw_score: f64,
}

// ============ Keyword channel ============

/// Build an FTS5 query from free-form user text: each token quoted
/// (so punctuation is never parsed as FTS syntax) and joined with OR.
/// bm25 then ranks chunks matching more of the question's terms higher
/// without requiring every word, so "how long to simmer braised pork"
/// still reaches a chunk that only says "simmer for one hour".
fn build_fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|token| format!("\"{}\"", token.replace('"', "")))
        .filter(|quoted| quoted.len() > 2)
        .collect::<Vec<_>>()
        .join(" OR ")
}

async fn fetch_keyword_candidates(
    pool: &SqlitePool,
    query: &str,
    candidate_k: i64,
    category: Option<&str>,
) -> Result<Vec<ChunkCandidate>> {
    let fts_query = build_fts_query(query);
    if fts_query.is_empty() {
        return Ok(Vec::new());
    }

    let rows = sqlx::query(
        r#"
        SELECT chunks_fts.chunk_id, chunks_fts.document_id, chunks_fts.rank,
               c.section, c.text, d.title
        FROM chunks_fts
        JOIN chunks c ON c.id = chunks_fts.chunk_id
        JOIN documents d ON d.id = chunks_fts.document_id
        WHERE chunks_fts MATCH ?
          AND (? IS NULL OR d.category = ?)
        ORDER BY chunks_fts.rank
        LIMIT ?
        "#,
    )
    .bind(fts_query)
    .bind(category)
    .bind(category)
    .bind(candidate_k)
    .fetch_all(pool)
    .await?;

    let candidates = rows
        .iter()
        .map(|row| {
            let rank: f64 = row.get("rank");
            ChunkCandidate {
                chunk_id: row.get("chunk_id"),
                document_id: row.get("document_id"),
                title: row.get("title"),
                section: row.get("section"),
                text: row.get("text"),
                raw_score: -rank, // negate so higher = better
            }
        })
        .collect();

    Ok(candidates)
}

// ============ Semantic channel ============

async fn fetch_vector_candidates(
    pool: &SqlitePool,
    provider: &dyn EmbeddingProvider,
    query: &str,
    candidate_k: i64,
    category: Option<&str>,
) -> Result<Vec<ChunkCandidate>> {
    let mut vectors = provider.embed(&[query.to_string()]).await?;
    let query_vec = vectors.pop().ok_or_else(|| PipelineError::Embedding {
        provider: provider.model_name().to_string(),
        reason: "provider returned no vector for query".to_string(),
    })?;

    // Fetch all vectors and compute cosine similarity in Rust; corpora
    // at this scale fit comfortably in one pass.
    let rows = sqlx::query(
        r#"
        SELECT cv.chunk_id, cv.document_id, cv.embedding,
               c.section, c.text, d.title
        FROM chunk_vectors cv
        JOIN chunks c ON c.id = cv.chunk_id
        JOIN documents d ON d.id = cv.document_id
        WHERE ? IS NULL OR d.category = ?
        "#,
    )
    .bind(category)
    .bind(category)
    .fetch_all(pool)
    .await?;

    let mut candidates: Vec<ChunkCandidate> = rows
        .iter()
        .map(|row| {
            let blob: Vec<u8> = row.get("embedding");
            let vec = embedding::blob_to_vec(&blob);
            let similarity = embedding::cosine_similarity(&query_vec, &vec) as f64;
            ChunkCandidate {
                chunk_id: row.get("chunk_id"),
                document_id: row.get("document_id"),
                title: row.get("title"),
                section: row.get("section"),
                text: row.get("text"),
                raw_score: similarity,
            }
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.raw_score
            .partial_cmp(&a.raw_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    candidates.truncate(candidate_k as usize);

    Ok(candidates)
}

// ============ Fusion ============

fn fuse_candidates(
    keyword: Vec<ChunkCandidate>,
    vector: Vec<ChunkCandidate>,
    alpha: f64,
    k: usize,
) -> Vec<ScoredChunk> {
    if keyword.is_empty() && vector.is_empty() {
        return Vec::new();
    }

    let kw_map: HashMap<String, f64> = normalize_scores(&keyword)
        .into_iter()
        .map(|(c, s)| (c.chunk_id.clone(), s))
        .collect();
    let vec_map: HashMap<String, f64> = normalize_scores(&vector)
        .into_iter()
        .map(|(c, s)| (c.chunk_id.clone(), s))
        .collect();

    let mut all_chunks: HashMap<String, &ChunkCandidate> = HashMap::new();
    for c in keyword.iter().chain(vector.iter()) {
        all_chunks.entry(c.chunk_id.clone()).or_insert(c);
    }

    let mut results: Vec<ScoredChunk> = all_chunks
        .into_iter()
        .map(|(chunk_id, cand)| {
            let kw = kw_map.get(&chunk_id).copied().unwrap_or(0.0);
            let vec = vec_map.get(&chunk_id).copied().unwrap_or(0.0);
            ScoredChunk {
                chunk_id,
                document_id: cand.document_id.clone(),
                title: cand.title.clone(),
                section: cand.section.clone(),
                text: cand.text.clone(),
                score: (1.0 - alpha) * kw + alpha * vec,
            }
        })
        .collect();

    // Score desc, then chunk id asc for a stable ordering
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    results.truncate(k);
    results
}

/// Min-max normalize raw channel scores to [0, 1]. A single candidate
/// (or all-equal scores) normalizes to 1.0.
fn normalize_scores(candidates: &[ChunkCandidate]) -> Vec<(&ChunkCandidate, f64)> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let s_min = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::INFINITY, f64::min);
    let s_max = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::NEG_INFINITY, f64::max);

    candidates
        .iter()
        .map(|c| {
            let norm = if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (c.raw_score - s_min) / (s_max - s_min)
            };
            (c, norm)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_candidate(chunk_id: &str, score: f64) -> ChunkCandidate {
        ChunkCandidate {
            chunk_id: chunk_id.to_string(),
            document_id: "doc".to_string(),
            title: "Braised Pork".to_string(),
            section: None,
            text: String::new(),
            raw_score: score,
        }
    }

    #[test]
    fn test_normalize_empty() {
        assert!(normalize_scores(&[]).is_empty());
    }

    #[test]
    fn test_normalize_single_is_one() {
        let candidates = vec![make_candidate("c1", 5.0)];
        let result = normalize_scores(&candidates);
        assert!((result[0].1 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_range() {
        let candidates = vec![
            make_candidate("c1", 10.0),
            make_candidate("c2", 5.0),
            make_candidate("c3", 0.0),
        ];
        let result = normalize_scores(&candidates);
        assert!((result[0].1 - 1.0).abs() < 1e-9);
        assert!((result[1].1 - 0.5).abs() < 1e-9);
        assert!((result[2].1 - 0.0).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_stays_in_unit_interval() {
        let candidates = vec![
            make_candidate("c1", -5.0),
            make_candidate("c2", 100.0),
            make_candidate("c3", 42.0),
        ];
        for (_, score) in normalize_scores(&candidates) {
            assert!((0.0..=1.0).contains(&score), "score out of range: {}", score);
        }
    }

    #[test]
    fn test_alpha_zero_preserves_keyword_order() {
        let kw = vec![
            make_candidate("c1", 10.0),
            make_candidate("c2", 5.0),
            make_candidate("c3", 1.0),
        ];
        let vectors = vec![make_candidate("c3", 0.9), make_candidate("c1", 0.1)];

        let fused = fuse_candidates(kw, vectors, 0.0, 10);
        let order: Vec<&str> = fused.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(order, vec!["c1", "c2", "c3"]);
    }

    #[test]
    fn test_alpha_one_preserves_vector_order() {
        let kw = vec![make_candidate("c1", 10.0), make_candidate("c2", 5.0)];
        let vectors = vec![
            make_candidate("c2", 0.9),
            make_candidate("c3", 0.5),
            make_candidate("c1", 0.1),
        ];

        let fused = fuse_candidates(kw, vectors, 1.0, 10);
        let order: Vec<&str> = fused.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(order, vec!["c2", "c3", "c1"]);
    }

    #[test]
    fn test_fusion_mixes_channels() {
        // c1 strong keyword, c2 strong vector; alpha 0.6 favors c2
        let kw = vec![make_candidate("c1", 10.0), make_candidate("c2", 1.0)];
        let vectors = vec![make_candidate("c2", 0.95), make_candidate("c1", 0.05)];

        let fused = fuse_candidates(kw, vectors, 0.6, 10);
        assert_eq!(fused[0].chunk_id, "c2");
        assert!((fused[0].score - 0.6).abs() < 1e-9);
        assert!((fused[1].score - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_equal_scores_break_ties_by_chunk_id() {
        let kw = vec![
            make_candidate("c-b", 3.0),
            make_candidate("c-a", 3.0),
            make_candidate("c-c", 3.0),
        ];
        let fused = fuse_candidates(kw, Vec::new(), 0.0, 10);
        let order: Vec<&str> = fused.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(order, vec!["c-a", "c-b", "c-c"]);
    }

    #[test]
    fn test_truncates_to_k() {
        let kw = vec![
            make_candidate("c1", 3.0),
            make_candidate("c2", 2.0),
            make_candidate("c3", 1.0),
        ];
        let fused = fuse_candidates(kw, Vec::new(), 0.0, 2);
        assert_eq!(fused.len(), 2);
    }

    #[test]
    fn test_empty_channels_yield_empty() {
        assert!(fuse_candidates(Vec::new(), Vec::new(), 0.6, 5).is_empty());
    }

    #[test]
    fn test_fts_query_ors_quoted_terms() {
        assert_eq!(
            build_fts_query("braised pork"),
            "\"braised\" OR \"pork\""
        );
        // Punctuation and quotes stay inside the term quoting
        assert_eq!(
            build_fts_query("what's \"tender\"?"),
            "\"what's\" OR \"tender?\""
        );
        assert_eq!(build_fts_query("   "), "");
    }

    mod retrieval {
        use super::super::retrieve;
        use crate::config::{Config, CorpusConfig, DbConfig};
        use crate::embedding::EmbeddingProvider;
        use sqlx::SqlitePool;
        use crate::indexer::test_support::StubEmbeddings;
        use crate::models::RecipeFile;
        use crate::{indexer, ingest, migrate};

        fn test_config() -> Config {
            Config {
                corpus: CorpusConfig {
                    root: "/unused".into(),
                    include_globs: vec![],
                    exclude_globs: vec![],
                },
                db: DbConfig {
                    path: "/unused".into(),
                },
                chunking: Default::default(),
                retrieval: Default::default(),
                embedding: Default::default(),
                llm: Default::default(),
            }
        }

        async fn seed(pool: &SqlitePool, path: &str, title: &str, texts: &[&str]) {
            seed_in(pool, path, title, "", texts).await;
        }

        async fn seed_in(
            pool: &SqlitePool,
            path: &str,
            title: &str,
            category: &str,
            texts: &[&str],
        ) {
            let file = RecipeFile {
                relative_path: path.to_string(),
                title: title.to_string(),
                category: category.to_string(),
                body: texts.join("\n\n"),
                content_hash: format!("hash-{}", path),
                modified_at: 0,
            };
            let doc_id = ingest::upsert_document(pool, &file, None).await.unwrap();
            let chunks: Vec<crate::models::Chunk> = texts
                .iter()
                .enumerate()
                .map(|(i, t)| crate::models::Chunk {
                    id: format!("{}-c{}", path, i),
                    document_id: doc_id.clone(),
                    chunk_index: i as i64,
                    section: None,
                    text: t.to_string(),
                    hash: format!("{}-h{}", path, i),
                })
                .collect();
            ingest::replace_chunks(pool, &doc_id, &chunks).await.unwrap();
        }

        #[tokio::test]
        async fn test_keyword_retrieval_finds_matching_chunk() {
            let pool = crate::db::connect_memory().await.unwrap();
            migrate::apply_schema(&pool).await.unwrap();
            seed(&pool, "pork.md", "braised-pork", &["simmer the pork one hour"]).await;
            seed(&pool, "rice.md", "fried-rice", &["fry the rice over high heat"]).await;

            let results = retrieve(&pool, &test_config(), None, "simmer", 3, None)
                .await
                .unwrap();
            assert_eq!(results.len(), 1);
            assert_eq!(results[0].title, "braised-pork");
        }

        #[tokio::test]
        async fn test_natural_language_question_matches_partial_terms() {
            let pool = crate::db::connect_memory().await.unwrap();
            migrate::apply_schema(&pool).await.unwrap();
            seed(
                &pool,
                "pork.md",
                "braised-pork",
                &["Sear the pork. Simmer covered for one hour until tender."],
            )
            .await;

            // Only some of the question's words appear in the chunk;
            // the keyword channel must still find it.
            let results = retrieve(
                &pool,
                &test_config(),
                None,
                "how long to simmer braised pork",
                3,
                None,
            )
            .await
            .unwrap();
            assert_eq!(results.len(), 1);
            assert!(results[0].text.contains("one hour"));
        }

        #[tokio::test]
        async fn test_empty_index_returns_empty() {
            let pool = crate::db::connect_memory().await.unwrap();
            migrate::apply_schema(&pool).await.unwrap();

            let results = retrieve(&pool, &test_config(), None, "anything", 3, None)
                .await
                .unwrap();
            assert!(results.is_empty());
        }

        #[tokio::test]
        async fn test_blank_query_returns_empty() {
            let pool = crate::db::connect_memory().await.unwrap();
            migrate::apply_schema(&pool).await.unwrap();

            let results = retrieve(&pool, &test_config(), None, "   ", 3, None).await.unwrap();
            assert!(results.is_empty());
        }

        #[tokio::test]
        async fn test_hybrid_retrieval_uses_both_channels() {
            let pool = crate::db::connect_memory().await.unwrap();
            migrate::apply_schema(&pool).await.unwrap();
            seed(&pool, "pork.md", "braised-pork", &["simmer the pork one hour"]).await;
            seed(&pool, "rice.md", "fried-rice", &["fry the rice over high heat"]).await;

            let stub = StubEmbeddings::new(32);
            indexer::embed_pending(&pool, &stub, 32, None).await.unwrap();
            indexer::write_index_meta(&pool, stub.model_name(), stub.dims(), "hash").await.unwrap();

            let results = retrieve(&pool, &test_config(), Some(&stub), "simmer the pork", 2, None)
                .await
                .unwrap();
            assert!(!results.is_empty());
            assert_eq!(results[0].title, "braised-pork");
        }

        #[tokio::test]
        async fn test_category_filter_restricts_both_channels() {
            let pool = crate::db::connect_memory().await.unwrap();
            migrate::apply_schema(&pool).await.unwrap();
            seed_in(&pool, "mains/pork.md", "braised-pork", "mains", &["simmer the pork one hour"])
                .await;
            seed_in(&pool, "soups/pork-soup.md", "pork-soup", "soups", &["simmer pork bones for soup"])
                .await;

            let all = retrieve(&pool, &test_config(), None, "simmer pork", 5, None)
                .await
                .unwrap();
            assert_eq!(all.len(), 2);

            let soups = retrieve(&pool, &test_config(), None, "simmer pork", 5, Some("soups"))
                .await
                .unwrap();
            assert_eq!(soups.len(), 1);
            assert_eq!(soups[0].title, "pork-soup");

            let stub = StubEmbeddings::new(32);
            indexer::embed_pending(&pool, &stub, 32, None).await.unwrap();
            let hybrid = retrieve(&pool, &test_config(), Some(&stub), "simmer pork", 5, Some("mains"))
                .await
                .unwrap();
            assert_eq!(hybrid.len(), 1);
            assert_eq!(hybrid[0].title, "braised-pork");
        }

        #[tokio::test]
        async fn test_hybrid_results_survive_pool_reopen() {
            let dir = tempfile::tempdir().unwrap();
            let mut config = test_config();
            config.db.path = dir.path().join("sous.sqlite");

            let pool = crate::db::connect(&config).await.unwrap();
            migrate::apply_schema(&pool).await.unwrap();
            seed(&pool, "pork.md", "braised-pork", &["simmer the pork one hour"]).await;
            seed(&pool, "rice.md", "fried-rice", &["fry the rice over high heat"]).await;

            let stub = StubEmbeddings::new(32);
            indexer::embed_pending(&pool, &stub, 32, None).await.unwrap();

            let before = retrieve(&pool, &config, Some(&stub), "simmer the pork", 2, None)
                .await
                .unwrap();
            assert!(!before.is_empty());
            pool.close().await;

            // A fresh pool must serve identical results from disk.
            let reopened = crate::db::connect(&config).await.unwrap();
            let after = retrieve(&reopened, &config, Some(&stub), "simmer the pork", 2, None)
                .await
                .unwrap();

            assert_eq!(before.len(), after.len());
            for (b, a) in before.iter().zip(after.iter()) {
                assert_eq!(b.chunk_id, a.chunk_id);
                assert!((b.score - a.score).abs() < 1e-9);
            }
        }

        #[tokio::test]
        async fn test_model_mismatch_is_stale_index() {
            let pool = crate::db::connect_memory().await.unwrap();
            migrate::apply_schema(&pool).await.unwrap();
            seed(&pool, "pork.md", "braised-pork", &["simmer the pork"]).await;

            let stub = StubEmbeddings::new(32);
            indexer::embed_pending(&pool, &stub, 32, None).await.unwrap();
            indexer::write_index_meta(&pool, stub.model_name(), stub.dims(), "hash").await.unwrap();

            let other = StubEmbeddings::new(64);
            let err = retrieve(&pool, &test_config(), Some(&other), "simmer", 2, None)
                .await
                .unwrap_err();
            let pipeline = err.downcast::<crate::error::PipelineError>().unwrap();
            assert!(matches!(pipeline, crate::error::PipelineError::IndexStale { .. }));
        }
    }
}
