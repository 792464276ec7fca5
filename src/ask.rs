//! Question-answering orchestrator.
//!
//! Owns the pool and providers for a serving session. Startup checks
//! the corpus against the persisted index and rebuilds only when the
//! corpus or the embedding model changed; a fresh index is reused
//! as-is. Per-question failures are reported and the session keeps
//! serving.

use std::io::{BufRead, Write};

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use crate::config::Config;
use crate::corpus;
use crate::db;
use crate::embedding::{self, EmbeddingProvider};
use crate::error::PipelineError;
use crate::generate;
use crate::indexer;
use crate::ingest;
use crate::llm::{self, ChatProvider};
use crate::migrate;
use crate::models::Answer;
use crate::search;

/// A ready-to-serve assistant session.
pub struct Assistant {
    pool: SqlitePool,
    config: Config,
    embed_provider: Option<Box<dyn EmbeddingProvider>>,
    chat_provider: Box<dyn ChatProvider>,
}

impl Assistant {
    /// Bring the index up to date and return a serving handle.
    ///
    /// Fails fast on an unusable setup: missing chat provider or
    /// credentials, unreadable corpus root, or a corpus with no
    /// loadable documents.
    pub async fn init(config: Config) -> Result<Self> {
        if !config.llm.is_enabled() {
            anyhow::bail!("Asking requires an LLM. Set [llm] provider in config.");
        }
        let chat_provider = llm::create_provider(&config.llm)?;
        let embed_provider = if config.embedding.is_enabled() {
            Some(embedding::create_provider(&config.embedding)?)
        } else {
            None
        };

        let scan = corpus::scan_corpus(&config)?;
        if scan.files.is_empty() {
            return Err(PipelineError::EmptyCorpus {
                root: config.corpus.root.clone(),
            }
            .into());
        }

        let pool = db::connect(&config).await?;
        migrate::apply_schema(&pool).await?;

        let fresh = match (&embed_provider, indexer::read_index_meta(&pool).await?) {
            (Some(provider), Some(meta)) => {
                meta.corpus_hash == scan.corpus_hash
                    && indexer::check_compatibility(&meta, provider.as_ref()).is_ok()
            }
            _ => false,
        };

        if fresh {
            tracing::info!("index is up to date, reusing");
        } else {
            tracing::info!(documents = scan.files.len(), "index stale or missing, syncing");
            let report =
                ingest::sync_corpus(&pool, &config, scan, embed_provider.as_deref(), false, None)
                    .await?;
            if !report.embed_failed.is_empty() {
                tracing::warn!(
                    failed = report.embed_failed.len(),
                    "some chunks missing from the semantic index"
                );
            }
        }

        Ok(Self {
            pool,
            config,
            embed_provider,
            chat_provider,
        })
    }

    /// Answer one question: route, retrieve, generate.
    pub async fn answer(&self, question: &str) -> Result<Answer> {
        let route = generate::route_query(self.chat_provider.as_ref(), question).await;
        tracing::debug!(?route, "question routed");

        let chunks = search::retrieve(
            &self.pool,
            &self.config,
            self.embed_provider.as_deref(),
            question,
            self.config.retrieval.k,
            None,
        )
        .await?;

        let answer = generate::generate_answer(
            self.chat_provider.as_ref(),
            &self.config.llm,
            route,
            question,
            &chunks,
        )
        .await?;

        Ok(answer)
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

/// CLI entry point for `sous ask`. With a question argument answers
/// once; without one, serves an interactive loop on stdin.
pub async fn run_ask(config: &Config, question: Option<String>) -> Result<()> {
    let assistant = Assistant::init(config.clone())
        .await
        .context("Failed to initialize assistant")?;

    match question {
        Some(q) => {
            let answer = assistant.answer(&q).await?;
            println!("{}", answer.text.trim());
        }
        None => {
            interactive_loop(&assistant).await?;
        }
    }

    assistant.close().await;
    Ok(())
}

async fn interactive_loop(assistant: &Assistant) -> Result<()> {
    println!("sous — ask about your recipes (exit/quit to leave)");
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();

    loop {
        print!("? ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break; // EOF
        }
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if question.eq_ignore_ascii_case("exit") || question.eq_ignore_ascii_case("quit") {
            break;
        }

        match assistant.answer(question).await {
            Ok(answer) => println!("\n{}\n", answer.text.trim()),
            Err(e) => eprintln!("error: {:#}", e),
        }
    }

    Ok(())
}
