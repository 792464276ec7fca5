//! # Sous Chef CLI (`sous`)
//!
//! The `sous` binary is the interface for the recipe assistant. It
//! provides commands for database initialization, corpus ingestion,
//! search, recipe retrieval, embedding management, and question
//! answering.
//!
//! ## Usage
//!
//! ```bash
//! sous --config ./config/sous.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sous init` | Create the SQLite database and run schema migrations |
//! | `sous sync` | Scan the recipe directory, chunk, embed, and index |
//! | `sous search "<query>"` | Search indexed recipes |
//! | `sous get <id>` | Retrieve a full recipe by id or path |
//! | `sous embed pending` | Backfill missing or stale embeddings |
//! | `sous embed rebuild` | Delete and regenerate all embeddings |
//! | `sous ask [question]` | Answer a question, or start an interactive loop |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use souschef::{ask, config, get, indexer, ingest, migrate, search};

/// Sous Chef CLI — a local-first recipe question-answering assistant.
///
/// All commands accept a `--config` flag pointing to a TOML
/// configuration file. See `config/sous.example.toml` for a full
/// example.
#[derive(Parser)]
#[command(
    name = "sous",
    about = "Sous Chef — a local-first recipe question-answering assistant",
    version,
    long_about = "Sous Chef ingests a directory of recipe files, chunks and embeds them into \
    SQLite, and answers cooking questions with an LLM grounded in hybrid (keyword + semantic) \
    retrieval over the indexed recipes."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/sous.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables
    /// (documents, chunks, chunks_fts, embeddings, chunk_vectors,
    /// index_meta). Idempotent — running it multiple times is safe.
    Init,

    /// Ingest recipes from the corpus directory.
    ///
    /// Scans the configured recipe directory, chunks changed documents,
    /// optionally embeds them, and prunes recipes deleted from disk.
    Sync {
        /// Reingest every document, ignoring stored content hashes.
        #[arg(long)]
        full: bool,

        /// Show document and chunk counts without writing to the database.
        #[arg(long)]
        dry_run: bool,

        /// Maximum number of documents to process.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Search indexed recipes.
    Search {
        /// The search query string.
        query: String,

        /// Search mode: `keyword` (FTS5), `semantic` (vector), or `hybrid` (weighted merge).
        /// Semantic and hybrid modes require an embedding provider.
        #[arg(long, default_value = "hybrid")]
        mode: String,

        /// Maximum number of results to return.
        #[arg(long)]
        limit: Option<usize>,

        /// Restrict results to one recipe category (corpus subdirectory).
        #[arg(long)]
        category: Option<String>,
    },

    /// Retrieve a recipe by document id or corpus-relative path.
    Get {
        /// Document id or relative path.
        id: String,

        /// Print the document as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Manage embedding vectors.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Answer a cooking question from the indexed recipes.
    ///
    /// With a question argument, answers once and exits. Without one,
    /// reads questions from stdin until `exit` or `quit`.
    Ask {
        /// The question to answer.
        question: Option<String>,
    },
}

/// Embedding management subcommands.
#[derive(Subcommand)]
enum EmbedAction {
    /// Embed chunks that are missing or have stale embeddings.
    Pending {
        /// Maximum number of chunks to embed in this run.
        #[arg(long)]
        limit: Option<usize>,

        /// Override the batch size from config (texts per API call).
        #[arg(long)]
        batch_size: Option<usize>,

        /// Show counts without performing any embedding.
        #[arg(long)]
        dry_run: bool,
    },

    /// Delete and regenerate all embeddings.
    ///
    /// Useful when switching embedding models or dimensions.
    Rebuild {
        /// Override the batch size from config (texts per API call).
        #[arg(long)]
        batch_size: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Sync {
            full,
            dry_run,
            limit,
        } => {
            ingest::run_sync(&cfg, full, dry_run, limit).await?;
        }
        Commands::Search {
            query,
            mode,
            limit,
            category,
        } => {
            search::run_search(&cfg, &query, &mode, limit, category.as_deref()).await?;
        }
        Commands::Get { id, json } => {
            get::run_get(&cfg, &id, json).await?;
        }
        Commands::Embed { action } => match action {
            EmbedAction::Pending {
                limit,
                batch_size,
                dry_run,
            } => {
                indexer::run_embed_pending(&cfg, limit, batch_size, dry_run).await?;
            }
            EmbedAction::Rebuild { batch_size } => {
                indexer::run_embed_rebuild(&cfg, batch_size).await?;
            }
        },
        Commands::Ask { question } => {
            ask::run_ask(&cfg, question).await?;
        }
    }

    Ok(())
}
