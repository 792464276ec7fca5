//! # Sous Chef
//!
//! A local-first recipe question-answering assistant.
//!
//! Sous Chef ingests a directory of recipe files, chunks them along
//! their section structure, indexes them in SQLite (FTS5 keyword index
//! plus embedding vectors), and answers cooking questions with an LLM
//! grounded in the retrieved recipe text.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌───────────┐
//! │  Corpus  │──▶│   Pipeline    │──▶│  SQLite    │
//! │ recipes/ │   │ Chunk+Embed  │   │ FTS5+Vec  │
//! └──────────┘   └──────────────┘   └─────┬─────┘
//!                                         │
//!                          ┌──────────────┤
//!                          ▼              ▼
//!                     ┌─────────┐   ┌──────────┐
//!                     │ search  │   │   ask    │
//!                     │ hybrid  │   │ RAG loop │
//!                     └─────────┘   └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! sous init                     # create database
//! sous sync                     # ingest and embed recipes
//! sous search "braised pork" --mode hybrid
//! sous ask "how long do I simmer braised pork?"
//! sous ask                      # interactive loop
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`corpus`] | Recipe directory loader |
//! | [`chunk`] | Section-aware text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`indexer`] | Embedding index construction |
//! | [`search`] | Keyword, semantic, and hybrid retrieval |
//! | [`llm`] | Chat provider abstraction |
//! | [`generate`] | Prompt assembly and answer generation |
//! | [`ask`] | Question-answering orchestrator |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod ask;
pub mod chunk;
pub mod config;
pub mod corpus;
pub mod db;
pub mod embedding;
pub mod error;
pub mod generate;
pub mod get;
pub mod indexer;
pub mod ingest;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod search;
