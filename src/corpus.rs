//! Recipe corpus scanner.
//!
//! Walks the configured corpus root, applies include/exclude globs,
//! and produces [`RecipeFile`]s in deterministic (path-sorted) order.
//! The scan is read-only and restartable: it never mutates source
//! files, and re-running it over an unchanged tree yields the same
//! result. Files that cannot be read or decoded are collected as
//! [`LoadFailure`]s and skipped; a bad file never aborts the scan.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use std::path::Path;
use walkdir::WalkDir;

use crate::config::Config;
use crate::error::PipelineError;
use crate::models::{LoadFailure, RecipeFile};

/// Result of one corpus scan.
#[derive(Debug)]
pub struct CorpusScan {
    pub files: Vec<RecipeFile>,
    pub failures: Vec<LoadFailure>,
    /// SHA-256 over the sorted (path, content hash) pairs; identifies
    /// this corpus snapshot for index freshness checks.
    pub corpus_hash: String,
}

/// Scan the corpus root. Fails only if the root itself is missing or
/// the glob configuration is invalid; per-file problems are reported
/// in [`CorpusScan::failures`].
pub fn scan_corpus(config: &Config) -> Result<CorpusScan> {
    let root = &config.corpus.root;
    if !root.exists() {
        bail!("Corpus root does not exist: {}", root.display());
    }

    let include_set = build_globset(&config.corpus.include_globs)?;

    let mut default_excludes = vec!["**/.git/**".to_string(), "**/target/**".to_string()];
    default_excludes.extend(config.corpus.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut files = Vec::new();
    let mut failures = Vec::new();

    for entry in WalkDir::new(root) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                failures.push(LoadFailure {
                    relative_path: e
                        .path()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default(),
                    reason: e.to_string(),
                });
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        match load_file(path, &rel_str) {
            Ok(file) => files.push(file),
            Err(e) => {
                tracing::warn!(path = %rel_str, error = %e, "skipping unreadable document");
                failures.push(LoadFailure {
                    relative_path: rel_str,
                    reason: e.to_string(),
                });
            }
        }
    }

    // Sort for deterministic ordering and a stable corpus hash
    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

    let mut hasher = Sha256::new();
    for file in &files {
        hasher.update(file.relative_path.as_bytes());
        hasher.update(b"\0");
        hasher.update(file.content_hash.as_bytes());
    }
    let corpus_hash = format!("{:x}", hasher.finalize());

    Ok(CorpusScan {
        files,
        failures,
        corpus_hash,
    })
}

fn load_file(path: &Path, relative_path: &str) -> Result<RecipeFile, PipelineError> {
    let load_err = |reason: String| PipelineError::Load {
        path: path.to_path_buf(),
        reason,
    };

    let metadata = std::fs::metadata(path).map_err(|e| load_err(e.to_string()))?;
    let modified_at = metadata
        .modified()
        .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;

    let bytes = std::fs::read(path).map_err(|e| load_err(e.to_string()))?;
    let body = String::from_utf8(bytes)
        .map_err(|_| load_err("file is not valid UTF-8".to_string()))?;

    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    let content_hash = format!("{:x}", hasher.finalize());

    let title = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    // The directory layout doubles as the category taxonomy
    // (e.g. recipes/soup/hot-and-sour.md -> category "soup").
    let category = Path::new(relative_path)
        .parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    Ok(RecipeFile {
        relative_path: relative_path.to_string(),
        title,
        category,
        body,
        content_hash,
        modified_at,
    })
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
