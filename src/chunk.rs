//! Heading-aware text chunker.
//!
//! Splits a recipe body into [`Chunk`]s in two passes: first on Markdown
//! heading boundaries (`#`/`##`/`###`), so each chunk stays inside one
//! structural section, then into fixed-stride character windows that
//! respect `max_chars` with an `overlap_chars` carry-over between
//! consecutive windows.
//!
//! Heading lines are kept inside their section, so the sections exactly
//! partition the body; within a section, concatenating the first window
//! with each later window minus its overlap prefix reconstructs the
//! section text. Chunking is fully deterministic: identical body and
//! config always produce the identical chunk sequence (text, hash,
//! index), which is what lets the indexer detect unchanged chunks by
//! content hash.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::ChunkingConfig;
use crate::models::Chunk;

/// A contiguous span of the body under one heading (or the preamble
/// before the first heading).
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Section {
    /// Heading text without the `#` markers, if the section has one.
    pub heading: Option<String>,
    /// Raw section text, heading line included.
    pub text: String,
}

/// Split a document body into chunks. Indices are contiguous from 0
/// across the whole document.
pub fn chunk_document(document_id: &str, body: &str, cfg: &ChunkingConfig) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut index: i64 = 0;

    for section in split_sections(body) {
        let tag = section.heading.as_deref().and_then(classify_heading);
        let trimmed = section.text.trim();
        if trimmed.is_empty() {
            continue;
        }

        for window in windows(trimmed, cfg.max_chars, cfg.overlap_chars) {
            chunks.push(make_chunk(document_id, index, tag.clone(), window));
            index += 1;
        }
    }

    // Guarantee at least one chunk so every document is retrievable
    if chunks.is_empty() {
        chunks.push(make_chunk(document_id, 0, None, body.trim()));
    }

    chunks
}

/// Split the body at Markdown heading lines. Concatenating the returned
/// section texts yields the body unchanged.
pub(crate) fn split_sections(body: &str) -> Vec<Section> {
    let mut sections: Vec<Section> = Vec::new();
    let mut current_start = 0usize;
    let mut current_heading: Option<String> = None;
    let mut line_start = 0usize;

    for line in body.split_inclusive('\n') {
        if let Some(heading) = parse_heading(line) {
            if line_start > current_start {
                sections.push(Section {
                    heading: current_heading.take(),
                    text: body[current_start..line_start].to_string(),
                });
            }
            current_start = line_start;
            current_heading = Some(heading);
        }
        line_start += line.len();
    }

    if current_start < body.len() || sections.is_empty() {
        sections.push(Section {
            heading: current_heading,
            text: body[current_start..].to_string(),
        });
    }

    sections
}

/// Recognize `#`, `##`, or `###` heading lines and return the heading text.
fn parse_heading(line: &str) -> Option<String> {
    let trimmed = line.trim_start();
    let hashes = trimmed.chars().take_while(|&c| c == '#').count();
    if !(1..=3).contains(&hashes) {
        return None;
    }
    let rest = &trimmed[hashes..];
    if !rest.starts_with(' ') {
        return None;
    }
    Some(rest.trim().to_string())
}

/// Map a heading to a structural tag. Covers the English and Chinese
/// section names found in common recipe corpora.
fn classify_heading(heading: &str) -> Option<String> {
    let lower = heading.to_lowercase();
    const INGREDIENTS: &[&str] = &["ingredient", "原料", "材料", "食材"];
    const STEPS: &[&str] = &[
        "step",
        "instruction",
        "method",
        "direction",
        "operation",
        "步骤",
        "操作",
        "做法",
    ];

    if INGREDIENTS.iter().any(|kw| lower.contains(kw)) {
        Some("ingredients".to_string())
    } else if STEPS.iter().any(|kw| lower.contains(kw)) {
        Some("steps".to_string())
    } else {
        None
    }
}

/// Fixed-stride character windows over `text`. Each window after the
/// first begins with the final `overlap` chars of its predecessor, so
/// dropping that prefix on windows 1.. reconstructs `text` exactly.
pub(crate) fn windows(text: &str, max_chars: usize, overlap: usize) -> Vec<&str> {
    debug_assert!(overlap < max_chars);

    // Byte offsets of every char boundary, including the end of text.
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let n_chars = bounds.len() - 1;

    if n_chars <= max_chars {
        return vec![text];
    }

    let stride = max_chars - overlap;
    let mut out = Vec::new();
    let mut start = 0usize;

    loop {
        let end = (start + max_chars).min(n_chars);
        out.push(&text[bounds[start]..bounds[end]]);
        if end == n_chars {
            break;
        }
        start += stride;
    }

    out
}

fn make_chunk(document_id: &str, index: i64, section: Option<String>, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        chunk_index: index,
        section,
        text: text.to_string(),
        hash,
    }
}
