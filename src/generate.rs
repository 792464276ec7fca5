//! Answer generation from retrieved context.
//!
//! A question is first routed into one of three intents, then answered
//! with a prompt assembled from the retrieved chunks. `list` questions
//! are answered directly from the retrieved dish names; the other two
//! routes build a labeled context block, trimmed to a character budget,
//! and send it with the question to the chat provider.

use crate::config::LlmConfig;
use crate::error::PipelineError;
use crate::llm::ChatProvider;
use crate::models::{Answer, ScoredChunk};

/// Question intent, decided by the chat provider with a conservative
/// fallback to `General` when the classification is unusable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryRoute {
    /// "What dishes do you know?" — wants names, not methods.
    List,
    /// "How do I make X?" — wants a concrete method.
    Detail,
    /// Anything else.
    General,
}

impl QueryRoute {
    fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "list" => QueryRoute::List,
            "detail" => QueryRoute::Detail,
            _ => QueryRoute::General,
        }
    }
}

const ROUTE_SYSTEM_PROMPT: &str = "You classify cooking questions. Reply with exactly one word:\n\
    'list' if the user wants to know which dishes are available,\n\
    'detail' if the user asks how to prepare a specific dish,\n\
    'general' for anything else. No other output.";

const ANSWER_SYSTEM_PROMPT: &str = "You are a precise cooking assistant. Answer using only the \
    recipe excerpts provided. If the excerpts do not contain the answer, say so plainly instead \
    of guessing. Keep quantities and times exactly as written.";

const DETAIL_SYSTEM_PROMPT: &str = "You are a precise cooking assistant. Using only the recipe \
    excerpts provided, explain the preparation method step by step. Keep ingredient quantities, \
    temperatures, and times exactly as written. If a step is missing from the excerpts, say so.";

/// Classify the question. Routing is advisory; any provider failure or
/// unexpected label falls back to `General` rather than blocking the
/// answer.
pub async fn route_query(provider: &dyn ChatProvider, question: &str) -> QueryRoute {
    match provider.complete(ROUTE_SYSTEM_PROMPT, question).await {
        Ok(label) => QueryRoute::from_label(&label),
        Err(e) => {
            tracing::debug!(error = %e, "query routing failed, treating as general");
            QueryRoute::General
        }
    }
}

/// Assemble the context block: chunks in rank order, each labeled with
/// its dish name and section, until the character budget is spent.
/// Lowest-ranked chunks are dropped first. Returns the block and the
/// ids of the chunks that made it in.
pub fn build_context(chunks: &[ScoredChunk], max_context_chars: usize) -> (String, Vec<String>) {
    let mut block = String::new();
    let mut included = Vec::new();

    for chunk in chunks {
        let label = match &chunk.section {
            Some(section) => format!("[{} / {}]", chunk.title, section),
            None => format!("[{}]", chunk.title),
        };
        let entry = format!("{}\n{}\n\n", label, chunk.text.trim());

        if !block.is_empty() && block.chars().count() + entry.chars().count() > max_context_chars {
            break;
        }
        block.push_str(&entry);
        included.push(chunk.chunk_id.clone());

        if block.chars().count() >= max_context_chars {
            break;
        }
    }

    (block, included)
}

/// Produce an answer for an already-routed question.
pub async fn generate_answer(
    provider: &dyn ChatProvider,
    config: &LlmConfig,
    route: QueryRoute,
    question: &str,
    chunks: &[ScoredChunk],
) -> Result<Answer, PipelineError> {
    if chunks.is_empty() {
        return Ok(Answer {
            text: "I could not find any matching recipes for that question.".to_string(),
            context: Vec::new(),
        });
    }

    if route == QueryRoute::List {
        return Ok(list_answer(chunks));
    }

    let (context, included) = build_context(chunks, config.max_context_chars);

    let system = match route {
        QueryRoute::Detail => DETAIL_SYSTEM_PROMPT,
        _ => ANSWER_SYSTEM_PROMPT,
    };
    let user = format!("Recipe excerpts:\n\n{}Question: {}", context, question);

    let text = provider.complete(system, &user).await?;
    if text.trim().is_empty() {
        return Err(PipelineError::Generation {
            provider: provider.model_name().to_string(),
            reason: "provider returned an empty completion".to_string(),
        });
    }

    Ok(Answer {
        text,
        context: included,
    })
}

/// List questions are answered from the retrieved dish names alone; no
/// completion call needed.
fn list_answer(chunks: &[ScoredChunk]) -> Answer {
    let mut names: Vec<&str> = Vec::new();
    for chunk in chunks {
        if !names.contains(&chunk.title.as_str()) {
            names.push(&chunk.title);
        }
    }

    let mut text = String::from("Dishes I can help with:\n");
    for name in &names {
        text.push_str(&format!("  - {}\n", name));
    }

    Answer {
        text,
        context: chunks.iter().map(|c| c.chunk_id.clone()).collect(),
    }
}
