//! Prompt assembly: context pieces, conversation history, referenced chats,
//! and the data-folder summary are folded into one prompt for the
//! generation collaborator. All pure string building.

use crate::models::{ChatMessage, ChatSession, Diagnostics, RetrievedChunk};
use std::collections::BTreeSet;
use std::path::Path;

/// Most recent turns kept in the history block, to bound prompt size.
pub const MAX_HISTORY_TURNS: usize = 8;
/// At most this many referenced past chats are summarized.
pub const MAX_REFERENCE_CHATS: usize = 3;
/// Response snippets are flattened and capped at this many characters.
pub const SNIPPET_MAX_CHARS: usize = 800;

/// Whitespace-flatten a chunk for display as a cited snippet.
pub fn snippet(content: &str) -> String {
    content
        .trim()
        .replace('\n', " ")
        .chars()
        .take(SNIPPET_MAX_CHARS)
        .collect()
}

/// Render the trailing conversation turns, most recent [`MAX_HISTORY_TURNS`].
pub fn history_block(history: &[ChatMessage]) -> String {
    let recent: Vec<&ChatMessage> = history
        .iter()
        .skip(history.len().saturating_sub(MAX_HISTORY_TURNS))
        .collect();
    if recent.is_empty() {
        return String::new();
    }

    let mut lines = Vec::with_capacity(recent.len());
    for message in recent {
        let role = if message.role == "user" { "User" } else { "Assistant" };
        lines.push(format!("{}: {}", role, message.content));
    }
    format!("Conversation so far:\n{}\n\n", lines.join("\n"))
}

/// Summarize referenced past chats: question/response counts and the first
/// question asked, capped at [`MAX_REFERENCE_CHATS`] sessions.
pub fn reference_block(sessions: &[ChatSession]) -> String {
    let mut refs = Vec::new();
    for session in sessions.iter().take(MAX_REFERENCE_CHATS) {
        let user_msgs: Vec<&ChatMessage> = session
            .messages
            .iter()
            .filter(|m| m.role == "user")
            .collect();
        let assistant_count = session
            .messages
            .iter()
            .filter(|m| m.role == "assistant")
            .count();

        let mut summary = format!(
            "'{}': {} questions, {} responses",
            session.title,
            user_msgs.len(),
            assistant_count
        );
        if let Some(first) = user_msgs.first() {
            let first_q: String = first.content.chars().take(80).collect();
            summary.push_str(&format!(". First question: {}", first_q));
        }
        refs.push(summary);
    }

    if refs.is_empty() {
        String::new()
    } else {
        format!("Related past conversations:\n{}\n\n", refs.join("\n"))
    }
}

/// Describe the data folder so the model can answer "what documents do you
/// have" questions, including the OCR warning for unindexed files.
pub fn sources_summary(diagnostics: &Diagnostics, retrieved: &[RetrievedChunk]) -> String {
    if !diagnostics.data_files.is_empty() {
        let mut summary = format!(
            "Files in your data folder: {}\n\n",
            diagnostics.data_files.join(", ")
        );
        if !diagnostics.unindexed_files.is_empty() {
            summary.push_str(&format!(
                "Note: These files have little or no extractable text and may require OCR: {}\n\n",
                diagnostics.unindexed_files.join(", ")
            ));
        }
        return summary;
    }

    if !diagnostics.indexed_sources.is_empty() {
        return format!(
            "All indexed documents in your knowledge base: {}\n\n",
            diagnostics.indexed_sources.join(", ")
        );
    }

    let retrieved_names: BTreeSet<String> = retrieved
        .iter()
        .filter_map(|c| {
            Path::new(&c.source)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
        })
        .collect();
    if retrieved_names.is_empty() {
        String::new()
    } else {
        format!(
            "Available documents in your knowledge base: {}\n\n",
            retrieved_names.into_iter().collect::<Vec<_>>().join(", ")
        )
    }
}

/// The retrieval-augmented prompt.
pub fn rag_prompt(
    query: &str,
    context_pieces: &[String],
    sources_summary: &str,
    reference_block: &str,
    history_block: &str,
) -> String {
    format!(
        "You are a helpful assistant with access to the user's personal knowledge base.\n\
         Use the following retrieved context to answer the question. Answer naturally and conversationally.\n\
         If the context contains relevant information, synthesize it into a clear answer.\n\
         If the user asks what documents or data exist, list the files from the data folder list.\n\
         If the user asks for a brief overview of the data store, mention each file; if a file has no extractable text, say it appears to be image-based or needs OCR.\n\
         Only say 'I don't know' if the context is completely unrelated to the question.\n\n\
         {}{}{}Context:\n{}\n\nQuestion: {}\nAnswer:",
        sources_summary,
        reference_block,
        history_block,
        context_pieces.join("\n\n"),
        query
    )
}

/// The prompt used when retrieval is disabled for the query.
pub fn plain_prompt(query: &str, reference_block: &str, history_block: &str) -> String {
    format!(
        "You are a helpful assistant. Answer the user's question naturally and conversationally.\n\
         If unsure, say you don't know.\n\n\
         {}{}Question: {}\nAnswer:",
        reference_block, history_block, query
    )
}
