//! Core data types and HTTP API schemas.
//!
//! These types flow through the indexing and retrieval pipeline and define
//! the JSON contract of the HTTP shell.

use serde::{Deserialize, Serialize};

/// One ingested file, normalized to plain text.
///
/// Created fresh on every extraction pass and never mutated; the `source`
/// path doubles as provenance and as the manifest key.
#[derive(Debug, Clone)]
pub struct Document {
    pub source: String,
    pub content: String,
}

/// A bounded slice of a document's content, plus overlap from its neighbors.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub source: String,
    pub chunk_index: i64,
    pub content: String,
}

/// A chunk returned from nearest-neighbor retrieval.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub content: String,
    pub source: String,
    pub score: f32,
}

/// Cross-reference of the data folder against the index's source set.
///
/// `unindexed_files` are present on disk but absent from the index —
/// typically scanned PDFs with no extractable text.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    pub data_files: Vec<String>,
    pub indexed_sources: Vec<String>,
    pub unindexed_files: Vec<String>,
}

/// One role-tagged message inside a chat session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<serde_json::Value>>,
}

/// A persisted chat transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub updated_at: Option<i64>,
}

/// Payload for creating a chat session; both fields optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatCreate {
    pub title: Option<String>,
    pub messages: Option<Vec<ChatMessage>>,
}

/// Brief view of a chat used when referencing it from another conversation.
#[derive(Debug, Clone, Serialize)]
pub struct ChatSummary {
    pub id: String,
    pub title: String,
    pub first_question: String,
    pub message_count: usize,
}

/// `POST /query` request body.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub k: Option<usize>,
    #[serde(default = "default_use_rag")]
    pub use_rag: bool,
    #[serde(default)]
    pub history: Option<Vec<ChatMessage>>,
    #[serde(default)]
    pub reference_chats: Option<Vec<String>>,
    // Optional generation parameters, forwarded to Ollama only when set.
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub top_k: Option<i64>,
    #[serde(default)]
    pub repeat_penalty: Option<f64>,
    #[serde(default)]
    pub seed: Option<i64>,
    /// Mapped to Ollama's `num_predict`.
    #[serde(default)]
    pub max_tokens: Option<i64>,
    #[serde(default)]
    pub num_ctx: Option<i64>,
    #[serde(default)]
    pub mirostat: Option<i64>,
    #[serde(default)]
    pub mirostat_tau: Option<f64>,
    #[serde(default)]
    pub mirostat_eta: Option<f64>,
    #[serde(default)]
    pub stop: Option<Vec<String>>,
}

fn default_use_rag() -> bool {
    true
}

/// One cited source in a query response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuerySource {
    pub source: String,
    pub snippet: String,
}

/// `POST /query` response body.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub answer: String,
    pub sources: Vec<QuerySource>,
}
