//! # localrag
//!
//! A local retrieval-augmented generation service over a folder of documents.
//!
//! localrag indexes the files in a data folder into a SQLite-backed vector
//! store, retrieves semantically relevant chunks for a query, and forwards an
//! assembled prompt to a locally-hosted language model (Ollama), returning
//! the answer with cited sources. Chat sessions are persisted as flat JSON
//! records so past conversations can be revisited and referenced as context.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌───────────┐
//! │  Extract  │──▶│ Chunk+Embed  │──▶│  SQLite   │
//! │ txt/md/pdf│   │              │   │  vectors  │
//! └───────────┘   └──────────────┘   └────┬──────┘
//!       ▲                                 │
//!  manifest.json (mtime staleness)        ▼
//!                                   ┌───────────┐   ┌────────┐
//!                                   │ Retrieve  │──▶│ Ollama │
//!                                   │  + HTTP   │   │ (gen)  │
//!                                   └───────────┘   └────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types and API schemas |
//! | [`extract`] | Multi-format content extraction |
//! | [`chunk`] | Overlapping-window text splitting |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`manifest`] | mtime snapshots for staleness detection |
//! | [`index`] | Vector index build / load / swap |
//! | [`retrieve`] | Nearest-neighbor retrieval + diagnostics |
//! | [`generate`] | Generation collaborator (Ollama) |
//! | [`prompt`] | Prompt assembly |
//! | [`chats`] | Chat session store |
//! | [`server`] | HTTP API |

pub mod chats;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod extract;
pub mod generate;
pub mod index;
pub mod manifest;
pub mod models;
pub mod prompt;
pub mod retrieve;
pub mod server;
