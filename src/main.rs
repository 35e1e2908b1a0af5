//! # localrag daemon (`ragd`)
//!
//! CLI entry point for the local RAG service.
//!
//! ## Usage
//!
//! ```bash
//! ragd --config ./localrag.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragd serve` | Start the HTTP service |
//! | `ragd reindex` | Rebuild the vector index from the data folder |
//! | `ragd query "<text>"` | One-shot retrieval-augmented question |
//! | `ragd sources` | List the documents extractable from the data folder |

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use localrag::config::{self, Config};
use localrag::generate::{self, GenerateOptions};
use localrag::index::IndexHolder;
use localrag::models::Diagnostics;
use localrag::{embedding, extract, prompt, retrieve, server};

/// localrag — retrieval-augmented generation over a local folder of
/// documents, answered by a locally-hosted model.
#[derive(Parser)]
#[command(
    name = "ragd",
    about = "localrag — retrieval-augmented generation over a local folder of documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML). Built-in defaults apply when the
    /// file does not exist.
    #[arg(long, global = true, default_value = "./localrag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP service.
    Serve,

    /// Rebuild the vector index from the data folder, replacing any
    /// existing index.
    Reindex,

    /// Ask a one-shot question from the terminal.
    Query {
        /// The question to answer.
        query: String,

        /// Number of chunks to retrieve (defaults to retrieval.default_k).
        #[arg(long)]
        k: Option<usize>,

        /// Skip retrieval and ask the model directly.
        #[arg(long)]
        no_rag: bool,
    },

    /// List the documents extractable from the data folder.
    Sources,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Serve => {
            server::run_server(cfg).await?;
        }
        Commands::Reindex => {
            let embedder = embedding::create_embedder(&cfg.embedding)?;
            let handle = localrag::index::build(&cfg, &embedder).await?;
            println!("reindex complete");
            println!("  chunks: {}", handle.chunk_count().await?);
            println!("ok");
        }
        Commands::Query { query, k, no_rag } => {
            run_query(&cfg, &query, k, no_rag).await?;
        }
        Commands::Sources => {
            let docs = extract::load_documents(&cfg.paths.data_dir)?;
            for doc in &docs {
                println!("{}", doc.source);
            }
            println!("{} documents", docs.len());
        }
    }

    Ok(())
}

async fn run_query(cfg: &Config, query: &str, k: Option<usize>, no_rag: bool) -> Result<()> {
    let embedder = embedding::create_embedder(&cfg.embedding)?;

    let prompt_text = if no_rag {
        prompt::plain_prompt(query, "", "")
    } else {
        let holder = IndexHolder::new();
        let handle = holder.ensure_up_to_date(cfg, &embedder).await?;
        let k = k.unwrap_or(cfg.retrieval.default_k);
        let (retrieved, diagnostics) =
            retrieve::retrieve(&handle, &cfg.paths.data_dir, query, k).await?;

        let context_pieces: Vec<String> = retrieved
            .iter()
            .map(|c| format!("Source: {}\n{}", c.source, c.content))
            .collect();
        let summary = prompt::sources_summary(&diagnostics, &retrieved);
        let text = prompt::rag_prompt(query, &context_pieces, &summary, "", "");

        print_sources(&retrieved, &diagnostics);
        text
    };

    let answer = generate::generate(&cfg.generation, &prompt_text, &GenerateOptions::default())
        .await?;
    println!("{answer}");
    Ok(())
}

fn print_sources(retrieved: &[localrag::models::RetrievedChunk], diagnostics: &Diagnostics) {
    for (i, chunk) in retrieved.iter().enumerate() {
        println!("{}. [{:.3}] {}", i + 1, chunk.score, chunk.source);
    }
    if !diagnostics.unindexed_files.is_empty() {
        println!(
            "note: present but unindexed (may need OCR): {}",
            diagnostics.unindexed_files.join(", ")
        );
    }
    if !retrieved.is_empty() {
        println!();
    }
}
