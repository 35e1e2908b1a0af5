//! End-to-end pipeline tests: extract → chunk → embed → index → retrieve,
//! driven by a deterministic in-test embedder so no model server is needed.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tempfile::TempDir;

use localrag::config::Config;
use localrag::embedding::Embedder;
use localrag::index::{self, IndexHolder};
use localrag::manifest;
use localrag::retrieve;

const TEST_DIMS: usize = 32;

/// Deterministic embedder: byte histogram folded into a fixed-size vector,
/// L2-normalized. Identical text always embeds identically.
struct MockEmbedder {
    dims: usize,
}

impl MockEmbedder {
    fn embed(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for (i, b) in text.bytes().enumerate() {
            v[(b as usize + i) % self.dims] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    fn model_name(&self) -> &str {
        "mock"
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed(t)).collect())
    }
}

fn test_embedder() -> Arc<dyn Embedder> {
    Arc::new(MockEmbedder { dims: TEST_DIMS })
}

fn test_config(root: &Path) -> Config {
    let mut cfg = Config::default();
    cfg.paths.data_dir = root.join("data");
    cfg.paths.index_dir = root.join("index");
    cfg.paths.chats_dir = root.join("chats");
    cfg.embedding.dims = TEST_DIMS;
    cfg
}

fn setup(files: &[(&str, &str)]) -> (TempDir, Config) {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(tmp.path());
    fs::create_dir_all(&cfg.paths.data_dir).unwrap();
    for (name, content) in files {
        fs::write(cfg.paths.data_dir.join(name), content).unwrap();
    }
    (tmp, cfg)
}

#[tokio::test]
async fn build_creates_fresh_index() {
    let (_tmp, cfg) = setup(&[("a.txt", "Rust systems programming notes.")]);
    let embedder = test_embedder();

    let handle = index::build(&cfg, &embedder).await.unwrap();
    assert!(handle.chunk_count().await.unwrap() > 0);
    assert!(cfg.index_db_path().exists());

    // Immediately after a build with no filesystem changes, nothing is stale.
    assert!(!manifest::needs_rebuild(&cfg.paths.data_dir, &cfg.paths.index_dir));
}

#[tokio::test]
async fn build_refuses_empty_root() {
    let (_tmp, cfg) = setup(&[]);
    let embedder = test_embedder();

    let err = index::build(&cfg, &embedder).await.unwrap_err();
    assert!(err.to_string().contains("No documents found"));
    assert!(!cfg.index_db_path().exists());
}

#[tokio::test]
async fn mtime_change_makes_index_stale() {
    let (_tmp, cfg) = setup(&[("a.txt", "original content")]);
    let embedder = test_embedder();
    index::build(&cfg, &embedder).await.unwrap();
    assert!(!manifest::needs_rebuild(&cfg.paths.data_dir, &cfg.paths.index_dir));

    // mtime has one-second resolution in the manifest.
    std::thread::sleep(std::time::Duration::from_millis(1100));
    fs::write(cfg.paths.data_dir.join("a.txt"), "original content").unwrap();
    assert!(manifest::needs_rebuild(&cfg.paths.data_dir, &cfg.paths.index_dir));
}

#[tokio::test]
async fn added_and_removed_files_make_index_stale() {
    let (_tmp, cfg) = setup(&[("a.txt", "alpha")]);
    let embedder = test_embedder();
    index::build(&cfg, &embedder).await.unwrap();

    fs::write(cfg.paths.data_dir.join("b.txt"), "beta").unwrap();
    assert!(manifest::needs_rebuild(&cfg.paths.data_dir, &cfg.paths.index_dir));

    index::build(&cfg, &embedder).await.unwrap();
    assert!(!manifest::needs_rebuild(&cfg.paths.data_dir, &cfg.paths.index_dir));

    fs::remove_file(cfg.paths.data_dir.join("b.txt")).unwrap();
    assert!(manifest::needs_rebuild(&cfg.paths.data_dir, &cfg.paths.index_dir));
}

#[tokio::test]
async fn retrieval_respects_k_and_score_order() {
    // One 2500-character document with window 1000 / overlap 200.
    let body = "The quick brown fox jumps over the lazy dog. ".repeat(56);
    let (_tmp, cfg) = setup(&[("long.txt", &body[..2500])]);
    let embedder = test_embedder();

    let handle = index::build(&cfg, &embedder).await.unwrap();
    let (results, _) = retrieve::retrieve(&handle, &cfg.paths.data_dir, "quick fox", 3)
        .await
        .unwrap();

    assert!(!results.is_empty());
    assert!(results.len() <= 3);
    for chunk in &results {
        assert!(chunk.content.chars().count() <= 1000);
        assert!(chunk.source.ends_with("long.txt"));
    }
    for pair in results.windows(2) {
        assert!(pair[0].score >= pair[1].score, "scores must be non-increasing");
    }
}

#[tokio::test]
async fn zero_k_is_rejected() {
    let (_tmp, cfg) = setup(&[("a.txt", "something")]);
    let embedder = test_embedder();
    let handle = index::build(&cfg, &embedder).await.unwrap();

    let err = retrieve::retrieve(&handle, &cfg.paths.data_dir, "anything", 0)
        .await
        .unwrap_err();
    assert!(err.to_string().contains(">= 1"));
}

#[tokio::test]
async fn unextractable_file_reported_as_unindexed() {
    let text = "Plain text that ends up in the index. ".repeat(16);
    let (_tmp, cfg) = setup(&[("a.txt", &text)]);
    // A binary file with no extractable text stands in for a scanned PDF.
    fs::write(cfg.paths.data_dir.join("photo.png"), [0x89u8, 0x50, 0x4E, 0x47]).unwrap();

    let embedder = test_embedder();
    let handle = index::build(&cfg, &embedder).await.unwrap();
    let (results, diagnostics) = retrieve::retrieve(&handle, &cfg.paths.data_dir, "text", 5)
        .await
        .unwrap();

    // Only a.txt was indexed...
    for chunk in &results {
        assert!(chunk.source.ends_with("a.txt"));
    }
    assert_eq!(diagnostics.indexed_sources, vec!["a.txt"]);
    // ...but the binary file is still enumerated and flagged.
    assert!(diagnostics.data_files.contains(&"photo.png".to_string()));
    assert_eq!(diagnostics.unindexed_files, vec!["photo.png"]);
}

#[tokio::test]
async fn rebuild_is_idempotent() {
    let (_tmp, cfg) = setup(&[
        ("a.txt", "Notes about embedding pipelines and staleness."),
        ("b.md", "# Beta\n\nA second document for the index."),
    ]);
    let embedder = test_embedder();

    let first = index::build(&cfg, &embedder).await.unwrap();
    let (chunks_a, _) = retrieve::retrieve(&first, &cfg.paths.data_dir, "document", 100)
        .await
        .unwrap();

    let second = index::build(&cfg, &embedder).await.unwrap();
    let (chunks_b, _) = retrieve::retrieve(&second, &cfg.paths.data_dir, "document", 100)
        .await
        .unwrap();

    let mut pairs_a: Vec<(String, String)> = chunks_a
        .into_iter()
        .map(|c| (c.source, c.content))
        .collect();
    let mut pairs_b: Vec<(String, String)> = chunks_b
        .into_iter()
        .map(|c| (c.source, c.content))
        .collect();
    pairs_a.sort();
    pairs_b.sort();
    assert_eq!(pairs_a, pairs_b);
}

#[tokio::test]
async fn corrupted_index_self_heals_on_load() {
    let (_tmp, cfg) = setup(&[("a.txt", "Recoverable content for the index.")]);
    let embedder = test_embedder();
    index::build(&cfg, &embedder).await.unwrap();

    // Clobber the database while keeping the manifest fresh, so only the
    // open strategies (not staleness) can notice.
    fs::write(cfg.index_db_path(), b"this is not a sqlite database").unwrap();
    assert!(!manifest::needs_rebuild(&cfg.paths.data_dir, &cfg.paths.index_dir));

    let handle = index::load_or_build(&cfg, &embedder).await.unwrap();
    assert!(handle.chunk_count().await.unwrap() > 0);
    let (results, _) = retrieve::retrieve(&handle, &cfg.paths.data_dir, "recoverable", 1)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
}

#[tokio::test]
async fn load_or_build_reuses_fresh_index() {
    let (_tmp, cfg) = setup(&[("a.txt", "stable content")]);
    let embedder = test_embedder();
    index::build(&cfg, &embedder).await.unwrap();

    // No changes: loading must not rebuild (and must succeed).
    let handle = index::load_or_build(&cfg, &embedder).await.unwrap();
    assert!(handle.can_embed_queries());
    assert!(handle.chunk_count().await.unwrap() > 0);
}

#[tokio::test]
async fn holder_rebuilds_per_query_when_stale() {
    let (_tmp, cfg) = setup(&[("a.txt", "first generation of content")]);
    let embedder = test_embedder();
    let holder = IndexHolder::new();

    // Absent → building → ready.
    let handle = holder.ensure_up_to_date(&cfg, &embedder).await.unwrap();
    assert!(handle.chunk_count().await.unwrap() > 0);

    // Fresh → no-op: the same handle is returned.
    let again = holder.ensure_up_to_date(&cfg, &embedder).await.unwrap();
    assert!(Arc::ptr_eq(&handle, &again));

    // Stale → rebuilt, and the new content is retrievable.
    std::thread::sleep(std::time::Duration::from_millis(1100));
    fs::write(cfg.paths.data_dir.join("b.txt"), "a brand new document").unwrap();
    let rebuilt = holder.ensure_up_to_date(&cfg, &embedder).await.unwrap();
    assert!(!Arc::ptr_eq(&handle, &rebuilt));

    let (results, _) = retrieve::retrieve(&rebuilt, &cfg.paths.data_dir, "brand new", 10)
        .await
        .unwrap();
    assert!(results.iter().any(|c| c.source.ends_with("b.txt")));
}

#[tokio::test]
async fn background_and_inline_rebuilds_share_the_gate() {
    let (_tmp, cfg) = setup(&[("a.txt", "contended content for concurrent rebuilds")]);
    let embedder = test_embedder();
    let holder = Arc::new(IndexHolder::new());

    // Race an explicit rebuild against a per-query freshness check; the
    // rebuild gate must serialize them without either failing.
    let bg_holder = holder.clone();
    let bg_cfg = cfg.clone();
    let bg_embedder = embedder.clone();
    let background =
        tokio::spawn(async move { bg_holder.rebuild(&bg_cfg, &bg_embedder).await.map(|_| ()) });

    let inline = holder.ensure_up_to_date(&cfg, &embedder).await;
    assert!(inline.is_ok());
    assert!(background.await.unwrap().is_ok());
    assert!(holder.current().await.is_some());
}
