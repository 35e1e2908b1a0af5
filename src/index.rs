//! Vector index lifecycle: build, open, swap.
//!
//! The index is a SQLite database under the index directory, holding every
//! chunk and its embedding BLOB, plus an `index_meta` table recording the
//! embedding model and dimensionality. A `manifest.json` beside it records
//! the mtime snapshot the index was built from.
//!
//! Opening an existing index is best-effort: an ordered list of strategies
//! is tried (embedder bound with the stored dimensionality verified,
//! embedder bound without the metadata check, read-only without embedding
//! capability), and if every strategy fails the index is rebuilt from
//! source files. Only when the rebuild itself fails does the caller see an
//! error, aggregating every attempt.
//!
//! Rebuilds are destructive and wholesale: a brand-new database is written
//! and swapped over the old one; there is no incremental merge. At most one
//! rebuild runs at a time ([`IndexHolder`] holds the gate); retrieval keeps
//! using the previously installed handle until the swap.

use anyhow::{anyhow, bail, Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::chunk;
use crate::config::Config;
use crate::embedding::{self, Embedder};
use crate::extract;
use crate::manifest;

pub const INDEX_FILE: &str = "index.sqlite";

/// An open handle onto the persisted index.
///
/// A handle opened through the read-only fallback carries no embedding
/// capability; it can list metadata but cannot serve queries.
pub struct IndexHandle {
    pool: SqlitePool,
    embedder: Option<Arc<dyn Embedder>>,
}

impl std::fmt::Debug for IndexHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexHandle")
            .field("pool", &self.pool)
            .field("has_embedder", &self.embedder.is_some())
            .finish()
    }
}

impl IndexHandle {
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn can_embed_queries(&self) -> bool {
        self.embedder.is_some()
    }

    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        match &self.embedder {
            Some(embedder) => embedder.embed_query(text).await,
            None => bail!(
                "index was opened without an embedding capability; \
                 reindex to restore query embedding"
            ),
        }
    }

    pub async fn chunk_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

/// Build a brand-new index from the data folder, replacing any existing one.
///
/// An empty data folder is a configuration error, not an empty index: this
/// protects a populated index from being wiped by a mistyped path.
pub async fn build(config: &Config, embedder: &Arc<dyn Embedder>) -> Result<IndexHandle> {
    let data_dir = &config.paths.data_dir;
    let index_dir = &config.paths.index_dir;

    let docs = extract::load_documents(data_dir)?;
    if docs.is_empty() {
        bail!(
            "No documents found to index in {}. Add files and try again.",
            data_dir.display()
        );
    }

    let chunks = chunk::split_documents(&docs, config.chunking.window_size, config.chunking.overlap);
    let chunk_count = chunks.len();

    std::fs::create_dir_all(index_dir)
        .with_context(|| format!("Failed to create index dir {}", index_dir.display()))?;
    let tmp_path = index_dir.join(format!("{INDEX_FILE}.tmp"));
    if tmp_path.exists() {
        std::fs::remove_file(&tmp_path)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", tmp_path.display()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Delete);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    create_schema(&pool).await?;

    sqlx::query("INSERT INTO index_meta (key, value) VALUES ('model', ?), ('dims', ?)")
        .bind(embedder.model_name())
        .bind(embedder.dims().to_string())
        .execute(&pool)
        .await?;

    let batch_size = config.embedding.batch_size.max(1);
    for batch in chunks.chunks(batch_size) {
        let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
        let vectors = embedder
            .embed_documents(&texts)
            .await
            .context("Embedding failed during index build")?;
        if vectors.len() != batch.len() {
            bail!(
                "Embedding provider returned {} vectors for {} inputs",
                vectors.len(),
                batch.len()
            );
        }

        let mut tx = pool.begin().await?;
        for (chunk, vector) in batch.iter().zip(vectors.iter()) {
            if vector.len() != embedder.dims() {
                bail!(
                    "Embedding provider '{}' returned a {}-dim vector, expected {}",
                    embedder.model_name(),
                    vector.len(),
                    embedder.dims()
                );
            }
            let chunk_id = Uuid::new_v4().to_string();
            sqlx::query("INSERT INTO chunks (id, source, chunk_index, content) VALUES (?, ?, ?, ?)")
                .bind(&chunk_id)
                .bind(&chunk.source)
                .bind(chunk.chunk_index)
                .bind(&chunk.content)
                .execute(&mut *tx)
                .await?;
            sqlx::query("INSERT INTO chunk_vectors (chunk_id, embedding) VALUES (?, ?)")
                .bind(&chunk_id)
                .bind(embedding::vec_to_blob(vector))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
    }

    pool.close().await;

    // Swap the fresh database over the old one wholesale. Readers holding
    // the previous handle keep the old inode until they drop it.
    let db_path = index_dir.join(INDEX_FILE);
    std::fs::rename(&tmp_path, &db_path)
        .with_context(|| format!("Failed to install new index at {}", db_path.display()))?;

    manifest::write(index_dir, &manifest::snapshot(data_dir))?;

    tracing::info!(
        "built index: {} chunks from {} documents",
        chunk_count,
        docs.len()
    );

    open_primary(&db_path, embedder).await
}

/// Load the persisted index if it exists and is fresh, otherwise rebuild.
///
/// Open strategies are tried in order; if all fail, the index is rebuilt
/// from source files so the service recovers from corruption on its own.
pub async fn load_or_build(config: &Config, embedder: &Arc<dyn Embedder>) -> Result<IndexHandle> {
    let data_dir = &config.paths.data_dir;
    let index_dir = &config.paths.index_dir;
    let db_path = index_dir.join(INDEX_FILE);

    if !db_path.exists() {
        tracing::info!("index not found at {}, building from scratch", db_path.display());
        return build(config, embedder).await;
    }

    if manifest::needs_rebuild(data_dir, index_dir) {
        tracing::info!("files in {} have changed, rebuilding index", data_dir.display());
        return build(config, embedder).await;
    }

    let mut attempts: Vec<String> = Vec::new();

    match open_primary(&db_path, embedder).await {
        Ok(handle) => return Ok(handle),
        Err(e) => attempts.push(format!("verified open: {e:#}")),
    }

    match open_unverified(&db_path, embedder).await {
        Ok(handle) => {
            tracing::warn!("opened index without metadata check: {}", attempts[0]);
            return Ok(handle);
        }
        Err(e) => attempts.push(format!("unverified open: {e:#}")),
    }

    match open_readonly(&db_path).await {
        Ok(handle) => {
            tracing::warn!("opened index read-only, without embedding capability");
            return Ok(handle);
        }
        Err(e) => attempts.push(format!("read-only: {e:#}")),
    }

    tracing::warn!("all open strategies failed, rebuilding index from source files");
    match build(config, embedder).await {
        Ok(handle) => Ok(handle),
        Err(e) => {
            attempts.push(format!("rebuild: {e:#}"));
            Err(anyhow!(
                "Failed to load or rebuild the vector index. Attempts: [{}]",
                attempts.join("; ")
            ))
        }
    }
}

/// Primary open: embedder bound, schema verified, stored dimensionality
/// checked against the provider.
async fn open_primary(db_path: &Path, embedder: &Arc<dyn Embedder>) -> Result<IndexHandle> {
    let pool = open_pool(db_path, false).await?;

    verify_schema(&pool).await?;

    let dims = stored_dims(&pool).await?;
    if dims != embedder.dims() {
        bail!(
            "index was built with {}-dim vectors but provider '{}' produces {}",
            dims,
            embedder.model_name(),
            embedder.dims()
        );
    }

    Ok(IndexHandle {
        pool,
        embedder: Some(embedder.clone()),
    })
}

/// Alternate open: embedder bound but no metadata check, for indexes whose
/// `index_meta` predates or disagrees with the current configuration.
async fn open_unverified(db_path: &Path, embedder: &Arc<dyn Embedder>) -> Result<IndexHandle> {
    let pool = open_pool(db_path, false).await?;

    verify_schema(&pool).await?;

    Ok(IndexHandle {
        pool,
        embedder: Some(embedder.clone()),
    })
}

/// Last-resort open: read-only and without an embedding capability. The
/// stored vectors remain inspectable but new queries cannot be embedded.
async fn open_readonly(db_path: &Path) -> Result<IndexHandle> {
    let pool = open_pool(db_path, true).await?;

    verify_schema(&pool).await?;

    Ok(IndexHandle {
        pool,
        embedder: None,
    })
}

async fn open_pool(db_path: &Path, read_only: bool) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(false)
        .read_only(read_only);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;
    Ok(pool)
}

async fn create_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE chunks (
            id TEXT PRIMARY KEY,
            source TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            content TEXT NOT NULL,
            UNIQUE(source, chunk_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE chunk_vectors (
            chunk_id TEXT PRIMARY KEY,
            embedding BLOB NOT NULL,
            FOREIGN KEY (chunk_id) REFERENCES chunks(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE TABLE index_meta (key TEXT PRIMARY KEY, value TEXT NOT NULL)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX idx_chunks_source ON chunks(source)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn verify_schema(pool: &SqlitePool) -> Result<()> {
    let tables: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' \
         AND name IN ('chunks', 'chunk_vectors', 'index_meta')",
    )
    .fetch_one(pool)
    .await?;

    if tables < 3 {
        bail!("index database is missing required tables");
    }
    Ok(())
}

async fn stored_dims(pool: &SqlitePool) -> Result<usize> {
    let value: Option<String> =
        sqlx::query_scalar("SELECT value FROM index_meta WHERE key = 'dims'")
            .fetch_optional(pool)
            .await?;

    value
        .and_then(|v| v.parse::<usize>().ok())
        .ok_or_else(|| anyhow!("index metadata does not record a vector dimensionality"))
}

/// The process-wide, swappable index handle.
///
/// Readers take a clone of the current `Arc` and keep using it even while a
/// replacement is being built; installing the replacement is the only
/// exclusive step. The rebuild gate guarantees at most one rebuild in
/// flight across the inline (per-query) and background (admin reindex)
/// paths — both go through the same build routine.
#[derive(Default)]
pub struct IndexHolder {
    current: RwLock<Option<Arc<IndexHandle>>>,
    rebuild_gate: Mutex<()>,
}

impl IndexHolder {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn current(&self) -> Option<Arc<IndexHandle>> {
        self.current.read().await.clone()
    }

    /// Startup path: load the persisted index if fresh, build otherwise.
    pub async fn load_or_build(
        &self,
        config: &Config,
        embedder: &Arc<dyn Embedder>,
    ) -> Result<Arc<IndexHandle>> {
        let _gate = self.rebuild_gate.lock().await;
        let handle = Arc::new(load_or_build(config, embedder).await?);
        *self.current.write().await = Some(handle.clone());
        Ok(handle)
    }

    /// Unconditional rebuild, used by the explicit reindex trigger.
    pub async fn rebuild(
        &self,
        config: &Config,
        embedder: &Arc<dyn Embedder>,
    ) -> Result<Arc<IndexHandle>> {
        let _gate = self.rebuild_gate.lock().await;
        let handle = Arc::new(build(config, embedder).await?);
        *self.current.write().await = Some(handle.clone());
        Ok(handle)
    }

    /// Per-query freshness check: rebuild when no handle is installed or the
    /// data folder changed since the last build, otherwise a no-op.
    pub async fn ensure_up_to_date(
        &self,
        config: &Config,
        embedder: &Arc<dyn Embedder>,
    ) -> Result<Arc<IndexHandle>> {
        if let Some(handle) = self.current().await {
            if !manifest::needs_rebuild(&config.paths.data_dir, &config.paths.index_dir) {
                return Ok(handle);
            }
        }

        let _gate = self.rebuild_gate.lock().await;
        // A rebuild that finished while we waited may already cover this change.
        if let Some(handle) = self.current().await {
            if !manifest::needs_rebuild(&config.paths.data_dir, &config.paths.index_dir) {
                return Ok(handle);
            }
        }

        tracing::info!("detected file changes or missing index; rebuilding vector store");
        let handle = Arc::new(build(config, embedder).await?);
        *self.current.write().await = Some(handle.clone());
        Ok(handle)
    }
}
