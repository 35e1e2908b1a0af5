//! Nearest-neighbor retrieval over the vector index, plus the
//! data-folder-vs-index diagnostics used to warn about unindexed files.

use anyhow::{bail, Result};
use sqlx::Row;
use std::collections::BTreeSet;
use std::path::Path;

use crate::embedding;
use crate::extract;
use crate::index::IndexHandle;
use crate::models::{Diagnostics, RetrievedChunk};

/// Fetch the `k` chunks nearest to `query`, in non-increasing score order,
/// together with diagnostics about files the index does not cover.
///
/// `k == 0` is a configuration error. A diagnostics failure never fails the
/// query — only the nearest-neighbor results are mandatory.
pub async fn retrieve(
    handle: &IndexHandle,
    data_dir: &Path,
    query: &str,
    k: usize,
) -> Result<(Vec<RetrievedChunk>, Diagnostics)> {
    if k == 0 {
        bail!("retrieval k must be >= 1");
    }

    let query_vec = handle.embed_query(query).await?;

    let rows = sqlx::query(
        r#"
        SELECT c.content, c.source, v.embedding
        FROM chunk_vectors v
        JOIN chunks c ON c.id = v.chunk_id
        "#,
    )
    .fetch_all(handle.pool())
    .await?;

    let mut scored: Vec<RetrievedChunk> = rows
        .iter()
        .map(|row| {
            let blob: Vec<u8> = row.get("embedding");
            let vector = embedding::blob_to_vec(&blob);
            RetrievedChunk {
                content: row.get("content"),
                source: row.get("source"),
                score: embedding::cosine_similarity(&query_vec, &vector),
            }
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.source.cmp(&b.source))
    });
    scored.truncate(k);

    let diagnostics = compute_diagnostics(handle, data_dir).await;

    Ok((scored, diagnostics))
}

/// Cross-reference the data folder against the index's source set.
///
/// `unindexed_files` are present on disk but absent from the index — the
/// usual cause is a scanned PDF with no extractable text. Read failures on
/// either side degrade to empty sets.
pub async fn compute_diagnostics(handle: &IndexHandle, data_dir: &Path) -> Diagnostics {
    let indexed_sources: Vec<String> =
        match sqlx::query_scalar::<_, String>("SELECT DISTINCT source FROM chunks")
            .fetch_all(handle.pool())
            .await
        {
            Ok(sources) => {
                let names: BTreeSet<String> = sources
                    .iter()
                    .filter_map(|s| {
                        Path::new(s)
                            .file_name()
                            .map(|n| n.to_string_lossy().to_string())
                    })
                    .collect();
                names.into_iter().collect()
            }
            Err(_) => Vec::new(),
        };

    let data_files = extract::list_files(data_dir);

    let unindexed_files = if data_files.is_empty() {
        Vec::new()
    } else {
        data_files
            .iter()
            .filter(|name| !indexed_sources.contains(*name))
            .cloned()
            .collect()
    };

    Diagnostics {
        data_files,
        indexed_sources,
        unindexed_files,
    }
}
