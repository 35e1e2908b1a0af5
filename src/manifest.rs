//! mtime manifest for cheap staleness detection.
//!
//! A manifest maps every regular file under the data folder to its last
//! modification time in integer seconds. Exact equality between a fresh
//! snapshot and the persisted manifest is the sole staleness signal:
//! content is never hashed, so a touch with unchanged content triggers a
//! rebuild, and an edit that preserves the timestamp does not. Known
//! limitation, kept on purpose.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::UNIX_EPOCH;
use walkdir::WalkDir;

/// Path → mtime seconds, one entry per file under the data folder.
pub type Manifest = BTreeMap<String, i64>;

pub const MANIFEST_FILE: &str = "manifest.json";

/// Compute the manifest of every regular file under `root`.
/// Unreadable entries are skipped rather than failing the snapshot.
pub fn snapshot(root: &Path) -> Manifest {
    let mut manifest = Manifest::new();
    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let mtime = entry
            .metadata()
            .ok()
            .and_then(|md| md.modified().ok())
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        manifest.insert(entry.path().display().to_string(), mtime);
    }
    manifest
}

/// Read the persisted manifest from `index_dir`.
/// Missing, unreadable, or corrupt files read as empty, forcing a rebuild.
pub fn read(index_dir: &Path) -> Manifest {
    match std::fs::read_to_string(index_dir.join(MANIFEST_FILE)) {
        Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
        Err(_) => Manifest::default(),
    }
}

/// Persist the manifest atomically (temp file + rename) next to the index.
pub fn write(index_dir: &Path, manifest: &Manifest) -> Result<()> {
    std::fs::create_dir_all(index_dir)
        .with_context(|| format!("Failed to create index dir {}", index_dir.display()))?;
    let tmp = index_dir.join(format!("{MANIFEST_FILE}.tmp"));
    std::fs::write(&tmp, serde_json::to_vec(manifest)?)
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, index_dir.join(MANIFEST_FILE))?;
    Ok(())
}

/// True whenever the files under `root` differ from what the persisted
/// manifest recorded. Never errors.
pub fn needs_rebuild(root: &Path, index_dir: &Path) -> bool {
    read(index_dir) != snapshot(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn fresh_snapshot_matches_persisted() {
        let data = tempfile::tempdir().unwrap();
        let index = tempfile::tempdir().unwrap();
        fs::write(data.path().join("a.txt"), "alpha").unwrap();

        write(index.path(), &snapshot(data.path())).unwrap();
        assert!(!needs_rebuild(data.path(), index.path()));
    }

    #[test]
    fn missing_manifest_forces_rebuild() {
        let data = tempfile::tempdir().unwrap();
        let index = tempfile::tempdir().unwrap();
        fs::write(data.path().join("a.txt"), "alpha").unwrap();

        assert!(needs_rebuild(data.path(), index.path()));
    }

    #[test]
    fn corrupt_manifest_reads_as_empty() {
        let index = tempfile::tempdir().unwrap();
        fs::write(index.path().join(MANIFEST_FILE), "{not json").unwrap();
        assert!(read(index.path()).is_empty());
    }

    #[test]
    fn added_file_forces_rebuild() {
        let data = tempfile::tempdir().unwrap();
        let index = tempfile::tempdir().unwrap();
        fs::write(data.path().join("a.txt"), "alpha").unwrap();
        write(index.path(), &snapshot(data.path())).unwrap();

        fs::write(data.path().join("b.txt"), "beta").unwrap();
        assert!(needs_rebuild(data.path(), index.path()));
    }

    #[test]
    fn removed_file_forces_rebuild() {
        let data = tempfile::tempdir().unwrap();
        let index = tempfile::tempdir().unwrap();
        fs::write(data.path().join("a.txt"), "alpha").unwrap();
        fs::write(data.path().join("b.txt"), "beta").unwrap();
        write(index.path(), &snapshot(data.path())).unwrap();

        fs::remove_file(data.path().join("b.txt")).unwrap();
        assert!(needs_rebuild(data.path(), index.path()));
    }

    #[test]
    fn mtime_change_forces_rebuild() {
        let data = tempfile::tempdir().unwrap();
        let index = tempfile::tempdir().unwrap();
        let file = data.path().join("a.txt");
        fs::write(&file, "alpha").unwrap();
        write(index.path(), &snapshot(data.path())).unwrap();

        // mtime has one-second resolution in the manifest.
        std::thread::sleep(std::time::Duration::from_millis(1100));
        fs::write(&file, "alpha").unwrap();
        assert!(needs_rebuild(data.path(), index.path()));
    }
}
