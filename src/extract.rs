//! Content extraction: turns the files under the data folder into
//! normalized [`Document`]s.
//!
//! Text formats are read as UTF-8 with a Latin-1 fallback so a stray legacy
//! file never fails the pass. PDFs are extracted page by page; a PDF whose
//! extracted text is shorter than [`MIN_PDF_TEXT_CHARS`] is treated as
//! having no usable text (scanned/image PDFs) and excluded from the
//! document set, which lets retrieval report it as present-but-unindexed.

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::models::Document;

/// Minimum extracted text length for a PDF to be considered readable.
pub const MIN_PDF_TEXT_CHARS: usize = 100;

const TEXT_EXTENSIONS: &[&str] = &["txt", "md", "html"];

/// Produce a [`Document`] for every supported file under `root`, recursively,
/// sorted by path.
///
/// A single file's extraction failure becomes placeholder content rather
/// than aborting the pass; only a missing root is an error.
pub fn load_documents(root: &Path) -> Result<Vec<Document>> {
    if !root.is_dir() {
        bail!("data directory does not exist: {}", root.display());
    }

    let mut docs = Vec::new();
    for path in walk_files(root) {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        let content = if TEXT_EXTENSIONS.contains(&ext.as_str()) {
            read_text_lossy(&path)
        } else if ext == "pdf" {
            match extract_pdf(&path) {
                Some(text) => text,
                None => continue, // no usable text; stays out of the index
            }
        } else {
            continue;
        };

        docs.push(Document {
            source: path.display().to_string(),
            content,
        });
    }

    Ok(docs)
}

/// File names (not paths) of every regular file under `root`, sorted.
/// Enumeration failures degrade to an empty list.
pub fn list_files(root: &Path) -> Vec<String> {
    let mut names: Vec<String> = walk_files(root)
        .into_iter()
        .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
        .collect();
    names.sort();
    names
}

fn walk_files(root: &Path) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect();
    paths.sort();
    paths
}

/// Read a text file as UTF-8, falling back to Latin-1 on decode failure.
/// I/O failure becomes placeholder content.
fn read_text_lossy(path: &Path) -> String {
    match std::fs::read(path) {
        Ok(bytes) => match String::from_utf8(bytes) {
            Ok(text) => text,
            // Latin-1: every byte maps directly to the same code point.
            Err(err) => err.into_bytes().iter().map(|&b| b as char).collect(),
        },
        Err(err) => format!("[failed to read {}: {}]", path.display(), err),
    }
}

/// Extract PDF text page by page, pages joined with a blank line.
///
/// Returns `None` when extraction succeeds but yields less than
/// [`MIN_PDF_TEXT_CHARS`] characters; returns placeholder content when
/// extraction itself fails, so the file still shows up downstream.
fn extract_pdf(path: &Path) -> Option<String> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) => return Some(format!("[failed to read {}: {}]", path.display(), err)),
    };

    match pdf_extract::extract_text_from_mem_by_pages(&bytes) {
        Ok(pages) => {
            let text = pages.join("\n\n");
            if accept_pdf_text(&text) {
                Some(text)
            } else {
                tracing::info!(
                    "skipping {}: insufficient extractable text ({} chars)",
                    path.display(),
                    text.trim().chars().count()
                );
                None
            }
        }
        Err(err) => Some(format!(
            "[failed to extract PDF {}: {}]",
            path.display(),
            err
        )),
    }
}

fn accept_pdf_text(text: &str) -> bool {
    text.trim().chars().count() >= MIN_PDF_TEXT_CHARS
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn missing_root_is_an_error() {
        let err = load_documents(Path::new("/no/such/folder")).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn loads_text_files_sorted_by_path() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("b.txt"), "beta").unwrap();
        fs::write(tmp.path().join("a.md"), "alpha").unwrap();
        fs::create_dir(tmp.path().join("sub")).unwrap();
        fs::write(tmp.path().join("sub/c.html"), "<p>gamma</p>").unwrap();

        let docs = load_documents(tmp.path()).unwrap();
        assert_eq!(docs.len(), 3);
        assert!(docs[0].source.ends_with("a.md"));
        assert!(docs[1].source.ends_with("b.txt"));
        assert!(docs[2].source.ends_with("c.html"));
        assert_eq!(docs[0].content, "alpha");
    }

    #[test]
    fn unsupported_extensions_are_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("notes.txt"), "kept").unwrap();
        fs::write(tmp.path().join("photo.png"), [0u8, 1, 2, 3]).unwrap();

        let docs = load_documents(tmp.path()).unwrap();
        assert_eq!(docs.len(), 1);
        assert!(docs[0].source.ends_with("notes.txt"));
    }

    #[test]
    fn invalid_utf8_falls_back_to_latin1() {
        let tmp = tempfile::tempdir().unwrap();
        // 0xE9 is 'é' in Latin-1 but not valid standalone UTF-8.
        fs::write(tmp.path().join("legacy.txt"), [b'c', b'a', b'f', 0xE9]).unwrap();

        let docs = load_documents(tmp.path()).unwrap();
        assert_eq!(docs[0].content, "café");
    }

    #[test]
    fn broken_pdf_becomes_placeholder_not_error() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("bad.pdf"), b"not a pdf at all").unwrap();

        let docs = load_documents(tmp.path()).unwrap();
        assert_eq!(docs.len(), 1);
        assert!(docs[0].content.starts_with("[failed to extract PDF"));
    }

    #[test]
    fn short_pdf_text_is_rejected() {
        assert!(!accept_pdf_text("just a header"));
        assert!(!accept_pdf_text("   \n\n  "));
        assert!(accept_pdf_text(&"long enough text. ".repeat(20)));
    }

    #[test]
    fn list_files_enumerates_everything() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("a.txt"), "a").unwrap();
        fs::write(tmp.path().join("scan.pdf"), "x").unwrap();
        fs::write(tmp.path().join("photo.png"), "x").unwrap();

        let names = list_files(tmp.path());
        assert_eq!(names, vec!["a.txt", "photo.png", "scan.pdf"]);
        assert!(list_files(Path::new("/no/such/folder")).is_empty());
    }
}
