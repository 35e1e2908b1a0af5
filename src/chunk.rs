//! Overlapping-window text splitter.
//!
//! Splits document content into windows of at most `window_size` characters,
//! preferring to break at a paragraph boundary (`\n\n`), then a line, then a
//! word, before falling back to a hard character cut. Each chunk after the
//! first repeats the previous chunk's tail (`overlap` characters) so a
//! semantic unit spanning a boundary is not lost by either side.
//!
//! Splitting is pure and deterministic; callers must guarantee
//! `overlap < window_size` (validated at config load).

use crate::models::{Chunk, Document};

/// Split every document into overlapping chunks, preserving provenance.
pub fn split_documents(docs: &[Document], window_size: usize, overlap: usize) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    for doc in docs {
        for (i, piece) in split_text(&doc.content, window_size, overlap)
            .into_iter()
            .enumerate()
        {
            chunks.push(Chunk {
                source: doc.source.clone(),
                chunk_index: i as i64,
                content: piece,
            });
        }
    }
    chunks
}

/// Split one text into overlapping windows. A text no longer than
/// `window_size` yields exactly one chunk.
pub fn split_text(text: &str, window_size: usize, overlap: usize) -> Vec<String> {
    debug_assert!(window_size > 0 && overlap < window_size);

    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= window_size {
        return vec![text.to_string()];
    }

    let mut pieces = Vec::new();
    let mut start = 0usize;
    loop {
        let end = start + window_size;
        if end >= chars.len() {
            pieces.push(chars[start..].iter().collect());
            break;
        }

        let cut = snap_boundary(&chars, start, end);
        pieces.push(chars[start..cut].iter().collect());

        // Back up by `overlap`, but always make forward progress.
        let mut next = cut.saturating_sub(overlap);
        if next <= start {
            next = cut;
        }
        start = next;
    }
    pieces
}

/// Find the cut position in `(start, end]`: after the last paragraph break
/// in the window, else after the last newline, else after the last space,
/// else the window edge itself.
fn snap_boundary(chars: &[char], start: usize, end: usize) -> usize {
    for i in (start + 1..end).rev() {
        if chars[i] == '\n' && chars[i - 1] == '\n' {
            return i + 1;
        }
    }
    for i in (start..end).rev() {
        if chars[i] == '\n' {
            return i + 1;
        }
    }
    for i in (start..end).rev() {
        if chars[i] == ' ' {
            return i + 1;
        }
    }
    end
}
