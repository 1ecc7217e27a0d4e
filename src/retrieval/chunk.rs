//! Recursive text chunking.
//!
//! Splits document text into overlapping chunks using a delimiter
//! cascade (paragraph → line → sentence → word), falling back to a hard
//! grapheme split for pathological inputs. Chunk boundaries are measured
//! in characters.

use unicode_segmentation::UnicodeSegmentation;

/// Target chunk length in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 800;
/// Overlap carried from the tail of one chunk into the next.
pub const DEFAULT_CHUNK_OVERLAP: usize = 100;

/// Delimiter cascade, coarsest first.
const SEPARATORS: &[&str] = &["\n\n", "\n", ". ", " "];

/// Splits `text` into chunks of roughly `chunk_size` characters with
/// `overlap` characters carried between consecutive chunks. A chunk may
/// exceed the target by up to the overlap it was seeded with.
///
/// Whitespace-only fragments are dropped. An empty input produces no
/// chunks.
#[must_use]
pub fn split_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let overlap = overlap.min(chunk_size / 2);

    let atoms = atomize(text, 0, chunk_size);
    merge_atoms(&atoms, chunk_size, overlap)
}

/// Splits with the default size and overlap.
#[must_use]
pub fn split_default(text: &str) -> Vec<String> {
    split_text(text, DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_OVERLAP)
}

/// Recursively breaks `text` into fragments no longer than `chunk_size`.
fn atomize(text: &str, sep_idx: usize, chunk_size: usize) -> Vec<String> {
    if text.chars().count() <= chunk_size {
        return if text.trim().is_empty() {
            Vec::new()
        } else {
            vec![text.to_string()]
        };
    }

    let Some(sep) = SEPARATORS.get(sep_idx) else {
        return hard_split(text, chunk_size);
    };

    let mut atoms = Vec::new();
    for piece in split_keeping_separator(text, sep) {
        if piece.chars().count() <= chunk_size {
            if !piece.trim().is_empty() {
                atoms.push(piece);
            }
        } else {
            atoms.extend(atomize(&piece, sep_idx + 1, chunk_size));
        }
    }
    atoms
}

/// Splits on `sep`, keeping the separator attached to the preceding piece
/// so no characters are lost.
fn split_keeping_separator(text: &str, sep: &str) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut rest = text;
    while let Some(pos) = rest.find(sep) {
        let end = pos + sep.len();
        pieces.push(rest[..end].to_string());
        rest = &rest[end..];
    }
    if !rest.is_empty() {
        pieces.push(rest.to_string());
    }
    pieces
}

/// Last-resort split at grapheme boundaries.
fn hard_split(text: &str, chunk_size: usize) -> Vec<String> {
    let graphemes: Vec<&str> = text.graphemes(true).collect();
    graphemes
        .chunks(chunk_size)
        .map(|window| window.concat())
        .filter(|piece| !piece.trim().is_empty())
        .collect()
}

/// Greedily packs fragments into chunks, seeding each new chunk with the
/// overlap tail of the previous one.
fn merge_atoms(atoms: &[String], chunk_size: usize, overlap: usize) -> Vec<String> {
    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for atom in atoms {
        let atom_len = atom.chars().count();
        if current_len > 0 && current_len + atom_len > chunk_size {
            let finished = std::mem::take(&mut current);
            let tail = overlap_tail(&finished, overlap);
            current_len = tail.chars().count();
            current = tail;
            chunks.push(finished);
        }
        current.push_str(atom);
        current_len += atom_len;
    }

    if !current.trim().is_empty() {
        chunks.push(current);
    }
    chunks
}

/// The last `overlap` characters of `chunk`, on a char boundary.
fn overlap_tail(chunk: &str, overlap: usize) -> String {
    if overlap == 0 {
        return String::new();
    }
    let chars: Vec<char> = chunk.chars().collect();
    let start = chars.len().saturating_sub(overlap);
    chars[start..].iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input_produces_no_chunks() {
        assert!(split_default("").is_empty());
        assert!(split_default("   \n\n  ").is_empty());
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = split_default("A short paragraph.");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], "A short paragraph.");
    }

    #[test]
    fn test_chunks_respect_size_bound() {
        let text = "word ".repeat(1000);
        let chunks = split_text(&text, 100, 20);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 120, "chunk too long: {}", chunk.len());
        }
    }

    #[test]
    fn test_paragraph_boundaries_preferred() {
        let text = format!("{}\n\n{}", "a".repeat(60), "b".repeat(60));
        let chunks = split_text(&text, 80, 10);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].starts_with('a'));
        assert!(chunks[1].ends_with('b'));
    }

    #[test]
    fn test_overlap_carries_tail() {
        let text = format!("{}. {}. {}.", "x".repeat(50), "y".repeat(50), "z".repeat(50));
        let chunks = split_text(&text, 60, 20);
        assert!(chunks.len() >= 2);
        // Each chunk after the first begins with the tail of its predecessor.
        for pair in chunks.windows(2) {
            let tail: String = overlap_tail(&pair[0], 20);
            assert!(pair[1].starts_with(&tail));
        }
    }

    #[test]
    fn test_hard_split_handles_unbroken_text() {
        let text = "q".repeat(500);
        let chunks = split_text(&text, 100, 0);
        assert_eq!(chunks.len(), 5);
        let total: usize = chunks.iter().map(|c| c.chars().count()).sum();
        assert_eq!(total, 500);
    }

    #[test]
    fn test_no_content_lost_without_overlap() {
        let text = "The quick brown fox. Jumps over the lazy dog. Again and again.";
        let chunks = split_text(text, 30, 0);
        let rejoined: String = chunks.concat();
        assert_eq!(rejoined, text);
    }
}
