//! Overlapping character-window chunker.
//!
//! Splits extracted document text into fragments of roughly
//! `target_chars` characters with `overlap_chars` shared between
//! consecutive fragments. Each window prefers to end on a paragraph
//! break (`\n\n`), then a sentence break (`. `), then a hard cut at the
//! window edge.
//!
//! Whitespace-only windows are dropped and do not consume an ordinal;
//! ordinals are assigned after the filter so they stay contiguous from 0.
//! Kept fragments are not trimmed, so re-joining ordered fragments
//! (dropping each successor's leading overlap) reconstructs the input.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::Fragment;

/// Chunking parameters, counted in Unicode scalar values.
#[derive(Debug, Clone)]
pub struct ChunkParams {
    pub target_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            target_chars: 1000,
            overlap_chars: 200,
        }
    }
}

/// Split `text` into overlapping chunk strings. Deterministic for a
/// fixed input and parameter set.
pub fn chunk_text(text: &str, params: &ChunkParams) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let target = params.target_chars.max(1);
    let overlap = params.overlap_chars.min(target - 1);

    let mut pieces = Vec::new();
    let mut start = 0usize;

    while start < chars.len() {
        let cap = (start + target).min(chars.len());
        let end = if cap == chars.len() {
            cap
        } else {
            split_point(&chars, start, cap, overlap)
        };

        let piece: String = chars[start..end].iter().collect();
        if !piece.trim().is_empty() {
            pieces.push(piece);
        }

        if end == chars.len() {
            break;
        }
        start = end - overlap;
    }

    pieces
}

/// Chunk `text` and wrap each kept piece as a [`Fragment`] with a fresh
/// id, a post-filter ordinal, and a content hash.
pub fn fragments_from_text(document_id: Uuid, text: &str, params: &ChunkParams) -> Vec<Fragment> {
    chunk_text(text, params)
        .into_iter()
        .enumerate()
        .map(|(i, piece)| make_fragment(document_id, i as i64, piece))
        .collect()
}

/// End of the current window: the last paragraph break inside it, else
/// the last sentence break, else the window edge. A boundary candidate
/// is only taken when the cursor still moves forward past the overlap.
fn split_point(chars: &[char], start: usize, cap: usize, overlap: usize) -> usize {
    let min_end = start + overlap + 1;
    for sep in [&['\n', '\n'][..], &['.', ' '][..]] {
        if let Some(end) = rfind_separator(chars, start, cap, sep) {
            if end >= min_end {
                return end;
            }
        }
    }
    cap
}

/// Last occurrence of `sep` fully inside `[start, cap)`, returning the
/// index just past the separator.
fn rfind_separator(chars: &[char], start: usize, cap: usize, sep: &[char]) -> Option<usize> {
    if cap - start < sep.len() {
        return None;
    }
    let mut i = cap - sep.len();
    loop {
        if chars[i..i + sep.len()] == *sep {
            return Some(i + sep.len());
        }
        if i == start {
            return None;
        }
        i -= 1;
    }
}

fn make_fragment(document_id: Uuid, ordinal: i64, text: String) -> Fragment {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Fragment {
        id: Uuid::new_v4(),
        document_id,
        ordinal,
        text,
        hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ChunkParams {
        ChunkParams::default()
    }

    /// 2500 chars of cycling content with no split boundaries.
    fn unbroken_text() -> String {
        (0..2500)
            .map(|i| char::from(b'a' + (i % 26) as u8))
            .collect()
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        let chunks = chunk_text("Hello, world!", &params());
        assert_eq!(chunks, vec!["Hello, world!".to_string()]);
    }

    #[test]
    fn empty_and_whitespace_inputs_yield_nothing() {
        assert!(chunk_text("", &params()).is_empty());
        assert!(chunk_text("   \n\n   ", &params()).is_empty());
    }

    #[test]
    fn unbroken_2500_chars_make_three_overlapping_chunks() {
        let text = unbroken_text();
        let chunks = chunk_text(&text, &params());
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].chars().count(), 1000);
        assert_eq!(chunks[1].chars().count(), 1000);
        assert_eq!(chunks[2].chars().count(), 900);

        // Consecutive chunks share exactly 200 characters.
        let tail: String = chunks[0].chars().skip(800).collect();
        let head: String = chunks[1].chars().take(200).collect();
        assert_eq!(tail, head);
    }

    #[test]
    fn ordinals_are_contiguous_from_zero() {
        let doc_id = Uuid::new_v4();
        let fragments = fragments_from_text(doc_id, &unbroken_text(), &params());
        assert_eq!(fragments.len(), 3);
        for (i, fragment) in fragments.iter().enumerate() {
            assert_eq!(fragment.ordinal, i as i64);
            assert_eq!(fragment.document_id, doc_id);
        }
    }

    #[test]
    fn paragraph_break_is_preferred_over_hard_cut() {
        let text = format!("{}\n\n{}", "a".repeat(500), "b".repeat(700));
        let chunks = chunk_text(&text, &params());
        assert!(chunks[0].ends_with("\n\n"));
        assert!(!chunks[0].contains('b'));
    }

    #[test]
    fn sentence_break_is_used_when_no_paragraph_break_exists() {
        let text = format!("{}. {}", "a".repeat(500), "b".repeat(700));
        let chunks = chunk_text(&text, &params());
        assert!(chunks[0].ends_with(". "));
        assert!(!chunks[0].contains('b'));
    }

    #[test]
    fn boundary_too_early_in_window_falls_through_to_hard_cut() {
        // The only paragraph break sits inside the overlap region, so
        // taking it would stall the cursor.
        let text = format!("{}\n\n{}", "a".repeat(100), "b".repeat(1500));
        let chunks = chunk_text(&text, &params());
        assert_eq!(chunks[0].chars().count(), 1000);
    }

    #[test]
    fn rejoining_with_overlap_trimmed_reconstructs_the_text() {
        let text = format!(
            "{}\n\nSecond paragraph about bail conditions. {}\n\nFinal notes.",
            "Opening statement. ".repeat(40),
            "More detail on the case. ".repeat(60),
        );
        let p = params();
        let chunks = chunk_text(&text, &p);
        assert!(chunks.len() > 1);

        let mut rebuilt: String = chunks[0].clone();
        for chunk in &chunks[1..] {
            rebuilt.extend(chunk.chars().skip(p.overlap_chars));
        }
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn chunking_is_deterministic() {
        let text = format!("{}\n\n{}", "alpha beta. ".repeat(120), "gamma delta. ".repeat(90));
        let a = chunk_text(&text, &params());
        let b = chunk_text(&text, &params());
        assert_eq!(a, b);
    }

    #[test]
    fn fragment_hash_depends_only_on_text() {
        let doc_id = Uuid::new_v4();
        let a = fragments_from_text(doc_id, "same text", &params());
        let b = fragments_from_text(doc_id, "same text", &params());
        assert_eq!(a[0].hash, b[0].hash);
        assert_ne!(a[0].id, b[0].id);
    }
}
