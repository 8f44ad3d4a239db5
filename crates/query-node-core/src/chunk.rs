//! Paragraph-boundary text chunker.
//!
//! Splits decrypted text into [`Fragment`]s that respect a configurable
//! `max_tokens` limit. Splitting occurs on paragraph boundaries (`\n\n`)
//! so that each fragment stays semantically coherent.
//!
//! # Algorithm
//!
//! 1. Convert `max_tokens` to `max_chars` using a 4 chars/token ratio.
//! 2. Split text on `\n\n` paragraph boundaries.
//! 3. Accumulate paragraphs into a buffer until adding the next paragraph
//!    would exceed `max_chars`, then flush the buffer as a fragment.
//! 4. If a single paragraph exceeds `max_chars`, hard-split it at the
//!    nearest newline or space boundary.
//! 5. Guarantee at least one fragment (even for empty text).
//!
//! # Example
//!
//! ```rust
//! use query_node_core::chunk::{Chunker, ParagraphChunker};
//!
//! let fragments = ParagraphChunker::new(200).chunk("Hello world.\n\nSecond paragraph.");
//! assert_eq!(fragments.len(), 1);
//! assert_eq!(fragments[0].index, 0);
//! ```

use sha2::{Digest, Sha256};

use crate::models::Fragment;

/// Approximate characters-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Splits text into ordered fragments suitable for indexing.
///
/// Implementations must be deterministic and must return at least one
/// fragment; the resolver relies on a populated collection never being empty.
pub trait Chunker: Send + Sync {
    fn chunk(&self, text: &str) -> Vec<Fragment>;
}

/// The default [`Chunker`]: paragraph packing with hard splits for
/// oversized paragraphs.
#[derive(Debug, Clone, Copy)]
pub struct ParagraphChunker {
    max_tokens: usize,
}

impl ParagraphChunker {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            max_tokens: max_tokens.max(1),
        }
    }
}

impl Chunker for ParagraphChunker {
    fn chunk(&self, text: &str) -> Vec<Fragment> {
        chunk_text(text, self.max_tokens)
    }
}

/// Split text into fragments on paragraph boundaries, respecting `max_tokens`.
///
/// # Guarantees
///
/// - At least one fragment is always returned.
/// - Fragment indices are contiguous: `0, 1, 2, …, N-1`.
/// - Oversized paragraphs are hard-split at space/newline boundaries and
///   never inside a multi-byte character.
pub fn chunk_text(text: &str, max_tokens: usize) -> Vec<Fragment> {
    let max_chars = max_tokens.max(1) * CHARS_PER_TOKEN;

    let mut fragments = Vec::new();
    let mut current_buf = String::new();

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        let would_be = if current_buf.is_empty() {
            trimmed.len()
        } else {
            current_buf.len() + 2 + trimmed.len()
        };

        if would_be > max_chars && !current_buf.is_empty() {
            push_fragment(&mut fragments, &current_buf);
            current_buf.clear();
        }

        if trimmed.len() > max_chars {
            hard_split(&mut fragments, trimmed, max_chars);
        } else {
            if !current_buf.is_empty() {
                current_buf.push_str("\n\n");
            }
            current_buf.push_str(trimmed);
        }
    }

    if !current_buf.is_empty() {
        push_fragment(&mut fragments, &current_buf);
    }

    if fragments.is_empty() {
        push_fragment(&mut fragments, text.trim());
    }

    fragments
}

/// Cut an oversized paragraph into pieces of at most `max_chars` bytes,
/// preferring to break after a newline or space.
fn hard_split(fragments: &mut Vec<Fragment>, paragraph: &str, max_chars: usize) {
    let mut remaining = paragraph;
    while !remaining.is_empty() {
        let limit = snap_to_char_boundary(remaining, remaining.len().min(max_chars));
        let split_at = if limit < remaining.len() {
            remaining[..limit]
                .rfind('\n')
                .or_else(|| remaining[..limit].rfind(' '))
                .map(|pos| pos + 1)
                .unwrap_or(limit)
        } else {
            limit
        };
        // A single character wider than max_chars still has to make progress.
        let split_at = if split_at == 0 {
            remaining
                .char_indices()
                .nth(1)
                .map(|(i, _)| i)
                .unwrap_or(remaining.len())
        } else {
            split_at
        };
        let piece = remaining[..split_at].trim();
        if !piece.is_empty() {
            push_fragment(fragments, piece);
        }
        remaining = &remaining[split_at..];
    }
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn push_fragment(fragments: &mut Vec<Fragment>, text: &str) {
    let index = fragments.len();
    fragments.push(make_fragment(index, text));
}

/// Create a single [`Fragment`] with a SHA-256 content hash.
pub fn make_fragment(index: usize, text: &str) -> Fragment {
    Fragment {
        index,
        text: text.to_string(),
        hash: sha256_hex(text.as_bytes()),
    }
}

/// Lowercase hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
