//! Boundary-aware text chunker with overlap.
//!
//! Splits document content into [`Segment`]s of at most `max_chars`
//! characters. Consecutive segments share exactly `overlap_chars`
//! characters so that context survives the cut, and every segment is a
//! contiguous substring of the input. Dropping each segment's leading
//! overlap and concatenating reconstructs the original content exactly
//! (see [`reassemble`]).
//!
//! Lengths are measured in Unicode scalar values, not bytes, so
//! multi-byte scripts (Vietnamese diacritics, box drawing) are never
//! split inside a character.
//!
//! # Algorithm
//!
//! 1. If the content fits in `max_chars`, return it as one segment.
//! 2. Otherwise take a window of `max_chars` starting at the cursor.
//! 3. Look backwards from the window end for a cut point, preferring a
//!    paragraph break (`\n\n`), then a sentence end, then any whitespace.
//!    The search never goes below `max(overlap + 1, max_chars / 2)` into
//!    the window, which guarantees forward progress.
//! 4. With no natural boundary in range, cut hard at the window end.
//! 5. Move the cursor to `cut - overlap_chars` and repeat.
//!
//! # Example
//!
//! ```rust
//! use rag_gateway_core::chunk::{reassemble, Chunker};
//!
//! let chunker = Chunker::new(40, 10).unwrap();
//! let text = "First paragraph here.\n\nSecond paragraph is a little longer.";
//! let segments = chunker.split(text);
//! assert!(segments.len() > 1);
//! assert_eq!(reassemble(&segments), text);
//! ```

use crate::error::{RagError, Result};

/// A contiguous piece of the original content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub text: String,
    /// Character offset of the segment start within the original content.
    pub start: usize,
    /// Number of leading characters shared with the previous segment.
    pub overlap: usize,
}

/// Deterministic splitter configured once at startup.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    max_chars: usize,
    overlap_chars: usize,
}

impl Chunker {
    /// Build a chunker, rejecting configurations that could not make progress.
    ///
    /// # Errors
    ///
    /// [`RagError::Configuration`] if `max_chars` is zero or
    /// `overlap_chars >= max_chars`.
    pub fn new(max_chars: usize, overlap_chars: usize) -> Result<Self> {
        if max_chars == 0 {
            return Err(RagError::Configuration(
                "chunking.max_chars must be > 0".to_string(),
            ));
        }
        if overlap_chars >= max_chars {
            return Err(RagError::Configuration(format!(
                "chunking.overlap_chars ({}) must be less than chunking.max_chars ({})",
                overlap_chars, max_chars
            )));
        }
        Ok(Self {
            max_chars,
            overlap_chars,
        })
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    pub fn overlap_chars(&self) -> usize {
        self.overlap_chars
    }

    /// Split `content` into ordered, non-empty segments.
    ///
    /// Empty content yields no segments; callers validate emptiness before
    /// chunking.
    pub fn split(&self, content: &str) -> Vec<Segment> {
        if content.is_empty() {
            return Vec::new();
        }

        let chars: Vec<char> = content.chars().collect();
        let n = chars.len();
        if n <= self.max_chars {
            return vec![Segment {
                text: content.to_string(),
                start: 0,
                overlap: 0,
            }];
        }

        // Byte offset of every char position, plus the end of the string.
        let offsets: Vec<usize> = content
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(content.len()))
            .collect();

        let min_advance = (self.overlap_chars + 1).max(self.max_chars / 2);
        let mut segments = Vec::new();
        let mut start = 0usize;

        loop {
            let window_end = (start + self.max_chars).min(n);
            let end = if window_end == n {
                n
            } else {
                find_cut(&chars, start + min_advance, window_end).unwrap_or(window_end)
            };

            let overlap = if segments.is_empty() {
                0
            } else {
                self.overlap_chars
            };
            segments.push(Segment {
                text: content[offsets[start]..offsets[end]].to_string(),
                start,
                overlap,
            });

            if end == n {
                break;
            }
            start = end - self.overlap_chars;
        }

        segments
    }
}

/// Rebuild the original content from segments produced by [`Chunker::split`].
pub fn reassemble(segments: &[Segment]) -> String {
    let mut out = String::new();
    for segment in segments {
        out.extend(segment.text.chars().skip(segment.overlap));
    }
    out
}

/// Find the best cut position in `[floor, ceil]`, scanning backwards.
///
/// A cut at `p` ends the segment after `chars[p - 1]`.
fn find_cut(chars: &[char], floor: usize, ceil: usize) -> Option<usize> {
    let floor = floor.max(1);
    if floor > ceil {
        return None;
    }

    let paragraph = |p: usize| p >= 2 && chars[p - 1] == '\n' && chars[p - 2] == '\n';
    let sentence = |p: usize| {
        chars[p - 1] == '\n'
            || (p >= 2 && chars[p - 1].is_whitespace() && is_sentence_end(chars[p - 2]))
    };
    let word = |p: usize| chars[p - 1].is_whitespace();

    let tiers: [&dyn Fn(usize) -> bool; 3] = [&paragraph, &sentence, &word];
    for tier in tiers {
        if let Some(p) = (floor..=ceil).rev().find(|&p| tier(p)) {
            return Some(p);
        }
    }
    None
}

fn is_sentence_end(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | ';' | '。' | '！' | '？')
}
