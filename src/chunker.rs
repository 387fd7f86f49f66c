//! Fixed-size, overlapping character windows over loaded segments.

use std::path::PathBuf;

use crate::config::ChunkingControls;
use crate::loader::Segment;

/// A window of segment text submitted to the embedding model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Document the chunk was cut from.
    pub source: PathBuf,
    /// Page of the source segment.
    pub page: u32,
    /// Position of the chunk inside its page.
    pub chunk_id: usize,
    /// Window text.
    pub text: String,
    /// Character offset (inclusive) inside the segment.
    pub char_start: usize,
    /// Character offset (exclusive) inside the segment.
    pub char_end: usize,
}

/// Splits text into windows of `chunk_size` characters advancing by `chunk_size - chunk_overlap`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Chunker {
    controls: ChunkingControls,
}

impl Chunker {
    /// Creates a chunker with the given window controls.
    pub fn new(controls: ChunkingControls) -> Self {
        Self { controls }
    }

    /// Window controls in use.
    pub fn controls(&self) -> ChunkingControls {
        self.controls
    }

    /// Character ranges of every window over `text`.
    ///
    /// Offsets count Unicode scalar values, not bytes. Whitespace-only input yields no windows;
    /// anything shorter than one window yields exactly one.
    pub fn windows(&self, text: &str) -> Vec<(usize, usize)> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        let total = text.chars().count();
        let size = self.controls.chunk_size();
        let step = self.controls.step();
        let mut ranges = Vec::with_capacity(total / step + 1);
        let mut start = 0usize;
        loop {
            let end = (start + size).min(total);
            ranges.push((start, end));
            if end == total {
                break;
            }
            start += step;
        }
        ranges
    }

    /// Splits a raw string into window texts.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        let offsets = char_byte_offsets(text);
        self.windows(text)
            .into_iter()
            .map(|(start, end)| text[offsets[start]..offsets[end]].to_string())
            .collect()
    }

    /// Splits every segment in order, preserving document order across pages.
    pub fn split_segments(&self, segments: &[Segment]) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        for segment in segments {
            let offsets = char_byte_offsets(&segment.text);
            for (chunk_id, (start, end)) in self.windows(&segment.text).into_iter().enumerate() {
                chunks.push(Chunk {
                    source: segment.source.clone(),
                    page: segment.page,
                    chunk_id,
                    text: segment.text[offsets[start]..offsets[end]].to_string(),
                    char_start: start,
                    char_end: end,
                });
            }
        }
        chunks
    }
}

// Byte offset of every char boundary, including the end of the string.
fn char_byte_offsets(text: &str) -> Vec<usize> {
    text.char_indices()
        .map(|(idx, _)| idx)
        .chain(std::iter::once(text.len()))
        .collect()
}
