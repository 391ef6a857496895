//! Frame chunking for bounded-memory inference over long recordings.

use crate::error::{ConfigError, Result};
use std::ops::Range;

/// Default chunk size in frames (about 3.9 minutes at 22.05kHz / 512 hop)
const DEFAULT_CHUNK_FRAMES: usize = 10_000;

/// Configuration for frame chunking.
///
/// Only one chunk of context windows is materialized at a time, so peak
/// memory scales with `frames * window * feature_width` instead of the full
/// recording length.
#[derive(clap::Args, Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkConfig {
    /// Frames per inference chunk
    #[arg(long = "chunk-frames", default_value_t = DEFAULT_CHUNK_FRAMES)]
    pub frames: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            frames: DEFAULT_CHUNK_FRAMES,
        }
    }
}

impl ChunkConfig {
    /// Create a new chunk configuration.
    pub fn new(frames: usize) -> Self {
        Self { frames }
    }

    pub fn validate(&self) -> Result<()> {
        if self.frames == 0 {
            return Err(ConfigError::InvalidChunkSize(self.frames).into());
        }
        Ok(())
    }

    /// Create an iterator over consecutive, non-overlapping frame ranges.
    pub fn iter_ranges(&self, len: usize) -> ChunkRangeIter {
        ChunkRangeIter {
            len,
            chunk_size: self.frames.max(1),
            position: 0,
        }
    }

    /// Number of chunks `iter_ranges(len)` yields.
    pub fn chunk_count(&self, len: usize) -> usize {
        len.div_ceil(self.frames.max(1))
    }
}

/// Iterator over chunk frame ranges.
pub struct ChunkRangeIter {
    len: usize,
    chunk_size: usize,
    position: usize,
}

impl Iterator for ChunkRangeIter {
    type Item = Range<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.len {
            return None;
        }

        let start = self.position;
        let end = (start + self.chunk_size).min(self.len);
        self.position = end;

        Some(start..end)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.len - self.position.min(self.len)).div_ceil(self.chunk_size);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for ChunkRangeIter {}
