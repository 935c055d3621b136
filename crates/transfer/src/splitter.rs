use std::io::SeekFrom;
use std::path::Path;

use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// One byte range of the source file, sent as one transport unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    pub index: u32,
    pub offset: u64,
    pub len: u64,
}

/// Errors from chunk planning.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SplitError {
    #[error("chunk size must be at least 1 byte")]
    ZeroChunkSize,

    #[error("cannot upload an empty file")]
    EmptyFile,

    #[error("computed a zero-length chunk at index {0}")]
    ZeroLengthChunk(u32),
}

/// Deterministic split of a file into fixed-size byte ranges.
///
/// Pure arithmetic, no I/O: `total_chunks = ceil(file_size / chunk_size)`,
/// every span except possibly the last has exactly `chunk_size` bytes, and
/// the last is clipped at the file length. A zero-length span would indicate
/// a tail miscalculation and is rejected outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    file_size: u64,
    chunk_size: u64,
    total_chunks: u32,
}

impl ChunkPlan {
    pub fn new(file_size: u64, chunk_size: u64) -> Result<Self, SplitError> {
        if chunk_size == 0 {
            return Err(SplitError::ZeroChunkSize);
        }
        if file_size == 0 {
            return Err(SplitError::EmptyFile);
        }
        let total_chunks = file_size.div_ceil(chunk_size) as u32;
        let plan = Self {
            file_size,
            chunk_size,
            total_chunks,
        };
        for span in plan.spans() {
            if span.len == 0 {
                return Err(SplitError::ZeroLengthChunk(span.index));
            }
        }
        Ok(plan)
    }

    pub fn total_chunks(&self) -> u32 {
        self.total_chunks
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// The span for one index, or `None` past the end.
    pub fn span(&self, index: u32) -> Option<ChunkSpan> {
        if index >= self.total_chunks {
            return None;
        }
        let offset = u64::from(index) * self.chunk_size;
        let len = self.chunk_size.min(self.file_size - offset);
        Some(ChunkSpan { index, offset, len })
    }

    /// All spans in ascending index order.
    pub fn spans(&self) -> impl Iterator<Item = ChunkSpan> + '_ {
        (0..self.total_chunks).filter_map(|i| self.span(i))
    }
}

/// Reads the bytes of individual plan spans from an open file.
pub struct ChunkReader {
    file: tokio::fs::File,
}

impl ChunkReader {
    pub async fn open(path: &Path) -> std::io::Result<Self> {
        Ok(Self {
            file: tokio::fs::File::open(path).await?,
        })
    }

    /// Reads exactly `span.len` bytes at `span.offset`.
    ///
    /// Seeks on every read so spans can be fetched in any order (a resumed
    /// upload skips over already-stored indices).
    pub async fn read_span(&mut self, span: ChunkSpan) -> std::io::Result<Vec<u8>> {
        self.file.seek(SeekFrom::Start(span.offset)).await?;
        let mut buf = vec![0u8; span.len as usize];
        self.file.read_exact(&mut buf).await?;
        Ok(buf)
    }
}
