//! Server-side persistence for chunked uploads.
//!
//! The [`UploadStore`] trait is the seam between the HTTP receiver and the
//! storage backend. Chunk inserts are idempotent by construction: a second
//! insert for the same `(file_id, chunk_index)` reports [`ChunkPut::Duplicate`]
//! instead of failing, which is what makes client retries and resumption
//! safe. Finalization concatenates chunks in ascending index order, refuses
//! gaps loudly, and is a no-op when called again.

mod fs;
mod memory;
mod meta;
mod store;

pub use fs::FsUploadStore;
pub use memory::MemoryUploadStore;
pub use meta::{NewUpload, UploadMeta};
pub use store::{ChunkPut, Finalized, UploadStore};

/// Errors produced by storage backends.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("metadata serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown upload: {0}")]
    UnknownUpload(String),

    #[error("upload {file_id} is missing chunks {missing:?}")]
    MissingChunks { file_id: String, missing: Vec<u32> },

    #[error("chunk index {index} out of range for upload {file_id} ({total_chunks} chunks)")]
    IndexOutOfRange {
        file_id: String,
        index: u32,
        total_chunks: u32,
    },
}
