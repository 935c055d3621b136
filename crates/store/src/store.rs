use async_trait::async_trait;

use crate::{NewUpload, StoreError, UploadMeta};

/// Result of inserting one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkPut {
    /// First time this `(file_id, index)` pair was seen.
    Stored,
    /// The pair already existed; nothing was written.
    Duplicate,
}

/// Result of finalization.
#[derive(Debug, Clone, PartialEq)]
pub struct Finalized {
    /// Retrieval path for the assembled artifact.
    pub path: String,
    /// Hex SHA-256 of the artifact bytes.
    pub sha256: String,
}

/// Storage backend for chunked uploads.
///
/// The single hard requirement is the unique-key behavior of
/// [`put_chunk`](Self::put_chunk): at most one record per
/// `(file_id, index)`, with a duplicate insert reported as
/// [`ChunkPut::Duplicate`] rather than an error. Everything else (arrival
/// order, retried sends, interleaved duplicates) follows from that.
#[async_trait]
pub trait UploadStore: Send + Sync {
    /// Allocates a fresh `file_id` and persists initial metadata.
    async fn create(&self, declared: &NewUpload) -> Result<UploadMeta, StoreError>;

    /// Loads metadata, or `None` if the id is unknown.
    async fn meta(&self, file_id: &str) -> Result<Option<UploadMeta>, StoreError>;

    /// Loads metadata, reconstructing it from orphaned chunk records if the
    /// metadata itself was lost (crash between chunk write and meta write).
    /// Returns `None` when the backend has no trace of the id at all.
    async fn recover(
        &self,
        file_id: &str,
        declared: &NewUpload,
    ) -> Result<Option<UploadMeta>, StoreError>;

    /// Persists one chunk under `(file_id, index)`.
    ///
    /// An id the backend has no trace of (no metadata, no chunk records)
    /// fails with [`StoreError::UnknownUpload`]; callers resolve or create
    /// the upload first.
    async fn put_chunk(
        &self,
        file_id: &str,
        index: u32,
        data: &[u8],
    ) -> Result<ChunkPut, StoreError>;

    /// Indices currently persisted for `file_id`, ascending. Unknown ids
    /// yield an empty list, not an error, so the resume query stays
    /// side-effect-free.
    async fn received_indices(&self, file_id: &str) -> Result<Vec<u32>, StoreError>;

    /// Concatenates all chunks in index order into the final artifact.
    ///
    /// Fails with [`StoreError::MissingChunks`] if any index in
    /// `[0, total_chunks)` is absent; never produces a truncated artifact.
    /// Idempotent: a second call returns the already-recorded path.
    async fn finalize(&self, file_id: &str) -> Result<Finalized, StoreError>;

    /// Returns the finalized artifact, or `None` before finalization or for
    /// an unknown id.
    async fn artifact(&self, file_id: &str) -> Result<Option<(UploadMeta, Vec<u8>)>, StoreError>;
}
