use crate::client::ApiError;
use crate::splitter::SplitError;

/// Fatal upload outcomes surfaced to the caller.
///
/// Either [`Uploader::upload`](crate::Uploader::upload) returns a retrieval
/// path or it returns one of these; there is no partial-success state.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("chunk {index} failed after {attempts} attempts ({succeeded}/{total} chunks uploaded): {source}")]
    ChunkFailed {
        index: u32,
        attempts: u32,
        succeeded: u32,
        total: u32,
        #[source]
        source: ApiError,
    },

    #[error(
        "chunk {index} exceeds the server's size limit; upload a smaller file or contact an administrator about the chunk-size configuration"
    )]
    ChunkTooLarge { index: u32 },

    /// The receiver contract guarantees a usable id on every reply; a blank
    /// one cannot be fixed by retrying.
    #[error("server reply for chunk {index} carried no upload id")]
    MissingFileId { index: u32 },

    #[error("finalize failed for upload {file_id}: {source}")]
    Finalize {
        file_id: String,
        #[source]
        source: ApiError,
    },

    #[error("upload cancelled")]
    Cancelled,

    #[error(transparent)]
    Split(#[from] SplitError),

    #[error("I/O error reading source file: {0}")]
    Io(#[from] std::io::Error),
}
