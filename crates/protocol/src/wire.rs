use serde::{Deserialize, Serialize};

/// Multipart field names for `POST /api/uploads/chunk`.
pub mod field {
    pub const CHUNK: &str = "chunk";
    pub const FILE_NAME: &str = "fileName";
    pub const CONTENT_TYPE: &str = "contentType";
    pub const TOTAL_CHUNKS: &str = "totalChunks";
    pub const CHUNK_INDEX: &str = "chunkIndex";
    pub const FILE_ID: &str = "fileId";
}

/// What the receiver did with a submitted chunk.
///
/// `Duplicate` is the idempotency signal: the index was already stored for
/// this upload, so a retried or resumed send is acknowledged as success.
/// The client switches on this tag; no error-message sniffing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChunkOutcome {
    #[serde(rename = "stored")]
    Stored,
    #[serde(rename = "duplicate")]
    Duplicate,
}

/// Reply to a chunk submission.
///
/// `file_id` is always present so the very first chunk of a fresh upload
/// teaches the client its server-assigned identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkUploadResponse {
    pub file_id: String,
    pub outcome: ChunkOutcome,
    #[serde(default)]
    pub is_complete: bool,
    /// Retrieval path, set once the upload has been finalized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
}

/// Reply to the resume query: indices already persisted for a `file_id`.
///
/// Unknown ids yield an empty list with a 200 status, so the query is
/// side-effect-free and safe to call speculatively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadStatusResponse {
    pub file_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub received_chunks: Vec<u32>,
}

/// Explicit finalize request, used when the last chunk's reply did not
/// already report completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeRequest {
    pub file_id: String,
    pub file_name: String,
    pub content_type: String,
    pub total_chunks: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeResponse {
    pub file_path: String,
    /// Hex SHA-256 of the assembled artifact.
    pub sha256: String,
}

/// Operator-facing metadata for one upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadMetaView {
    pub file_id: String,
    pub file_name: String,
    pub content_type: String,
    pub total_chunks: u32,
    pub received_count: u32,
    pub is_complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
}

/// Machine-readable error category carried in every error reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    UnknownUpload,
    IncompleteUpload,
    PayloadTooLarge,
    Storage,
    Internal,
}

/// JSON body of every non-2xx reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
    /// Set on `incomplete_upload` when the gaps are determinable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing_chunks: Option<Vec<u32>>,
}
