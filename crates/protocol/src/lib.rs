//! Wire protocol for the medialift chunked-upload API.
//!
//! Both the client (`medialift-transfer`) and the server
//! (`medialift-server`) depend on this crate, so the chunk submission
//! fields, reply shapes, and error codes are defined exactly once.

pub mod constants;
pub mod wire;

pub use constants::{
    CHUNK_SEND_TIMEOUT, ContentClass, DEFAULT_MAX_CHUNK_BYTES, MAIN_CHUNK_SIZE, MAX_SEND_ATTEMPTS,
    MEDIA_ROOT, PREVIEW_CHUNK_SIZE, RETRY_BACKOFF,
};
pub use wire::{
    ChunkOutcome, ChunkUploadResponse, ErrorBody, ErrorCode, FinalizeRequest, FinalizeResponse,
    UploadMetaView, UploadStatusResponse, field,
};
